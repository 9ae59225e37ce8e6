//! Conflict resolution between a local order and the server's copy.
//!
//! When the server rejects a mutation with a version conflict, the caller
//! holds three states of the same order: the local (optimistic) one, the
//! server's current one and, usually, the base both sides last agreed on
//! (see [`crate::VersionManager`]). The [`ConflictResolver`] turns these
//! into a [`Resolution`] under a selectable [`ConflictStrategy`].
//!
//! # Three-way merge
//!
//! 1. Start from the server document
//! 2. Merge line items by id against the base
//! 3. Merge the scalar fields `note` and `status` against the base
//! 4. Concurrent divergent edits are recorded as conflicts; the server value
//!    is kept for them
//!
//! Comparisons use structural equality of the model types.

use crate::{ItemId, LineItem, Order, OrderStatus, Version};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Discard local changes and take the server state
    ServerWins,
    /// Keep local state regardless of the server (may lose concurrent edits)
    ClientWins,
    /// Three-way merge against the base (default)
    #[default]
    AutoMerge,
    /// Resubmit the local intent at the server's version
    Retry,
    /// Hand the decision to the user
    AskUser,
}

/// What the resolver ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    AcceptedServer,
    AcceptedClient,
    MergedClean,
    MergedWithConflicts,
    RetryRequired,
    AwaitingUser,
}

/// Scalar fields taking part in the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeField {
    Note,
    Status,
}

/// Value of a merged scalar field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Note(Option<String>),
    Status(OrderStatus),
}

/// A concurrent edit the merge could not reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictRecord {
    #[serde(rename_all = "camelCase")]
    ItemModified {
        item_id: ItemId,
        base: LineItem,
        local: LineItem,
        server: LineItem,
    },
    #[serde(rename_all = "camelCase")]
    FieldModified {
        field: MergeField,
        base: FieldValue,
        local: FieldValue,
        server: FieldValue,
    },
}

/// Result of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// The state to adopt, absent for retry and ask-user
    pub resolved: Option<Order>,
    /// Strategy that produced this resolution
    pub strategy: ConflictStrategy,
    pub had_conflict: bool,
    /// Every divergent edit, even when `resolved` is usable
    pub conflicts: Vec<ConflictRecord>,
    pub outcome: ResolutionOutcome,
    /// Local intent restamped with the server version (retry only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_with: Option<Order>,
}

impl Resolution {
    fn server_wins(server: &Order) -> Self {
        Self {
            resolved: Some(server.clone()),
            strategy: ConflictStrategy::ServerWins,
            had_conflict: true,
            conflicts: Vec::new(),
            outcome: ResolutionOutcome::AcceptedServer,
            retry_with: None,
        }
    }

    /// Version the resolved document carries, if any.
    pub fn version(&self) -> Option<Version> {
        self.resolved.as_ref().map(|order| order.version)
    }
}

/// Resolves local vs. server state under one strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve `local` against `server`, using `base` as the common ancestor.
    pub fn resolve(&self, local: &Order, server: &Order, base: Option<&Order>) -> Resolution {
        match self.strategy {
            ConflictStrategy::ServerWins => Resolution::server_wins(server),
            ConflictStrategy::ClientWins => {
                tracing::warn!(
                    order_id = local.id,
                    local_version = local.version,
                    server_version = server.version,
                    "client wins: concurrent server changes are overwritten"
                );
                Resolution {
                    resolved: Some(local.clone()),
                    strategy: ConflictStrategy::ClientWins,
                    had_conflict: true,
                    conflicts: Vec::new(),
                    outcome: ResolutionOutcome::AcceptedClient,
                    retry_with: None,
                }
            }
            ConflictStrategy::AutoMerge => {
                let Some(base) = base else {
                    tracing::warn!(
                        order_id = server.id,
                        "auto merge without a base state, falling back to server wins"
                    );
                    return Resolution::server_wins(server);
                };

                let (merged, conflicts) = three_way_merge(local, server, base);
                let had_conflict = !conflicts.is_empty();
                Resolution {
                    resolved: Some(merged),
                    strategy: ConflictStrategy::AutoMerge,
                    had_conflict,
                    conflicts,
                    outcome: if had_conflict {
                        ResolutionOutcome::MergedWithConflicts
                    } else {
                        ResolutionOutcome::MergedClean
                    },
                    retry_with: None,
                }
            }
            ConflictStrategy::Retry => {
                let mut retry_with = local.clone();
                retry_with.version = server.version;
                Resolution {
                    resolved: None,
                    strategy: ConflictStrategy::Retry,
                    had_conflict: true,
                    conflicts: Vec::new(),
                    outcome: ResolutionOutcome::RetryRequired,
                    retry_with: Some(retry_with),
                }
            }
            ConflictStrategy::AskUser => {
                let conflicts = base
                    .map(|base| three_way_merge(local, server, base).1)
                    .unwrap_or_default();
                Resolution {
                    resolved: None,
                    strategy: ConflictStrategy::AskUser,
                    had_conflict: true,
                    conflicts,
                    outcome: ResolutionOutcome::AwaitingUser,
                    retry_with: None,
                }
            }
        }
    }
}

/// Merge `local` and `server` against their common `base`.
///
/// The result carries the server's identity, version and metadata. When the
/// merged line items differ from the server's, the total is recomputed from
/// them.
pub fn three_way_merge(local: &Order, server: &Order, base: &Order) -> (Order, Vec<ConflictRecord>) {
    let mut merged = server.clone();
    let mut conflicts = Vec::new();

    merged.items = merge_items(&base.items, &local.items, &server.items, &mut conflicts);
    if merged.items != server.items {
        merged.total_value = merged.items.iter().map(|item| item.line_total).sum();
    }

    merged.note = merge_field(
        MergeField::Note,
        &base.note,
        &local.note,
        &server.note,
        FieldValue::Note,
        &mut conflicts,
    );
    merged.status = merge_field(
        MergeField::Status,
        &base.status,
        &local.status,
        &server.status,
        FieldValue::Status,
        &mut conflicts,
    );

    (merged, conflicts)
}

fn merge_items(
    base: &[LineItem],
    local: &[LineItem],
    server: &[LineItem],
    conflicts: &mut Vec<ConflictRecord>,
) -> Vec<LineItem> {
    let base_map: HashMap<ItemId, &LineItem> = base.iter().map(|i| (i.id, i)).collect();
    let local_map: HashMap<ItemId, &LineItem> = local.iter().map(|i| (i.id, i)).collect();
    let server_ids: HashSet<ItemId> = server.iter().map(|i| i.id).collect();

    let mut merged = Vec::with_capacity(server.len().max(local.len()));

    for server_item in server {
        let Some(base_item) = base_map.get(&server_item.id) else {
            // Added on the server
            merged.push(server_item.clone());
            continue;
        };
        let Some(local_item) = local_map.get(&server_item.id) else {
            // Removed locally; the deletion wins over the server copy
            continue;
        };

        let local_changed = *local_item != *base_item;
        let server_changed = server_item != *base_item;

        if local_changed && server_changed {
            if **local_item != *server_item {
                conflicts.push(ConflictRecord::ItemModified {
                    item_id: server_item.id,
                    base: (*base_item).clone(),
                    local: (*local_item).clone(),
                    server: server_item.clone(),
                });
            }
            merged.push(server_item.clone());
        } else if server_changed {
            merged.push(server_item.clone());
        } else {
            merged.push((*local_item).clone());
        }
    }

    // Added locally
    merged.extend(
        local
            .iter()
            .filter(|item| !server_ids.contains(&item.id) && !base_map.contains_key(&item.id))
            .cloned(),
    );

    merged
}

fn merge_field<T: Clone + PartialEq>(
    field: MergeField,
    base: &T,
    local: &T,
    server: &T,
    wrap: impl Fn(T) -> FieldValue,
    conflicts: &mut Vec<ConflictRecord>,
) -> T {
    let local_changed = local != base;
    let server_changed = server != base;

    if local_changed && server_changed && local != server {
        conflicts.push(ConflictRecord::FieldModified {
            field,
            base: wrap(base.clone()),
            local: wrap(local.clone()),
            server: wrap(server.clone()),
        });
        server.clone()
    } else if server_changed {
        server.clone()
    } else {
        local.clone()
    }
}
