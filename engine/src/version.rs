//! Version manager.
//!
//! Remembers the last server-confirmed snapshot of each order. The snapshot
//! is the merge base for three-way conflict resolution, so it must be the
//! state both sides last agreed on, never a locally edited copy.

use crate::{Order, OrderId, Timestamp, Version};
use std::collections::HashMap;

/// Default age after which an entry is swept: one hour.
pub const DEFAULT_MAX_AGE_MS: u64 = 60 * 60 * 1000;

/// A recorded version of one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub version: Version,
    /// Deep copy taken at registration time
    pub snapshot: Order,
    pub registered_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct VersionManager {
    entries: HashMap<OrderId, VersionEntry>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snapshot` as the agreed state of order `id` at `version`.
    pub fn register(&mut self, id: OrderId, version: Version, snapshot: &Order, now: Timestamp) {
        self.entries.insert(
            id,
            VersionEntry {
                version,
                snapshot: snapshot.clone(),
                registered_at: now,
            },
        );
    }

    /// Same as [`register`](Self::register); kept for call sites that
    /// express an update of a known order.
    pub fn update(&mut self, id: OrderId, version: Version, snapshot: &Order, now: Timestamp) {
        self.register(id, version, snapshot, now);
    }

    pub fn get(&self, id: OrderId) -> Option<&VersionEntry> {
        self.entries.get(&id)
    }

    /// Whether `version` matches the recorded one. Unknown orders are
    /// considered current.
    pub fn is_current(&self, id: OrderId, version: Version) -> bool {
        self.entries
            .get(&id)
            .map_or(true, |entry| entry.version == version)
    }

    pub fn unregister(&mut self, id: OrderId) -> Option<VersionEntry> {
        self.entries.remove(&id)
    }

    /// The merge base for order `id`.
    pub fn base_state(&self, id: OrderId) -> Option<&Order> {
        self.entries.get(&id).map(|entry| &entry.snapshot)
    }

    /// Drop entries registered more than `max_age` milliseconds before `now`.
    /// Returns the number of entries removed.
    pub fn gc(&mut self, now: Timestamp, max_age: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.registered_at) <= max_age);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired version entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
