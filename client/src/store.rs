//! Order store: the cache and version manager, kept in sync with the server.
//!
//! All reads go through the cache. Every order accepted from the server,
//! whether fetched, returned by a mutation or pushed, is upserted into the
//! cache and registered with the version manager as the new merge base.
//!
//! State lives behind a `std::sync::Mutex` that is taken and released
//! between awaits, so each cache update is atomic with respect to other
//! tasks.

use crate::error::{ClientError, Result};
use crate::now_ms;
use crate::service::OrderService;
use crate::transport::{Fetched, DEFAULT_PAGE_SIZE};
use comanda_engine::version::DEFAULT_MAX_AGE_MS;
use comanda_engine::{
    CacheConfig, CacheLookup, CloseOrder, ConflictResolver, ConflictStrategy, EditOutcome, ItemId,
    Mutation, NewItem, NewOrder, OptimisticEdit, Order, OrderCache, OrderId, OrderStatus, Provenance, PushAction, PushEvent,
    Resolution, Timestamp, UnitId, Version, VersionManager,
};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Connection and sync bookkeeping for the push channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connected: bool,
    /// Last time a push event was applied
    pub last_sync: Option<Timestamp>,
}

#[derive(Debug)]
struct StoreState {
    cache: OrderCache,
    versions: VersionManager,
    sync: SyncStatus,
}

/// Client-side view of orders.
#[derive(Debug)]
pub struct OrderStore {
    service: Arc<OrderService>,
    state: Mutex<StoreState>,
    in_flight: DashMap<OrderId, usize>,
}

/// Marks an order as busy until dropped.
struct InFlight<'a> {
    map: &'a DashMap<OrderId, usize>,
    id: OrderId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove_if_mut(&self.id, |_, count| {
            *count -= 1;
            *count == 0
        });
    }
}

impl OrderStore {
    pub fn new(service: Arc<OrderService>, config: CacheConfig) -> Self {
        Self {
            service,
            state: Mutex::new(StoreState {
                cache: OrderCache::new(config),
                versions: VersionManager::new(),
                sync: SyncStatus::default(),
            }),
            in_flight: DashMap::new(),
        }
    }

    pub fn service(&self) -> &OrderService {
        &self.service
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, id: OrderId) -> InFlight<'_> {
        *self.in_flight.entry(id).or_insert(0) += 1;
        InFlight {
            map: &self.in_flight,
            id,
        }
    }

    /// Upsert a server copy and record it as the merge base.
    ///
    /// Fetches, mutation results and pushes all land here. A copy older than
    /// what is already known lost a race with a newer answer: it is dropped
    /// and the newer cached order is returned instead.
    fn accept(&self, order: Order, provenance: Provenance) -> Order {
        let now = now_ms();
        let mut state = self.state();
        Self::accept_locked(&mut state, order, now, provenance)
    }

    fn accept_all(&self, orders: Vec<Order>) -> Vec<Order> {
        let now = now_ms();
        let mut state = self.state();
        orders
            .into_iter()
            .map(|order| Self::accept_locked(&mut state, order, now, Provenance::Fetch))
            .collect()
    }

    fn accept_locked(state: &mut StoreState, order: Order, now: Timestamp, provenance: Provenance) -> Order {
        let id = order.id;
        let known = state
            .cache
            .get(id)
            .map(|cached| cached.version)
            .max(state.versions.get(id).map(|entry| entry.version));

        if known.is_some_and(|v| v > order.version) {
            tracing::debug!(
                order_id = id,
                known = ?known,
                incoming = order.version,
                provenance = ?provenance,
                "Ignoring outdated copy"
            );
            if let Some(cached) = state.cache.get(id) {
                return cached.clone();
            }
            if let Some(base) = state.versions.base_state(id) {
                return base.clone();
            }
        }

        state.versions.register(id, order.version, &order, now);
        state.cache.upsert(order.clone(), now, provenance);
        order
    }

    fn clear_focus_if(&self, id: OrderId) {
        let mut state = self.state();
        if state.cache.focus() == Some(id) {
            state.cache.clear_focus();
        }
    }

    fn cached_version(&self, id: OrderId) -> Option<Version> {
        self.state().cache.get(id).map(|order| order.version)
    }

    // ========== Reads ==========

    /// Read an order through the cache.
    ///
    /// Fresh entries are served locally. Stale or forced reads send a
    /// conditional request with the cached etag; a 304 only refreshes the
    /// entry's timestamp. Misses fetch unconditionally.
    pub async fn fetch_order(&self, id: OrderId, force_refresh: bool) -> Result<Order> {
        let _busy = self.track(id);

        let lookup = self.state().cache.lookup(id, force_refresh, now_ms());
        let etag = match lookup {
            CacheLookup::Fresh(order) => return Ok(order),
            CacheLookup::Revalidate { etag } => etag,
            CacheLookup::Miss => None,
        };

        match self.service.get(id, etag.as_deref()).await? {
            Fetched::Modified { order, .. } => Ok(self.accept(order, Provenance::Fetch)),
            Fetched::NotModified => {
                let touched = self.state().cache.touch(id, now_ms()).cloned();
                if let Some(order) = touched {
                    tracing::debug!(order_id = id, "Not modified");
                    return Ok(order);
                }

                // Evicted while the request was out
                match self.service.get(id, None).await? {
                    Fetched::Modified { order, .. } => Ok(self.accept(order, Provenance::Fetch)),
                    Fetched::NotModified => Err(ClientError::Decode(format!(
                        "unconditional fetch of order {id} answered 304"
                    ))),
                }
            }
        }
    }

    pub async fn fetch_active(&self) -> Result<Vec<Order>> {
        let orders = self.service.get_active().await?;
        tracing::debug!(count = orders.len(), "Fetched active orders");
        Ok(self.accept_all(orders))
    }

    pub async fn fetch_by_unit(&self, unit_id: UnitId) -> Result<Vec<Order>> {
        let orders = self.service.get_by_unit(unit_id).await?;
        Ok(self.accept_all(orders))
    }

    pub async fn fetch_by_status(&self, status: OrderStatus, page: u32) -> Result<Vec<Order>> {
        let page = self
            .service
            .get_by_status(status, page, DEFAULT_PAGE_SIZE)
            .await?;
        Ok(self.accept_all(page.content))
    }

    pub async fn fetch_by_number(&self, number: &str) -> Result<Order> {
        let order = self.service.get_by_number(number).await?;
        Ok(self.accept(order, Provenance::Fetch))
    }

    // ========== Mutations ==========

    /// Create an order and focus it.
    pub async fn create(&self, order: NewOrder) -> Result<Order> {
        let created = self.service.create(order).await?;
        let created = self.accept(created, Provenance::Mutation);
        self.state().cache.set_focus(created.id);
        Ok(created)
    }

    pub async fn add_item(&self, id: OrderId, item: NewItem, version: Option<Version>) -> Result<Order> {
        self.mutate_versioned(id, version, |v| self.service.add_item(id, &item, v))
            .await
    }

    pub async fn update_item_quantity(
        &self,
        id: OrderId,
        item_id: ItemId,
        quantity: u32,
        version: Option<Version>,
    ) -> Result<Order> {
        self.mutate_versioned(id, version, |v| {
            self.service.update_item_quantity(id, item_id, quantity, v)
        })
        .await
    }

    /// Change a quantity, showing the result before the server confirms it.
    ///
    /// The speculative copy goes into the cache right away but never becomes
    /// a merge base. The server's answer replaces it; on failure the captured
    /// copy comes back unless a newer server copy arrived in the meantime.
    pub async fn update_item_quantity_optimistic(
        &self,
        id: OrderId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<EditOutcome<ClientError>> {
        let current = match self.get(id) {
            Some(order) => order,
            None => self.fetch_order(id, false).await?,
        };

        let mut edit = OptimisticEdit::begin(&current);
        if edit.set_quantity(item_id, quantity) {
            self.state()
                .cache
                .upsert(edit.speculative().clone(), now_ms(), Provenance::Mutation);
        }

        let result = self
            .update_item_quantity(id, item_id, quantity, Some(current.version))
            .await;
        let outcome = edit.settle(result);

        if let EditOutcome::RolledBack { restored, error } = &outcome {
            tracing::warn!(order_id = id, error = %error, "Optimistic edit rolled back");
            let mut state = self.state();
            if state.cache.get(id).map_or(true, |cached| cached.version <= restored.version) {
                state.cache.upsert(restored.clone(), now_ms(), Provenance::Fetch);
            }
        }
        Ok(outcome)
    }

    pub async fn remove_item(&self, id: OrderId, item_id: ItemId, version: Option<Version>) -> Result<Order> {
        self.mutate_versioned(id, version, |v| self.service.remove_item(id, item_id, v))
            .await
    }

    /// Run a version-guarded mutation. The version hint defaults to the
    /// cached copy. On a conflict the order is refetched once and the
    /// mutation retried at the fresh version; a second conflict is returned.
    async fn mutate_versioned<F, Fut>(&self, id: OrderId, version: Option<Version>, op: F) -> Result<Order>
    where
        F: Fn(Option<Version>) -> Fut,
        Fut: Future<Output = Result<Order>>,
    {
        let _busy = self.track(id);
        let hint = version.or_else(|| self.cached_version(id));

        let updated = match op(hint).await {
            Ok(order) => order,
            Err(ClientError::Conflict(info)) => {
                tracing::warn!(
                    order_id = id,
                    client_version = ?info.client_version,
                    server_version = ?info.server_version,
                    "Version conflict, refetching"
                );
                let fresh = self.fetch_order(id, true).await?;
                op(Some(fresh.version)).await?
            }
            Err(err) => return Err(err),
        };

        Ok(self.accept(updated, Provenance::Mutation))
    }

    /// Finalize an order. The business rules are checked against the current
    /// server copy, served from the cache when fresh.
    pub async fn close(&self, id: OrderId, close: CloseOrder) -> Result<Order> {
        let _busy = self.track(id);

        let current = match self.fetch_order(id, false).await {
            Ok(order) => Some(order),
            Err(err) if err.status() == Some(404) => None,
            Err(err) => return Err(err),
        };

        let closed = self.service.close(current.as_ref(), id, &close).await?;
        let closed = self.accept(closed, Provenance::Mutation);
        self.clear_focus_if(id);
        Ok(closed)
    }

    pub async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order> {
        let _busy = self.track(id);

        let canceled = self.service.cancel(id, reason).await?;
        let canceled = self.accept(canceled, Provenance::Mutation);
        self.clear_focus_if(id);
        Ok(canceled)
    }

    pub async fn change_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let _busy = self.track(id);

        let updated = self.service.change_status(id, status).await?;
        let updated = self.accept(updated, Provenance::Mutation);
        if updated.status.is_terminal() {
            self.clear_focus_if(id);
        }
        Ok(updated)
    }

    /// Dispatch a queued mutation.
    pub async fn apply_mutation(&self, mutation: &Mutation) -> Result<Order> {
        match mutation {
            Mutation::Create(order) => self.create(order.clone()).await,
            Mutation::AddItem { order_id, item } => {
                self.add_item(*order_id, item.clone(), None).await
            }
            Mutation::UpdateQuantity {
                order_id,
                item_id,
                quantity,
            } => {
                self.update_item_quantity(*order_id, *item_id, *quantity, None)
                    .await
            }
            Mutation::RemoveItem { order_id, item_id } => {
                self.remove_item(*order_id, *item_id, None).await
            }
            Mutation::Close { order_id, close } => self.close(*order_id, close.clone()).await,
            Mutation::Cancel { order_id, reason } => self.cancel(*order_id, reason).await,
            Mutation::ChangeStatus { order_id, status } => {
                self.change_status(*order_id, *status).await
            }
        }
    }

    /// Resolve a local copy against the latest server state.
    ///
    /// The merge base is captured before the refetch replaces it. The
    /// server state is cached; applying the resolution is up to the caller.
    pub async fn resolve_conflict(&self, local: &Order, strategy: ConflictStrategy) -> Result<Resolution> {
        let base = self.state().versions.base_state(local.id).cloned();
        let server = self.fetch_order(local.id, true).await?;

        let resolution = ConflictResolver::new(strategy).resolve(local, &server, base.as_ref());
        tracing::info!(
            order_id = local.id,
            strategy = ?strategy,
            outcome = ?resolution.outcome,
            conflicts = resolution.conflicts.len(),
            "Conflict resolved"
        );
        Ok(resolution)
    }

    pub async fn delta_since(&self, id: OrderId, version: Version) -> Result<serde_json::Value> {
        self.service.delta_since(id, version).await
    }

    pub async fn keep_alive(&self, id: OrderId) -> Result<serde_json::Value> {
        self.service.ping(id).await
    }

    // ========== Push reconciliation ==========

    /// Apply a pushed event to the cache.
    pub async fn apply_push(&self, event: &PushEvent) -> Result<()> {
        match event.action() {
            PushAction::Replace(order) => {
                self.accept(order, Provenance::Push);
            }
            PushAction::Refetch(id) => {
                self.fetch_order(id, true).await?;
            }
            PushAction::Ignore => {
                tracing::warn!(event_type = ?event.event_type, order_id = event.order_id, "Unhandled push event");
                return Ok(());
            }
        }

        if event.ends_order() {
            self.clear_focus_if(event.order_id);
        }
        self.state().sync.last_sync = Some(now_ms());
        tracing::debug!(event_type = ?event.event_type, order_id = event.order_id, "Push applied");
        Ok(())
    }

    /// Refresh what may have been missed while disconnected.
    pub async fn handle_reconnect(&self) -> Result<()> {
        tracing::info!("Push channel reconnected, refreshing");
        self.fetch_active().await?;

        let focus = self.state().cache.focus();
        if let Some(id) = focus {
            self.fetch_order(id, true).await?;
        }

        self.set_connected(true);
        Ok(())
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().sync.connected = connected;
    }

    // ========== Housekeeping ==========

    /// Sweep expired cache entries and old versions.
    pub fn gc(&self) -> (usize, usize) {
        let now = now_ms();
        let mut state = self.state();
        let cache = state.cache.gc(now);
        let versions = state.versions.gc(now, DEFAULT_MAX_AGE_MS);
        (cache, versions)
    }

    /// Run [`gc`](Self::gc) on the cache's interval until the store is dropped.
    pub fn spawn_gc(self: &Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_millis(self.state().cache.config().gc_interval.max(1));
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let (cache, versions) = store.gc();
                if cache + versions > 0 {
                    tracing::info!(cache, versions, "Garbage collected");
                }
            }
        })
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.cache.clear();
        state.versions = VersionManager::new();
    }

    // ========== Views ==========

    /// Cached copy, without touching the network.
    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.state().cache.get(id).cloned()
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.state().cache.active().into_iter().cloned().collect()
    }

    pub fn finalized_orders(&self) -> Vec<Order> {
        self.state().cache.finalized().into_iter().cloned().collect()
    }

    pub fn orders_by_unit(&self) -> BTreeMap<UnitId, Vec<Order>> {
        self.state()
            .cache
            .by_unit()
            .into_iter()
            .map(|(unit, orders)| (unit, orders.into_iter().cloned().collect()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state().cache.active_count()
    }

    pub fn len(&self) -> usize {
        self.state().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().cache.is_empty()
    }

    pub fn set_focus(&self, id: OrderId) {
        self.state().cache.set_focus(id);
    }

    pub fn focused(&self) -> Option<Order> {
        self.state().cache.focused().cloned()
    }

    pub fn is_stale(&self, id: OrderId) -> bool {
        self.state().cache.is_stale(id, now_ms())
    }

    /// Whether a fetch or mutation of `id` is running.
    pub fn in_flight(&self, id: OrderId) -> bool {
        self.in_flight.contains_key(&id)
    }

    pub fn base_version(&self, id: OrderId) -> Option<Version> {
        self.state().versions.get(id).map(|entry| entry.version)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.state().sync
    }
}
