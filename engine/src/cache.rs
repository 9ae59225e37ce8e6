//! Normalized order cache.
//!
//! Orders are stored once, keyed by id, next to per-entry metadata that
//! drives the staleness and expiry policy:
//!
//! - an entry is *stale* once `now - timestamp > stale_threshold`; stale
//!   entries are still served but revalidated on the next read
//! - an entry is *expired* once `now - timestamp > ttl`; expired entries are
//!   evicted by [`OrderCache::gc`]
//!
//! The cache never talks to the network. [`OrderCache::lookup`] tells the
//! caller whether a read can be served locally or needs a (conditional)
//! request.

use crate::{Order, OrderId, Timestamp, UnitId, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Cache tuning knobs, all durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Hard expiry of an entry
    pub ttl: u64,
    /// Soft capacity; exceeding it triggers a sweep on insert
    pub max_items: usize,
    /// Period of the background sweep
    pub gc_interval: u64,
    /// Age after which an entry is revalidated before use
    pub stale_threshold: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: 5 * 60 * 1000,
            max_items: 100,
            gc_interval: 60 * 1000,
            stale_threshold: 30 * 1000,
        }
    }
}

/// Where a cache entry last came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Fetch,
    Mutation,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Last fetch or write instant
    pub timestamp: Timestamp,
    pub version: Version,
    pub etag: Option<String>,
    pub provenance: Provenance,
}

/// Outcome of a cached read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Fresh entry, serve without a request
    Fresh(Order),
    /// Entry is stale or a refresh was forced; revalidate with the etag
    Revalidate { etag: Option<String> },
    /// Nothing cached
    Miss,
}

#[derive(Debug, Clone, Default)]
pub struct OrderCache {
    config: CacheConfig,
    orders: HashMap<OrderId, Order>,
    metadata: HashMap<OrderId, EntryMetadata>,
    focus: Option<OrderId>,
}

impl OrderCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace an order and refresh its metadata.
    ///
    /// When the cache grows past `max_items`, expired entries are swept.
    pub fn upsert(&mut self, order: Order, now: Timestamp, provenance: Provenance) {
        let id = order.id;
        self.metadata.insert(
            id,
            EntryMetadata {
                timestamp: now,
                version: order.version,
                etag: order.etag.clone(),
                provenance,
            },
        );
        self.orders.insert(id, order);

        if self.orders.len() > self.config.max_items {
            self.gc(now);
        }
    }

    pub fn evict(&mut self, id: OrderId) -> Option<Order> {
        self.metadata.remove(&id);
        if self.focus == Some(id) {
            self.focus = None;
        }
        self.orders.remove(&id)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn metadata(&self, id: OrderId) -> Option<&EntryMetadata> {
        self.metadata.get(&id)
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.orders.contains_key(&id)
    }

    /// Missing entries count as stale.
    pub fn is_stale(&self, id: OrderId, now: Timestamp) -> bool {
        self.metadata
            .get(&id)
            .map_or(true, |meta| now.saturating_sub(meta.timestamp) > self.config.stale_threshold)
    }

    /// Refresh the timestamp of an entry the server confirmed unchanged.
    /// Returns the cached order.
    pub fn touch(&mut self, id: OrderId, now: Timestamp) -> Option<&Order> {
        let meta = self.metadata.get_mut(&id)?;
        meta.timestamp = now;
        self.orders.get(&id)
    }

    /// Decide how a read of `id` must be served.
    pub fn lookup(&self, id: OrderId, force: bool, now: Timestamp) -> CacheLookup {
        match (self.orders.get(&id), self.metadata.get(&id)) {
            (Some(order), Some(_)) if !force && !self.is_stale(id, now) => {
                tracing::debug!(order_id = id, "cache hit");
                CacheLookup::Fresh(order.clone())
            }
            (Some(_), Some(meta)) => {
                tracing::debug!(order_id = id, force, "cache revalidate");
                CacheLookup::Revalidate {
                    etag: meta.etag.clone(),
                }
            }
            _ => {
                tracing::debug!(order_id = id, "cache miss");
                CacheLookup::Miss
            }
        }
    }

    /// Evict every entry older than the ttl. Returns how many were removed.
    pub fn gc(&mut self, now: Timestamp) -> usize {
        let ttl = self.config.ttl;
        let expired: Vec<OrderId> = self
            .metadata
            .iter()
            .filter(|(_, meta)| now.saturating_sub(meta.timestamp) > ttl)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.evict(*id);
        }

        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), remaining = self.orders.len(), "cache gc");
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.orders.clear();
        self.metadata.clear();
        self.focus = None;
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    // Views. Ordered by id so callers get a stable listing.

    pub fn all(&self) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self.orders.values().collect();
        orders.sort_by_key(|order| order.id);
        orders
    }

    /// Orders in `CREATED` or `IN_PROGRESS`.
    pub fn active(&self) -> Vec<&Order> {
        self.all().into_iter().filter(|o| o.is_active()).collect()
    }

    pub fn finalized(&self) -> Vec<&Order> {
        self.all()
            .into_iter()
            .filter(|o| o.status == crate::OrderStatus::Finalized)
            .collect()
    }

    pub fn by_unit(&self) -> BTreeMap<UnitId, Vec<&Order>> {
        let mut map: BTreeMap<UnitId, Vec<&Order>> = BTreeMap::new();
        for order in self.all() {
            map.entry(order.unit_id).or_default().push(order);
        }
        map
    }

    pub fn active_count(&self) -> usize {
        self.orders.values().filter(|o| o.is_active()).count()
    }

    // Focus: the order currently being worked on.

    pub fn set_focus(&mut self, id: OrderId) {
        self.focus = Some(id);
    }

    pub fn clear_focus(&mut self) {
        self.focus = None;
    }

    pub fn focus(&self) -> Option<OrderId> {
        self.focus
    }

    /// The focused order, if it is still cached.
    pub fn focused(&self) -> Option<&Order> {
        self.focus.and_then(|id| self.orders.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::fixtures::order;
    use crate::OrderStatus;

    fn cache() -> OrderCache {
        OrderCache::new(CacheConfig::default())
    }

    #[test]
    fn upsert_records_metadata() {
        let mut cache = cache();
        let mut o = order(1, 3);
        o.etag = Some("\"3\"".into());
        cache.upsert(o, 1_000, Provenance::Fetch);

        let meta = cache.metadata(1).unwrap();
        assert_eq!(meta.timestamp, 1_000);
        assert_eq!(meta.version, 3);
        assert_eq!(meta.etag.as_deref(), Some("\"3\""));
        assert_eq!(meta.provenance, Provenance::Fetch);
    }

    #[test]
    fn staleness_bound() {
        let mut cache = cache();
        assert!(cache.is_stale(1, 0));

        cache.upsert(order(1, 1), 0, Provenance::Fetch);
        assert!(!cache.is_stale(1, 30_000));
        assert!(cache.is_stale(1, 30_001));
    }

    #[test]
    fn lookup_paths() {
        let mut cache = cache();
        assert_eq!(cache.lookup(1, false, 0), CacheLookup::Miss);

        let mut o = order(1, 1);
        o.etag = Some("e1".into());
        cache.upsert(o.clone(), 0, Provenance::Fetch);

        assert_eq!(cache.lookup(1, false, 10_000), CacheLookup::Fresh(o));
        assert_eq!(
            cache.lookup(1, true, 10_000),
            CacheLookup::Revalidate {
                etag: Some("e1".into())
            }
        );
        assert_eq!(
            cache.lookup(1, false, 31_000),
            CacheLookup::Revalidate {
                etag: Some("e1".into())
            }
        );
    }

    #[test]
    fn touch_refreshes_timestamp_only() {
        let mut cache = cache();
        cache.upsert(order(1, 2), 0, Provenance::Push);

        let touched = cache.touch(1, 40_000).cloned().unwrap();
        assert_eq!(touched.version, 2);
        let meta = cache.metadata(1).unwrap();
        assert_eq!(meta.timestamp, 40_000);
        assert_eq!(meta.provenance, Provenance::Push);
        assert!(!cache.is_stale(1, 40_000));

        assert!(cache.touch(99, 0).is_none());
    }

    #[test]
    fn gc_evicts_expired() {
        let mut cache = cache();
        cache.upsert(order(1, 1), 0, Provenance::Fetch);
        cache.upsert(order(2, 1), 200_000, Provenance::Fetch);
        cache.set_focus(1);

        assert_eq!(cache.gc(300_001), 1);
        assert!(cache.get(1).is_none());
        assert!(cache.metadata(1).is_none());
        assert!(cache.get(2).is_some());
        assert_eq!(cache.focus(), None);
    }

    #[test]
    fn capacity_triggers_gc() {
        let mut cache = OrderCache::new(CacheConfig {
            max_items: 2,
            ..CacheConfig::default()
        });
        cache.upsert(order(1, 1), 0, Provenance::Fetch);
        cache.upsert(order(2, 1), 0, Provenance::Fetch);
        cache.upsert(order(3, 1), 400_000, Provenance::Fetch);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains(3));
    }

    #[test]
    fn views() {
        let mut cache = cache();
        let mut done = order(1, 1);
        done.status = OrderStatus::Finalized;
        let mut other_unit = order(2, 1);
        other_unit.unit_id = 8;
        let mut progress = order(3, 1);
        progress.status = OrderStatus::InProgress;

        cache.upsert(done, 0, Provenance::Fetch);
        cache.upsert(other_unit, 0, Provenance::Fetch);
        cache.upsert(progress, 0, Provenance::Fetch);

        let active: Vec<_> = cache.active().iter().map(|o| o.id).collect();
        assert_eq!(active, vec![2, 3]);
        assert_eq!(cache.active_count(), 2);
        assert_eq!(cache.finalized().len(), 1);

        let by_unit = cache.by_unit();
        assert_eq!(by_unit[&5].len(), 2);
        assert_eq!(by_unit[&8].len(), 1);
    }

    #[test]
    fn focus_follows_evict_and_clear() {
        let mut cache = cache();
        cache.upsert(order(1, 1), 0, Provenance::Fetch);
        cache.set_focus(1);
        assert_eq!(cache.focused().map(|o| o.id), Some(1));

        cache.evict(1);
        assert_eq!(cache.focus(), None);

        cache.upsert(order(2, 1), 0, Provenance::Fetch);
        cache.set_focus(2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.focus(), None);
    }
}
