//! # Comanda Engine
//!
//! Deterministic consistency core for the order (comanda) aggregate of a
//! venue back office.
//!
//! The crate holds everything about keeping a client-side view of orders
//! consistent with the server that does not involve IO: the data model,
//! local validation, the version manager, three-way conflict resolution, the
//! normalized cache, the circuit breaker and retry policy, queue bookkeeping
//! and the push event model.
//!
//! ## Design Principles
//!
//! - **No IO**: no network, no threads, no clock
//! - **Deterministic**: time is passed in as [`Timestamp`] milliseconds
//! - **Testable**: pure state machines, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Optimistic concurrency
//!
//! Every [`Order`] carries a `version`. Mutations are sent with the version
//! the client last saw; the server rejects stale ones with a conflict. The
//! [`VersionManager`] keeps the last agreed snapshot of each order so that a
//! [`ConflictResolver`] can run a three-way merge:
//!
//! - [`ConflictStrategy::ServerWins`] - take the server state
//! - [`ConflictStrategy::ClientWins`] - keep local state
//! - [`ConflictStrategy::AutoMerge`] - merge items, `note` and `status` (default)
//! - [`ConflictStrategy::Retry`] - resubmit at the server's version
//! - [`ConflictStrategy::AskUser`] - report conflicts, resolve nothing
//!
//! ### Cache
//!
//! [`OrderCache`] stores orders by id with staleness (30s) and expiry (5min)
//! metadata, and answers [`OrderCache::lookup`] with a [`CacheLookup`].
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use comanda_engine::{
//!     CacheConfig, CacheLookup, ConflictResolver, ConflictStrategy, LineItem, Order,
//!     OrderCache, Provenance, VersionManager,
//! };
//!
//! let order = Order::new(1, "000001", 5, Utc::now())
//!     .with_item(LineItem::new(10, 1, 7, "Picanha", 2, 4_500));
//!
//! // 1. Cache the server copy and remember it as merge base
//! let mut cache = OrderCache::new(CacheConfig::default());
//! let mut versions = VersionManager::new();
//! cache.upsert(order.clone(), 1_000, Provenance::Fetch);
//! versions.register(order.id, order.version, &order, 1_000);
//! assert!(matches!(cache.lookup(1, false, 2_000), CacheLookup::Fresh(_)));
//!
//! // 2. Local and server both change the order
//! let mut local = order.clone();
//! local.note = Some("no onions".into());
//! let mut server = order.clone();
//! server.version = 2;
//! server.item_mut(10).unwrap().set_quantity(3);
//!
//! // 3. Merge
//! let resolver = ConflictResolver::new(ConflictStrategy::AutoMerge);
//! let resolution = resolver.resolve(&local, &server, versions.base_state(1));
//! let merged = resolution.resolved.unwrap();
//! assert!(!resolution.had_conflict);
//! assert_eq!(merged.note.as_deref(), Some("no onions"));
//! assert_eq!(merged.item(10).unwrap().quantity, 3);
//! ```

pub mod cache;
pub mod circuit;
pub mod error;
pub mod event;
pub mod operation;
pub mod optimistic;
pub mod order;
pub mod queue;
pub mod reconcile;
pub mod retry;
pub mod validate;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheLookup, EntryMetadata, OrderCache, Provenance};
pub use circuit::{Admission, CircuitBreaker, CircuitState, CircuitStatus};
pub use error::Error;
pub use event::{EventType, PushAction, PushEvent, Topic};
pub use operation::{CloseOrder, Mutation, NewItem, NewOrder, OperationKind};
pub use optimistic::{EditOutcome, OptimisticEdit};
pub use order::{
    ItemStatus, LineItem, Order, OrderOrigin, OrderStatus, OrderTotals, PaymentMethod,
};
pub use queue::{FailOutcome, PendingQueue, QueueEntry};
pub use reconcile::{
    three_way_merge, ConflictRecord, ConflictResolver, ConflictStrategy, FieldValue, MergeField,
    Resolution, ResolutionOutcome,
};
pub use retry::RetryPolicy;
pub use version::{VersionEntry, VersionManager};

/// Type aliases for clarity
pub type OrderId = u64;
pub type ItemId = u64;
pub type UnitId = u64;
pub type FundId = u64;
pub type ProductId = u64;
pub type Version = u64;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
/// Money in minor currency units
pub type Cents = i64;
