//! # Comanda Client
//!
//! Async IO layer around [`comanda_engine`]: HTTP transport, retry with a
//! circuit breaker, the cached order store, the background operation queue
//! and push reconciliation.
//!
//! ```no_run
//! use comanda_client::{ClientConfig, Comanda};
//! use comanda_engine::NewItem;
//!
//! # async fn demo() -> Result<(), comanda_client::ClientError> {
//! let (client, _dropped) = Comanda::new(ClientConfig::new("http://localhost:8080/api"))?;
//!
//! let order = client.store.fetch_order(42, false).await?;
//! let updated = client
//!     .store
//!     .add_item(order.id, NewItem::new(7, 2), Some(order.version))
//!     .await?;
//! assert!(updated.version > order.version);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod push;
pub mod queue;
pub mod retry;
pub mod service;
pub mod store;
pub mod transport;

pub use config::{ClientConfig, ConfigError, Timeouts};
pub use error::{ClientError, ConflictInfo, Result};
pub use push::{BridgeHandle, BridgeMessage, PushBridge, TopicMessage, TopicRegistry};
pub use queue::{DroppedOperation, OperationQueue};
pub use retry::RetryService;
pub use service::OrderService;
pub use store::{OrderStore, SyncStatus};
pub use transport::{Fetched, HttpTransport, Page};

use comanda_engine::Timestamp;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wall clock in milliseconds, the time base handed to the engine.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Wired client: one instance per process, shared by reference.
#[derive(Clone)]
pub struct Comanda {
    pub config: Arc<ClientConfig>,
    pub service: Arc<OrderService>,
    pub store: Arc<OrderStore>,
    pub queue: OperationQueue,
    pub topics: Arc<TopicRegistry>,
}

impl Comanda {
    /// Build the client. Also returns the channel on which operations the
    /// queue gave up on are reported.
    pub fn new(config: ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<DroppedOperation>)> {
        let transport = HttpTransport::new(&config)?;
        let retry = Arc::new(RetryService::from_config(&config));
        let service = Arc::new(OrderService::new(transport, retry));
        let store = Arc::new(OrderStore::new(Arc::clone(&service), config.cache));
        let (queue, dropped) = OperationQueue::new();

        tracing::info!(api_url = %config.api_url, "Comanda client ready");

        Ok((
            Self {
                config: Arc::new(config),
                service,
                store,
                queue,
                topics: TopicRegistry::new_shared(),
            },
            dropped,
        ))
    }

    /// Create a push bridge feeding this client's store.
    pub fn bridge(&self, capacity: usize) -> (PushBridge, BridgeHandle) {
        PushBridge::new(Arc::clone(&self.store), capacity)
    }
}
