//! Push updates.
//!
//! The transport carrying topic messages (STOMP over WebSocket in
//! production) is external. It hands envelopes to the [`TopicRegistry`],
//! whose subscribers are forwarded into the [`PushBridge`] that reconciles
//! them with the order store.

mod bridge;
mod registry;

pub use bridge::{BridgeHandle, BridgeMessage, PushBridge};
pub use registry::{EventReceiver, Subscription, SubscriptionId, TopicRegistry};

use comanda_engine::PushEvent;
use serde::{Deserialize, Serialize};

/// A push event together with the topic it was published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    pub event: PushEvent,
}
