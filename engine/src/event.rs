//! Server push events and topics.

use crate::{Order, OrderId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderCreated,
    OrderUpdated,
    OrderFinalized,
    OrderCanceled,
    ItemAdded,
    ItemRemoved,
    ItemUpdated,
    /// Anything this client does not understand
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Events carrying the full order.
    pub fn is_full_replace(self) -> bool {
        matches!(
            self,
            EventType::OrderCreated
                | EventType::OrderUpdated
                | EventType::OrderFinalized
                | EventType::OrderCanceled
        )
    }

    /// Partial item events; the order must be refetched.
    pub fn is_partial(self) -> bool {
        matches!(
            self,
            EventType::ItemAdded | EventType::ItemRemoved | EventType::ItemUpdated
        )
    }
}

/// Envelope delivered on a push topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Order>,
}

/// How the cache should react to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAction {
    Replace(Order),
    Refetch(OrderId),
    Ignore,
}

impl PushEvent {
    pub fn new(event_type: EventType, order_id: OrderId, data: Option<Order>) -> Self {
        Self {
            event_type,
            order_id,
            data,
        }
    }

    pub fn action(&self) -> PushAction {
        match self.event_type {
            t if t.is_full_replace() => match &self.data {
                Some(order) => PushAction::Replace(order.clone()),
                None => PushAction::Refetch(self.order_id),
            },
            t if t.is_partial() => PushAction::Refetch(self.order_id),
            _ => PushAction::Ignore,
        }
    }

    /// The order left the working set and should no longer be in focus.
    pub fn ends_order(&self) -> bool {
        matches!(
            self.event_type,
            EventType::OrderFinalized | EventType::OrderCanceled
        )
    }
}

/// A push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Order(OrderId),
    SubOrder(u64),
    Unit(u64),
    Kitchen(u64),
    /// Role-scoped broadcast, e.g. `/topic/gerente`
    Role(String),
}

const TOPIC_PREFIX: &str = "/topic/";

impl Topic {
    pub fn path(&self) -> String {
        self.to_string()
    }

    pub fn parse(path: &str) -> Option<Topic> {
        let rest = path.strip_prefix(TOPIC_PREFIX)?;
        let segments: Vec<&str> = rest.split('/').collect();

        match segments.as_slice() {
            ["pedido", id] => id.parse().ok().map(Topic::Order),
            ["subpedido", id] => id.parse().ok().map(Topic::SubOrder),
            ["atendente", "unidade", id] => id.parse().ok().map(Topic::Unit),
            ["cozinha", id] => id.parse().ok().map(Topic::Kitchen),
            [role] if !role.is_empty() => Some(Topic::Role((*role).to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Order(id) => write!(f, "{TOPIC_PREFIX}pedido/{id}"),
            Topic::SubOrder(id) => write!(f, "{TOPIC_PREFIX}subpedido/{id}"),
            Topic::Unit(id) => write!(f, "{TOPIC_PREFIX}atendente/unidade/{id}"),
            Topic::Kitchen(id) => write!(f, "{TOPIC_PREFIX}cozinha/{id}"),
            Topic::Role(role) => write!(f, "{TOPIC_PREFIX}{role}"),
        }
    }
}
