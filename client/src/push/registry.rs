//! Topic subscription registry.
//!
//! Tracks who listens on which push topic and fans incoming envelopes out
//! to them.

use std::sync::Arc;

use comanda_engine::{PushEvent, Topic};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Identifier of one subscription.
pub type SubscriptionId = String;

/// Receiving end handed to a subscriber.
pub type EventReceiver = mpsc::UnboundedReceiver<PushEvent>;

/// A single subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    sender: mpsc::UnboundedSender<PushEvent>,
}

/// Thread-safe registry of topic subscriptions, shared via `Arc`.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    /// Subscription ids by topic path
    by_topic: DashMap<String, Vec<SubscriptionId>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribe to a topic.
    pub fn subscribe(&self, topic: Topic) -> (SubscriptionId, EventReceiver) {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        let path = topic.path();

        self.subscriptions.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                topic,
                sender,
            },
        );
        self.by_topic.entry(path.clone()).or_default().push(id.clone());

        tracing::info!(subscription = %id, topic = %path, "Subscribed");
        (id, receiver)
    }

    /// Drop a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let Some((_, subscription)) = self.subscriptions.remove(id) else {
            return false;
        };

        let path = subscription.topic.path();
        if let Some(mut ids) = self.by_topic.get_mut(&path) {
            ids.retain(|sub| sub != id);
            if ids.is_empty() {
                drop(ids);
                self.by_topic.remove(&path);
            }
        }

        tracing::info!(subscription = %id, topic = %path, "Unsubscribed");
        true
    }

    /// Deliver an envelope to every subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn deliver(&self, topic: &str, event: &PushEvent) -> usize {
        let ids = match self.by_topic.get(topic) {
            Some(ids) => ids.clone(),
            None => {
                tracing::debug!(topic, "No subscribers for topic");
                return 0;
            }
        };

        let delivered = ids
            .iter()
            .filter_map(|id| self.subscriptions.get(id))
            .filter(|sub| sub.sender.send(event.clone()).is_ok())
            .count();

        tracing::debug!(topic, recipients = delivered, "Delivered push event");
        delivered
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn topic_count(&self) -> usize {
        self.by_topic.len()
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.by_topic
            .iter()
            .filter_map(|entry| Topic::parse(entry.key()))
            .collect()
    }
}
