//! Bridge from the push channel into the order store.
//!
//! Events arrive on a bounded mailbox and are applied one at a time, so the
//! store sees pushed updates in delivery order.

use std::sync::Arc;

use comanda_engine::PushEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::registry::EventReceiver;
use crate::store::OrderStore;

/// Message consumed by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeMessage {
    Event(PushEvent),
    /// The push connection came back; missed updates must be refetched
    Reconnected,
    Disconnected,
}

/// Sending side of the bridge mailbox.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeMessage>,
}

impl BridgeHandle {
    /// Returns false once the bridge has stopped.
    pub async fn send_event(&self, event: PushEvent) -> bool {
        self.tx.send(BridgeMessage::Event(event)).await.is_ok()
    }

    pub async fn reconnected(&self) -> bool {
        self.tx.send(BridgeMessage::Reconnected).await.is_ok()
    }

    pub async fn disconnected(&self) -> bool {
        self.tx.send(BridgeMessage::Disconnected).await.is_ok()
    }

    /// Pipe a topic subscription into the bridge until either side closes.
    pub fn forward(&self, mut events: EventReceiver) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !handle.send_event(event).await {
                    break;
                }
            }
        })
    }
}

/// Applies push messages to the store.
#[derive(Debug)]
pub struct PushBridge {
    store: Arc<OrderStore>,
    rx: mpsc::Receiver<BridgeMessage>,
}

impl PushBridge {
    pub fn new(store: Arc<OrderStore>, capacity: usize) -> (Self, BridgeHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { store, rx }, BridgeHandle { tx })
    }

    /// Process messages until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            self.handle(message).await;
        }
        tracing::info!("Push bridge stopped");
    }

    async fn handle(&self, message: BridgeMessage) {
        match message {
            BridgeMessage::Event(event) => {
                match self.store.apply_push(&event).await {
                    Ok(()) => tracing::info!(
                        order_id = event.order_id,
                        cached = self.store.len(),
                        active = self.store.active_count(),
                        "Cache updated"
                    ),
                    Err(e) => tracing::warn!(
                        order_id = event.order_id,
                        event_type = ?event.event_type,
                        error = %e,
                        "Failed to apply push event"
                    ),
                }
            }
            BridgeMessage::Reconnected => {
                if let Err(e) = self.store.handle_reconnect().await {
                    tracing::warn!(error = %e, "Refresh after reconnect failed");
                }
            }
            BridgeMessage::Disconnected => {
                tracing::warn!("Push channel disconnected");
                self.store.set_connected(false);
            }
        }
    }
}
