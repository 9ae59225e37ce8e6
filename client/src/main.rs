//! comanda-sync - keeps a local view of active orders in sync.
//!
//! Loads the active orders, then reads push envelopes as newline delimited
//! JSON (`{"topic": "/topic/pedido/1", "event": {...}}`) from stdin and
//! reconciles them into the cache. Exits on EOF.

use comanda_client::{ClientConfig, Comanda, TopicMessage};
use comanda_engine::Topic;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comanda_client=debug,comanda_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;

    tracing::info!("Starting comanda-sync against {}", config.api_url);

    let (client, mut dropped) = Comanda::new(config)?;
    tokio::spawn(async move {
        while let Some(op) = dropped.recv().await {
            tracing::error!(id = op.id, kind = ?op.kind, "Operation dropped: {}", op.error.user_message());
        }
    });

    match client.store.fetch_active().await {
        Ok(orders) => tracing::info!(count = orders.len(), "Loaded active orders"),
        Err(e) => tracing::warn!("Initial load failed: {}", e.user_message()),
    }
    let _gc = client.store.spawn_gc();

    // Wire push topics into the store
    let (bridge, handle) = client.bridge(256);
    let bridge_task = tokio::spawn(bridge.run());
    let mut subscriptions = Vec::new();
    let mut forwards = Vec::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: TopicMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Invalid push envelope: {}", e);
                continue;
            }
        };

        let Some(topic) = Topic::parse(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Unknown topic");
            continue;
        };
        if !client.topics.topics().contains(&topic) {
            let (id, events) = client.topics.subscribe(topic);
            subscriptions.push(id);
            forwards.push(handle.forward(events));
        }

        let delivered = client.topics.deliver(&message.topic, &message.event);
        tracing::debug!(topic = %message.topic, delivered, "Push delivered");
    }

    tracing::info!("Input closed, shutting down");
    for id in &subscriptions {
        client.topics.unsubscribe(id);
    }
    for forward in forwards {
        forward.await?;
    }
    drop(handle);
    bridge_task.await?;

    Ok(())
}
