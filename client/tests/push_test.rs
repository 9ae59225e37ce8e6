//! Push reconciliation through the topic registry and bridge.

mod common;

use comanda_engine::{EventType, OrderStatus, PushEvent, Topic};
use common::{build_client, sample_order, spawn_backend, test_config};

#[tokio::test]
async fn full_replace_updates_cache_without_request() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    let (bridge, handle) = client.bridge(8);
    let task = tokio::spawn(bridge.run());

    let mut pushed = sample_order(1, 4);
    pushed.status = OrderStatus::InProgress;
    assert!(
        handle
            .send_event(PushEvent::new(EventType::OrderUpdated, 1, Some(pushed)))
            .await
    );
    drop(handle);
    task.await.unwrap();

    let cached = client.store.get(1).unwrap();
    assert_eq!(cached.version, 4);
    assert_eq!(cached.status, OrderStatus::InProgress);
    assert_eq!(client.store.base_version(1), Some(4));
    assert!(client.store.sync_status().last_sync.is_some());
    assert_eq!(backend.requests(), 1);
}

#[tokio::test]
async fn outdated_push_is_ignored() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 6));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    let event = PushEvent::new(EventType::OrderUpdated, 1, Some(sample_order(1, 5)));
    client.store.apply_push(&event).await.unwrap();

    assert_eq!(client.store.get(1).unwrap().version, 6);
    assert_eq!(client.store.base_version(1), Some(6));
}

#[tokio::test]
async fn partial_event_refetches() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    backend.edit(1, |order| order.item_mut(10).unwrap().set_quantity(4));
    let event = PushEvent::new(EventType::ItemUpdated, 1, None);
    client.store.apply_push(&event).await.unwrap();

    let cached = client.store.get(1).unwrap();
    assert_eq!(cached.version, 4);
    assert_eq!(cached.item(10).unwrap().quantity, 4);
    assert_eq!(backend.requests(), 2);
}

#[tokio::test]
async fn finalized_event_clears_focus() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();
    client.store.set_focus(1);

    let mut finalized = sample_order(1, 4);
    finalized.status = OrderStatus::Finalized;
    let event = PushEvent::new(EventType::OrderFinalized, 1, Some(finalized));
    client.store.apply_push(&event).await.unwrap();

    assert!(client.store.focused().is_none());
    assert_eq!(client.store.active_count(), 0);
}

#[tokio::test]
async fn reconnect_refreshes_active_orders() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    backend.insert(sample_order(2, 1));
    let client = build_client(test_config(addr));

    let (bridge, handle) = client.bridge(8);
    let task = tokio::spawn(bridge.run());
    assert!(handle.disconnected().await);
    assert!(handle.reconnected().await);
    drop(handle);
    task.await.unwrap();

    assert_eq!(client.store.active_count(), 2);
    assert!(client.store.sync_status().connected);
    assert_eq!(backend.requests(), 1);
}

#[tokio::test]
async fn registry_forwards_into_bridge() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(7, 1));
    let client = build_client(test_config(addr));

    let (bridge, handle) = client.bridge(8);
    let task = tokio::spawn(bridge.run());

    let topic = Topic::Order(7);
    let (subscription, events) = client.topics.subscribe(topic.clone());
    let forward = handle.forward(events);

    let event = PushEvent::new(EventType::OrderCreated, 7, Some(sample_order(7, 1)));
    assert_eq!(client.topics.deliver(&topic.path(), &event), 1);
    assert_eq!(client.topics.deliver("/topic/pedido/8", &event), 0);

    client.topics.unsubscribe(&subscription);
    forward.await.unwrap();
    drop(handle);
    task.await.unwrap();

    assert_eq!(client.store.get(7).unwrap().version, 1);
    assert_eq!(backend.requests(), 0);
}
