//! End-to-end order flows against the in-process mock API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use comanda_client::ClientError;
use comanda_engine::{
    CircuitState, CloseOrder, ConflictStrategy, EditOutcome, Mutation, NewItem, NewOrder, OrderStatus,
    PaymentMethod, ResolutionOutcome,
};
use common::{build_client, empty_order, sample_order, spawn_backend, test_config};

#[tokio::test]
async fn add_item_advances_version() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));

    let order = client.store.fetch_order(1, false).await.unwrap();
    assert_eq!(order.version, 3);
    assert_eq!(order.etag.as_deref(), Some("\"v3\""));

    let updated = client
        .store
        .add_item(1, NewItem::new(9, 2), Some(3))
        .await
        .unwrap();

    assert_eq!(updated.version, 4);
    assert_eq!(updated.items.len(), 3);
    assert_eq!(client.store.get(1).unwrap().version, 4);
    assert_eq!(client.store.base_version(1), Some(4));
    assert_eq!(backend.requests(), 2);
    assert!(!client.store.in_flight(1));
}

#[tokio::test]
async fn conflict_triggers_one_refetch_and_retry() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    // Another user saves first
    backend.lose_races(1);
    let updated = client
        .store
        .update_item_quantity(1, 10, 5, None)
        .await
        .unwrap();

    assert_eq!(updated.version, 5);
    assert_eq!(updated.item(10).unwrap().quantity, 5);
    // fetch, rejected PUT, refetch, accepted PUT
    assert_eq!(backend.requests(), 4);
    assert_eq!(client.store.get(1).unwrap().version, 5);
}

#[tokio::test]
async fn second_conflict_is_surfaced() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    backend.lose_races(2);
    let err = client
        .store
        .update_item_quantity(1, 10, 5, None)
        .await
        .unwrap_err();

    match err {
        ClientError::Conflict(info) => {
            assert_eq!(info.client_version, Some(4));
            assert_eq!(info.server_version, Some(5));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(backend.requests(), 4);
}

#[tokio::test]
async fn late_fetch_does_not_roll_back_a_newer_copy() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    backend.set_get_delay(Duration::from_millis(200));
    let client = build_client(test_config(addr));

    let (fetched, mutated) = tokio::join!(client.store.fetch_order(1, false), async {
        // Let the GET read v3 before the write lands
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.store.add_item(1, NewItem::new(9, 1), Some(3)).await
    });

    assert_eq!(mutated.unwrap().version, 4);
    assert_eq!(fetched.unwrap().version, 4);
    assert_eq!(client.store.get(1).unwrap().version, 4);
    assert_eq!(client.store.base_version(1), Some(4));
    assert_eq!(backend.order(1).unwrap().version, 4);
}

#[tokio::test]
async fn optimistic_quantity_change_is_confirmed() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    let outcome = client
        .store
        .update_item_quantity_optimistic(1, 10, 5)
        .await
        .unwrap();

    match outcome {
        EditOutcome::Confirmed(order) => {
            assert_eq!(order.version, 4);
            assert_eq!(order.item(10).unwrap().quantity, 5);
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert_eq!(client.store.get(1).unwrap().version, 4);
    assert_eq!(client.store.base_version(1), Some(4));
}

#[tokio::test]
async fn rejected_optimistic_change_rolls_back() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    let outcome = client
        .store
        .update_item_quantity_optimistic(1, 10, 0)
        .await
        .unwrap();

    match &outcome {
        EditOutcome::RolledBack { restored, error } => {
            assert_eq!(restored.item(10).unwrap().quantity, 2);
            assert!(matches!(error, ClientError::Engine(_)));
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    let cached = client.store.get(1).unwrap();
    assert_eq!(cached.item(10).unwrap().quantity, 2);
    assert_eq!(cached.total_value, sample_order(1, 3).total_value);
    assert_eq!(backend.requests(), 1);
}

#[tokio::test]
async fn closing_an_empty_order_never_reaches_the_server() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(empty_order(2, 1));
    let client = build_client(test_config(addr));
    client.store.fetch_order(2, false).await.unwrap();
    let before = backend.requests();

    let err = client
        .store
        .close(2, CloseOrder::new(PaymentMethod::Cash))
        .await
        .unwrap_err();

    match &err {
        ClientError::Engine(engine) => assert_eq!(engine.rule(), Some("PEDIDO_VAZIO")),
        other => panic!("expected business rule error, got {other:?}"),
    }
    assert_eq!(backend.requests(), before);
    assert_eq!(backend.order(2).unwrap().status, OrderStatus::Created);
}

#[tokio::test]
async fn closing_an_unknown_order_is_a_business_error() {
    let (_backend, addr) = spawn_backend().await;
    let client = build_client(test_config(addr));

    let err = client
        .store
        .close(99, CloseOrder::new(PaymentMethod::Pix))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Engine(ref e) if e.rule() == Some("PEDIDO_NAO_ENCONTRADO")
    ));
}

#[tokio::test]
async fn repeated_timeouts_open_the_circuit() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    backend.set_get_delay(Duration::from_millis(300));

    let mut config = test_config(addr);
    config.timeouts.read = Duration::from_millis(30);
    let client = build_client(config);

    for _ in 0..5 {
        let err = client.store.fetch_order(1, false).await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)), "{err:?}");
    }
    assert_eq!(
        client.service.retry().circuit_status().state,
        CircuitState::Open
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = backend.requests();
    assert_eq!(before, 15);

    let err = client.store.fetch_order(1, false).await.unwrap_err();
    assert!(matches!(err, ClientError::CircuitOpen { .. }));
    assert!(err.user_message().contains("temporarily unavailable"));
    assert_eq!(backend.requests(), before);
}

#[tokio::test]
async fn not_modified_serves_the_cached_copy() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));

    let first = client.store.fetch_order(1, false).await.unwrap();
    let second = client.store.fetch_order(1, true).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.requests(), 2);

    // Fresh entries are served without a request
    client.store.fetch_order(1, false).await.unwrap();
    assert_eq!(backend.requests(), 2);
}

#[tokio::test]
async fn create_focus_and_close() {
    let (backend, addr) = spawn_backend().await;
    let client = build_client(test_config(addr));

    let created = client
        .store
        .create(NewOrder::new(5).with_item(NewItem::new(3, 2)))
        .await
        .unwrap();
    assert_eq!(client.store.focused().map(|o| o.id), Some(created.id));
    assert_eq!(created.total_value, 2 * common::UNIT_PRICE);

    let closed = client
        .store
        .close(created.id, CloseOrder::new(PaymentMethod::Cash))
        .await
        .unwrap();
    assert_eq!(closed.status, OrderStatus::Finalized);
    assert!(client.store.focused().is_none());
    assert_eq!(client.store.active_count(), 0);
    // POST, PUT; the freshly created copy was served from cache
    assert_eq!(backend.requests(), 2);
}

#[tokio::test]
async fn invalid_input_is_rejected_locally() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));

    let err = client
        .store
        .add_item(1, NewItem::new(7, 0), Some(3))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Engine(_)));
    assert_eq!(backend.requests(), 0);
}

#[tokio::test]
async fn resolve_conflict_merges_with_the_server() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    let base = client.store.fetch_order(1, false).await.unwrap();

    let mut local = base.clone();
    local.note = Some("mesa da janela".into());
    backend.edit(1, |order| order.item_mut(11).unwrap().set_quantity(6));

    let resolution = client
        .store
        .resolve_conflict(&local, ConflictStrategy::AutoMerge)
        .await
        .unwrap();

    assert_eq!(resolution.outcome, ResolutionOutcome::MergedClean);
    let merged = resolution.resolved.unwrap();
    assert_eq!(merged.version, 4);
    assert_eq!(merged.note.as_deref(), Some("mesa da janela"));
    assert_eq!(merged.item(11).unwrap().quantity, 6);
    assert_eq!(client.store.get(1).unwrap().version, 4);
}

#[tokio::test]
async fn queued_mutations_reach_the_store() {
    let (backend, addr) = spawn_backend().await;
    backend.insert(sample_order(1, 3));
    let client = build_client(test_config(addr));
    client.store.fetch_order(1, false).await.unwrap();

    client.queue.enqueue_mutation(
        Arc::clone(&client.store),
        Mutation::AddItem {
            order_id: 1,
            item: NewItem::new(4, 1),
        },
        0,
    );

    let version = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.store.get(1) {
                Some(order) if order.version > 3 => break order.version,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(version, 4);
    assert_eq!(client.queue.size(), 0);
}
