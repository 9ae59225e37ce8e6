//! In-process mock of the order API.
//!
//! Versions every order, honours `If-Match` and `If-None-Match`, answers
//! stale writes with 409 and counts every request it receives.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header::{ETAG, IF_MATCH, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use comanda_client::{ClientConfig, Comanda};
use comanda_engine::{
    CloseOrder, LineItem, NewItem, NewOrder, Order, OrderId, OrderStatus, RetryPolicy,
};
use serde::Deserialize;
use serde_json::json;

/// Price of every product in the mock catalogue.
pub const UNIT_PRICE: i64 = 1_000;

#[derive(Default)]
pub struct Backend {
    orders: Mutex<HashMap<OrderId, Order>>,
    requests: AtomicUsize,
    /// Upcoming writes that lose a race against another user
    races: AtomicUsize,
    /// Artificial latency of `GET /pedidos/{id}`, applied after the read
    get_delay_ms: AtomicU64,
    next_id: AtomicU64,
}

impl Backend {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    pub fn lose_races(&self, count: usize) {
        self.races.store(count, Ordering::SeqCst);
    }

    pub fn set_get_delay(&self, delay: Duration) {
        self.get_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Apply a change as another user would.
    pub fn edit(&self, id: OrderId, f: impl FnOnce(&mut Order)) {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id).unwrap();
        f(order);
        order.version += 1;
    }

    fn hit(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn next_id(&self) -> u64 {
        1_000 + self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// An order with two lines at `version`.
pub fn sample_order(id: OrderId, version: u64) -> Order {
    let created = Utc.timestamp_opt(1_706_745_600, 0).unwrap();
    let mut order = Order::new(id, format!("{id:06}"), 5, created)
        .with_item(LineItem::new(10, id, 7, "Picanha", 2, 4_500))
        .with_item(LineItem::new(11, id, 8, "Caipirinha", 3, 1_800));
    order.version = version;
    order
}

pub fn empty_order(id: OrderId, version: u64) -> Order {
    let created = Utc.timestamp_opt(1_706_745_600, 0).unwrap();
    let mut order = Order::new(id, format!("{id:06}"), 5, created);
    order.version = version;
    order
}

/// Client settings tuned for tests: millisecond backoff.
pub fn test_config(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(format!("http://{addr}"));
    config.retry = RetryPolicy {
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..RetryPolicy::default()
    };
    config
}

pub async fn spawn_backend() -> (Arc<Backend>, SocketAddr) {
    let backend = Arc::new(Backend::default());

    let app = Router::new()
        .route("/pedidos", post(create_order))
        .route("/pedidos/ativos", get(active_orders))
        .route("/pedidos/{id}", get(get_order))
        .route("/pedidos/{id}/itens", post(add_item))
        .route("/pedidos/{id}/itens/{item_id}/quantidade", put(update_quantity))
        .route("/pedidos/{id}/fechar", put(close_order))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, addr)
}

pub fn build_client(config: ClientConfig) -> Comanda {
    let (client, _dropped) = Comanda::new(config).unwrap();
    client
}

fn etag(order: &Order) -> String {
    format!("\"v{}\"", order.version)
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Pedido não encontrado" })),
    )
        .into_response()
}

fn conflict(current: u64) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({ "message": "Versão desatualizada", "currentVersion": current })),
    )
        .into_response()
}

/// Lose a pending race, then compare `If-Match` with the current version.
fn check_version(backend: &Backend, order: &mut Order, headers: &HeaderMap) -> Result<(), Response> {
    let lost = backend
        .races
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if lost {
        order.version += 1;
    }

    let Some(expected) = headers.get(IF_MATCH).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    match expected.trim_matches('"').parse::<u64>() {
        Ok(v) if v == order.version => Ok(()),
        _ => Err(conflict(order.version)),
    }
}

fn recompute(order: &mut Order) {
    order.total_value = order.items.iter().map(|i| i.line_total).sum();
}

async fn get_order(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<OrderId>,
    headers: HeaderMap,
) -> Response {
    backend.hit();

    // Read first, answer late: a slow response carries the state it saw
    let order = backend.order(id);
    let delay = backend.get_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let Some(order) = order else {
        return not_found();
    };
    let tag = etag(&order);
    if headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) == Some(tag.as_str()) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    ([(ETAG, tag)], Json(order)).into_response()
}

async fn active_orders(State(backend): State<Arc<Backend>>) -> Json<Vec<Order>> {
    backend.hit();
    let orders = backend.orders.lock().unwrap();
    let mut active: Vec<Order> = orders.values().filter(|o| o.is_active()).cloned().collect();
    active.sort_by_key(|o| o.id);
    Json(active)
}

async fn create_order(State(backend): State<Arc<Backend>>, Json(new): Json<NewOrder>) -> Response {
    backend.hit();

    let id = backend.next_id();
    let created = Utc.timestamp_opt(1_706_745_600, 0).unwrap();
    let mut order = Order::new(id, format!("{id:06}"), new.unit_id, created);
    order.origin = new.origin.unwrap_or_default();
    order.note = new.note;
    for item in new.items {
        let line = LineItem::new(
            backend.next_id(),
            id,
            item.product_id,
            format!("Produto {}", item.product_id),
            item.quantity,
            UNIT_PRICE,
        );
        order.items.push(line);
    }
    recompute(&mut order);

    backend.insert(order.clone());
    (StatusCode::CREATED, Json(order)).into_response()
}

async fn add_item(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<OrderId>,
    headers: HeaderMap,
    Json(item): Json<NewItem>,
) -> Response {
    backend.hit();

    let item_id = backend.next_id();
    let mut orders = backend.orders.lock().unwrap();
    let Some(order) = orders.get_mut(&id) else {
        return not_found();
    };
    if let Err(response) = check_version(&backend, order, &headers) {
        return response;
    }

    let mut line = LineItem::new(
        item_id,
        id,
        item.product_id,
        format!("Produto {}", item.product_id),
        item.quantity,
        UNIT_PRICE,
    );
    line.note = item.note;
    order.items.push(line);
    order.status = OrderStatus::InProgress;
    recompute(order);
    order.version += 1;

    Json(order.clone()).into_response()
}

#[derive(Deserialize)]
struct QuantityBody {
    quantity: u32,
}

async fn update_quantity(
    State(backend): State<Arc<Backend>>,
    Path((id, item_id)): Path<(OrderId, u64)>,
    headers: HeaderMap,
    Json(body): Json<QuantityBody>,
) -> Response {
    backend.hit();

    let mut orders = backend.orders.lock().unwrap();
    let Some(order) = orders.get_mut(&id) else {
        return not_found();
    };
    if let Err(response) = check_version(&backend, order, &headers) {
        return response;
    }
    let Some(item) = order.item_mut(item_id) else {
        return not_found();
    };

    item.set_quantity(body.quantity);
    recompute(order);
    order.version += 1;

    Json(order.clone()).into_response()
}

async fn close_order(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<OrderId>,
    Json(close): Json<CloseOrder>,
) -> Response {
    backend.hit();

    let mut orders = backend.orders.lock().unwrap();
    let Some(order) = orders.get_mut(&id) else {
        return not_found();
    };
    order.status = OrderStatus::Finalized;
    order.payment_method = Some(close.payment_method);
    order.finalized_at = Some(Utc::now());
    order.version += 1;

    Json(order.clone()).into_response()
}
