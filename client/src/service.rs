//! Order service: local validation, then transport under the retry service.

use crate::error::Result;
use crate::retry::RetryService;
use crate::transport::{Fetched, HttpTransport, Page};
use comanda_engine::{
    validate, CloseOrder, ItemId, NewItem, NewOrder, Order, OrderId, OrderStatus, UnitId, Version,
};
use std::sync::Arc;

/// Validated, resilient access to the order endpoints.
///
/// Validation failures are returned before any request goes out and never
/// reach the retry service.
#[derive(Debug, Clone)]
pub struct OrderService {
    transport: HttpTransport,
    retry: Arc<RetryService>,
}

impl OrderService {
    pub fn new(transport: HttpTransport, retry: Arc<RetryService>) -> Self {
        Self { transport, retry }
    }

    pub fn retry(&self) -> &RetryService {
        &self.retry
    }

    pub async fn create(&self, order: NewOrder) -> Result<Order> {
        validate::new_order(&order)?;
        let order = order.normalized();

        let created = self
            .retry
            .run("create_order", || self.transport.create(&order))
            .await?;
        tracing::info!(order_id = created.id, number = %created.number, "Order created");
        Ok(created)
    }

    pub async fn get(&self, id: OrderId, etag: Option<&str>) -> Result<Fetched> {
        self.retry
            .run("get_order", || self.transport.get_order(id, etag))
            .await
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Order> {
        self.retry
            .run("get_order_by_number", || self.transport.get_by_number(number))
            .await
    }

    pub async fn get_by_status(&self, status: OrderStatus, page: u32, size: u32) -> Result<Page<Order>> {
        self.retry
            .run("get_orders_by_status", || {
                self.transport.get_by_status(status, page, size)
            })
            .await
    }

    pub async fn get_active(&self) -> Result<Vec<Order>> {
        self.retry
            .run("get_active_orders", || self.transport.get_active())
            .await
    }

    pub async fn get_by_unit(&self, unit_id: UnitId) -> Result<Vec<Order>> {
        self.retry
            .run("get_orders_by_unit", || self.transport.get_by_unit(unit_id))
            .await
    }

    pub async fn add_item(&self, id: OrderId, item: &NewItem, version: Option<Version>) -> Result<Order> {
        validate::new_item(item)?;
        self.retry
            .run("add_item", || self.transport.add_item(id, item, version))
            .await
    }

    pub async fn update_item_quantity(
        &self,
        id: OrderId,
        item_id: ItemId,
        quantity: u32,
        version: Option<Version>,
    ) -> Result<Order> {
        validate::quantity(quantity)?;
        self.retry
            .run("update_item_quantity", || {
                self.transport
                    .update_item_quantity(id, item_id, quantity, version)
            })
            .await
    }

    pub async fn remove_item(&self, id: OrderId, item_id: ItemId, version: Option<Version>) -> Result<Order> {
        self.retry
            .run("remove_item", || self.transport.remove_item(id, item_id, version))
            .await
    }

    /// Finalize an order. `current` is the latest known server copy; the
    /// business rules run against it before anything is sent. Sent once,
    /// without retry.
    pub async fn close(&self, current: Option<&Order>, id: OrderId, close: &CloseOrder) -> Result<Order> {
        validate::close(current, close)?;

        let closed = self
            .retry
            .run_once("close_order", || self.transport.close(id, close))
            .await?;
        tracing::info!(order_id = id, payment = ?close.payment_method, "Order closed");
        Ok(closed)
    }

    pub async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order> {
        validate::cancel_reason(reason)?;
        let reason = reason.trim();

        let canceled = self
            .retry
            .run("cancel_order", || self.transport.cancel(id, reason))
            .await?;
        tracing::info!(order_id = id, "Order canceled");
        Ok(canceled)
    }

    pub async fn change_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        self.retry
            .run("change_status", || self.transport.change_status(id, status))
            .await
    }

    pub async fn delta_since(&self, id: OrderId, version: Version) -> Result<serde_json::Value> {
        self.retry
            .run("delta_since", || self.transport.delta_since(id, version))
            .await
    }

    /// Keep-alive; a single attempt with the short ping timeout.
    pub async fn ping(&self, id: OrderId) -> Result<serde_json::Value> {
        self.retry
            .run_once("ping", || self.transport.ping(id))
            .await
    }
}
