//! Order aggregate and line items.
//!
//! Orders are created by server responses only. The client never invents an
//! order; at most it decorates one with transient placeholder lines while an
//! optimistic edit is in flight (see [`crate::optimistic`]).

use crate::{Cents, FundId, ItemId, OrderId, ProductId, UnitId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    InProgress,
    Ready,
    Finalized,
    Canceled,
}

impl OrderStatus {
    /// Finalized and canceled orders never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Finalized | OrderStatus::Canceled)
    }

    /// Wire name, as used in URL paths.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Ready => "READY",
            OrderStatus::Finalized => "FINALIZED",
            OrderStatus::Canceled => "CANCELED",
        }
    }
}

/// Kitchen/fulfilment status of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    #[default]
    Pending,
    InPrep,
    Ready,
    Delivered,
    Canceled,
}

/// Where an order was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderOrigin {
    #[default]
    Counter,
    Qrcode,
    App,
    System,
}

/// How an order is settled when closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Debited from the consumption fund linked to the order.
    Prepaid,
    /// Settled later; restricted to managers on the server side.
    Postpaid,
    Cash,
    DebitCard,
    CreditCard,
    Pix,
    Courtesy,
}

/// One product-quantity entry within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: ItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_value: Cents,
    pub line_total: Cents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    /// Transient optimistic line not yet confirmed by the server.
    #[serde(skip)]
    pub placeholder: bool,
}

impl LineItem {
    /// Create a pending line with its total derived from quantity and price.
    pub fn new(
        id: ItemId,
        order_id: OrderId,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_value: Cents,
    ) -> Self {
        Self {
            id,
            order_id,
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_value,
            line_total: unit_value * Cents::from(quantity),
            note: None,
            status: ItemStatus::Pending,
            placeholder: false,
        }
    }

    /// `quantity × unit_value`, independent of the stored total.
    pub fn computed_total(&self) -> Cents {
        self.unit_value * Cents::from(self.quantity)
    }

    /// Change the quantity and keep the line total consistent.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.line_total = self.computed_total();
    }
}

/// The order aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    /// Sequential human readable number, e.g. "000123".
    pub number: String,
    pub unit_id: UnitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fund_id: Option<FundId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<u64>,
    pub status: OrderStatus,
    #[serde(default)]
    pub origin: OrderOrigin,
    pub total_value: Cents,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Aggregated figures over an order's lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Cents,
    pub quantity: u64,
    pub lines: usize,
}

impl Order {
    /// Create an empty order in `CREATED` state at version 1.
    pub fn new(
        id: OrderId,
        number: impl Into<String>,
        unit_id: UnitId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number: number.into(),
            unit_id,
            unit_reference: None,
            fund_id: None,
            customer_id: None,
            status: OrderStatus::Created,
            origin: OrderOrigin::Counter,
            total_value: 0,
            items: Vec::new(),
            note: None,
            payment_method: None,
            created_at,
            finalized_at: None,
            canceled_at: None,
            cancel_reason: None,
            version: 1,
            etag: None,
        }
    }

    /// Builder-style helper: append a line and add it to the total.
    pub fn with_item(mut self, item: LineItem) -> Self {
        self.total_value += item.line_total;
        self.items.push(item);
        self
    }

    pub fn item(&self, id: ItemId) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut LineItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Cache view membership: `CREATED` or `IN_PROGRESS`.
    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Created | OrderStatus::InProgress)
    }

    /// Not yet in a terminal state.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn can_add_items(&self) -> bool {
        self.is_active()
    }

    pub fn can_close(&self) -> bool {
        self.can_add_items() && !self.items.is_empty() && self.total_value > 0
    }

    pub fn can_cancel(&self) -> bool {
        !self.status.is_terminal()
    }

    /// `#000123` style display number.
    pub fn formatted_number(&self) -> String {
        if self.number.is_empty() {
            return String::new();
        }
        format!("#{:0>6}", self.number)
    }

    pub fn totals(&self) -> OrderTotals {
        self.items
            .iter()
            .fold(OrderTotals::default(), |acc, item| OrderTotals {
                subtotal: acc.subtotal + item.line_total,
                quantity: acc.quantity + u64::from(item.quantity),
                lines: acc.lines + 1,
            })
    }

    /// Whether any line is an unconfirmed optimistic placeholder.
    pub fn has_placeholders(&self) -> bool {
        self.items.iter().any(|i| i.placeholder)
    }
}
