//! Mutation intents sent to the order API.
//!
//! Every change to an order is expressed as a [`Mutation`] rather than an
//! in-place edit. Intents can be validated locally, replayed after a conflict
//! and parked in the operation queue while the service is unreachable.

use crate::{
    error::Result, validate, ItemId, OrderId, OrderOrigin, OrderStatus, PaymentMethod, ProductId,
    UnitId,
};
use serde::{Deserialize, Serialize};

/// Coarse classification of mutations, used for queue bookkeeping and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    AddItem,
    UpdateItem,
    RemoveItem,
    Close,
    Cancel,
}

/// Payload for creating an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub unit_id: UnitId,
    /// Prepaid or postpaid settlement; the server resolves the fund.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<PaymentMethod>,
    #[serde(default)]
    pub items: Vec<NewItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OrderOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl NewOrder {
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            payment_type: None,
            items: Vec::new(),
            origin: None,
            note: None,
        }
    }

    pub fn with_item(mut self, item: NewItem) -> Self {
        self.items.push(item);
        self
    }

    /// Fill in server-side defaults: origin falls back to the counter.
    pub fn normalized(mut self) -> Self {
        self.origin = Some(self.origin.unwrap_or_default());
        self.note = self.note.filter(|n| !n.trim().is_empty());
        self
    }
}

/// Payload for adding a line to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl NewItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Payload for closing (finalizing) an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOrder {
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CloseOrder {
    pub fn new(payment_method: PaymentMethod) -> Self {
        Self {
            payment_method,
            note: None,
        }
    }
}

/// A mutating intent against the order API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    Create(NewOrder),
    #[serde(rename_all = "camelCase")]
    AddItem { order_id: OrderId, item: NewItem },
    #[serde(rename_all = "camelCase")]
    UpdateQuantity {
        order_id: OrderId,
        item_id: ItemId,
        quantity: u32,
    },
    #[serde(rename_all = "camelCase")]
    RemoveItem { order_id: OrderId, item_id: ItemId },
    #[serde(rename_all = "camelCase")]
    Close { order_id: OrderId, close: CloseOrder },
    #[serde(rename_all = "camelCase")]
    Cancel { order_id: OrderId, reason: String },
    #[serde(rename_all = "camelCase")]
    ChangeStatus {
        order_id: OrderId,
        status: OrderStatus,
    },
}

impl Mutation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Mutation::Create(_) => OperationKind::Create,
            Mutation::AddItem { .. } => OperationKind::AddItem,
            Mutation::UpdateQuantity { .. } | Mutation::ChangeStatus { .. } => {
                OperationKind::UpdateItem
            }
            Mutation::RemoveItem { .. } => OperationKind::RemoveItem,
            Mutation::Close { .. } => OperationKind::Close,
            Mutation::Cancel { .. } => OperationKind::Cancel,
        }
    }

    /// Target order, absent for creations.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Mutation::Create(_) => None,
            Mutation::AddItem { order_id, .. }
            | Mutation::UpdateQuantity { order_id, .. }
            | Mutation::RemoveItem { order_id, .. }
            | Mutation::Close { order_id, .. }
            | Mutation::Cancel { order_id, .. }
            | Mutation::ChangeStatus { order_id, .. } => Some(*order_id),
        }
    }

    /// Whether the server guards this mutation with the order version.
    pub fn is_version_guarded(&self) -> bool {
        matches!(
            self,
            Mutation::AddItem { .. } | Mutation::UpdateQuantity { .. } | Mutation::RemoveItem { .. }
        )
    }

    /// Critical mutations are never retried automatically.
    pub fn is_critical(&self) -> bool {
        matches!(self, Mutation::Close { .. })
    }

    /// Local precondition checks. Close needs the current server order and
    /// is validated separately with [`validate::close`].
    pub fn validate(&self) -> Result<()> {
        match self {
            Mutation::Create(new_order) => validate::new_order(new_order),
            Mutation::AddItem { item, .. } => validate::new_item(item),
            Mutation::UpdateQuantity { quantity, .. } => validate::quantity(*quantity),
            Mutation::Cancel { reason, .. } => validate::cancel_reason(reason),
            Mutation::RemoveItem { .. } | Mutation::Close { .. } | Mutation::ChangeStatus { .. } => {
                Ok(())
            }
        }
    }
}
