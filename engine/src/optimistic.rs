//! Speculative local edits with explicit confirm or rollback.
//!
//! An [`OptimisticEdit`] captures the order before any change. The UI can
//! show the speculative copy right away; once the server answers the edit is
//! either committed (the server's order replaces everything) or rolled back
//! to the captured copy. Neither path ever merges partial state.

use crate::{Cents, ItemId, LineItem, Order, ProductId};

/// Temporary ids for unconfirmed lines start here; the server never issues
/// ids this large.
pub const PLACEHOLDER_ID_BASE: ItemId = u64::MAX / 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome<E> {
    Confirmed(Order),
    RolledBack { restored: Order, error: E },
}

impl<E> EditOutcome<E> {
    /// The order to display after the edit settled.
    pub fn order(&self) -> &Order {
        match self {
            EditOutcome::Confirmed(order) => order,
            EditOutcome::RolledBack { restored, .. } => restored,
        }
    }

    pub fn into_result(self) -> Result<Order, E> {
        match self {
            EditOutcome::Confirmed(order) => Ok(order),
            EditOutcome::RolledBack { error, .. } => Err(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimisticEdit {
    original: Order,
    speculative: Order,
    next_placeholder: ItemId,
}

impl OptimisticEdit {
    pub fn begin(order: &Order) -> Self {
        Self {
            original: order.clone(),
            speculative: order.clone(),
            next_placeholder: PLACEHOLDER_ID_BASE,
        }
    }

    /// The state to display while the request is in flight.
    pub fn speculative(&self) -> &Order {
        &self.speculative
    }

    pub fn original(&self) -> &Order {
        &self.original
    }

    /// Add an unconfirmed line; returns its temporary id.
    pub fn add_placeholder_item(
        &mut self,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_value: Cents,
    ) -> ItemId {
        let id = self.next_placeholder;
        self.next_placeholder += 1;

        let mut item = LineItem::new(
            id,
            self.speculative.id,
            product_id,
            product_name,
            quantity,
            unit_value,
        );
        item.placeholder = true;
        self.speculative.total_value += item.line_total;
        self.speculative.items.push(item);
        id
    }

    /// Returns false when the item is unknown.
    pub fn set_quantity(&mut self, item_id: ItemId, quantity: u32) -> bool {
        let Some(item) = self.speculative.item_mut(item_id) else {
            return false;
        };
        let before = item.line_total;
        item.set_quantity(quantity);
        let delta = item.line_total - before;
        self.speculative.total_value += delta;
        true
    }

    /// Returns false when the item is unknown.
    pub fn remove_item(&mut self, item_id: ItemId) -> bool {
        let Some(pos) = self.speculative.items.iter().position(|i| i.id == item_id) else {
            return false;
        };
        let removed = self.speculative.items.remove(pos);
        self.speculative.total_value -= removed.line_total;
        true
    }

    /// The server accepted the change; its order is authoritative.
    pub fn commit(self, confirmed: Order) -> Order {
        confirmed
    }

    /// The server rejected the change; restore the captured order.
    pub fn rollback(self) -> Order {
        self.original
    }

    /// Settle the edit from the server's answer.
    pub fn settle<E>(self, result: Result<Order, E>) -> EditOutcome<E> {
        match result {
            Ok(confirmed) => EditOutcome::Confirmed(self.commit(confirmed)),
            Err(error) => EditOutcome::RolledBack {
                restored: self.rollback(),
                error,
            },
        }
    }
}
