//! Local precondition checks.
//!
//! Everything here runs before a request leaves the process. A failure is
//! final: validation and business rule errors are never retried and never
//! count against the circuit breaker.

use crate::{
    error::Result,
    operation::{CloseOrder, NewItem, NewOrder},
    Error, Order, OrderOrigin, OrderStatus, PaymentMethod,
};

pub const MIN_QUANTITY: u32 = 1;
pub const MAX_QUANTITY: u32 = 999;
pub const MAX_NOTE_LEN: usize = 500;
pub const MIN_CANCEL_REASON_LEN: usize = 5;
pub const MAX_CANCEL_REASON_LEN: usize = 500;

/// Business rule identifiers reported by [`close`].
pub mod rules {
    pub const ORDER_NOT_FOUND: &str = "PEDIDO_NAO_ENCONTRADO";
    pub const ALREADY_FINALIZED: &str = "PEDIDO_JA_FINALIZADO";
    pub const ORDER_CANCELED: &str = "PEDIDO_CANCELADO";
    pub const EMPTY_ORDER: &str = "PEDIDO_VAZIO";
    pub const INVALID_TOTAL: &str = "VALOR_INVALIDO";
    pub const NO_FUND: &str = "FUNDO_NAO_ASSOCIADO";
}

pub fn new_order(order: &NewOrder) -> Result<()> {
    if order.unit_id == 0 {
        return Err(Error::validation(
            "unitId",
            "REQUIRED",
            "consumption unit is required",
        ));
    }

    if let Some(origin) = order.origin {
        if origin == OrderOrigin::System {
            return Err(Error::validation(
                "origin",
                "INVALID_VALUE",
                "origin must be COUNTER, QRCODE or APP",
            ));
        }
    }

    if let Some(note) = &order.note {
        self::note(note)?;
    }

    order.items.iter().try_for_each(new_item)
}

pub fn new_item(item: &NewItem) -> Result<()> {
    if item.product_id == 0 {
        return Err(Error::validation(
            "productId",
            "REQUIRED",
            "product is required",
        ));
    }

    quantity(item.quantity)?;

    match &item.note {
        Some(note) => self::note(note),
        None => Ok(()),
    }
}

pub fn quantity(quantity: u32) -> Result<()> {
    if quantity < MIN_QUANTITY {
        return Err(Error::validation(
            "quantity",
            "INVALID_VALUE",
            format!("quantity must be at least {MIN_QUANTITY}"),
        ));
    }
    if quantity > MAX_QUANTITY {
        return Err(Error::validation(
            "quantity",
            "MAX_EXCEEDED",
            format!("quantity cannot exceed {MAX_QUANTITY}"),
        ));
    }
    Ok(())
}

pub fn note(note: &str) -> Result<()> {
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(Error::validation(
            "note",
            "MAX_EXCEEDED",
            format!("note cannot exceed {MAX_NOTE_LEN} characters"),
        ));
    }
    Ok(())
}

pub fn cancel_reason(reason: &str) -> Result<()> {
    let len = reason.trim().chars().count();
    if len == 0 {
        return Err(Error::validation(
            "reason",
            "REQUIRED",
            "cancellation reason is required",
        ));
    }
    if len < MIN_CANCEL_REASON_LEN {
        return Err(Error::validation(
            "reason",
            "MIN_LENGTH",
            format!("cancellation reason needs at least {MIN_CANCEL_REASON_LEN} characters"),
        ));
    }
    if len > MAX_CANCEL_REASON_LEN {
        return Err(Error::validation(
            "reason",
            "MAX_EXCEEDED",
            format!("cancellation reason cannot exceed {MAX_CANCEL_REASON_LEN} characters"),
        ));
    }
    Ok(())
}

/// Check that `order` can be closed with the given payment.
///
/// `order` is the current server state; `None` means the server does not
/// know the order.
pub fn close(order: Option<&Order>, close: &CloseOrder) -> Result<()> {
    let order = order.ok_or_else(|| Error::business(rules::ORDER_NOT_FOUND, "order not found"))?;

    match order.status {
        OrderStatus::Finalized => {
            return Err(Error::business(
                rules::ALREADY_FINALIZED,
                "order is already finalized",
            ))
        }
        OrderStatus::Canceled => {
            return Err(Error::business(
                rules::ORDER_CANCELED,
                "canceled orders cannot be finalized",
            ))
        }
        _ => {}
    }

    if order.items.is_empty() {
        return Err(Error::business(
            rules::EMPTY_ORDER,
            "order without items cannot be finalized",
        ));
    }

    if order.total_value <= 0 {
        return Err(Error::business(
            rules::INVALID_TOTAL,
            "order total must be greater than zero",
        ));
    }

    if close.payment_method == PaymentMethod::Prepaid && order.fund_id.is_none() {
        return Err(Error::business(
            rules::NO_FUND,
            "prepaid orders need a linked consumption fund",
        ));
    }

    if let Some(note) = &close.note {
        self::note(note)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::fixtures::{at, order};

    fn code(result: Result<()>) -> &'static str {
        match result {
            Err(Error::Validation { code, .. }) => code,
            Err(Error::BusinessRule { rule, .. }) => rule,
            Ok(()) => "OK",
        }
    }

    #[test]
    fn quantity_bounds() {
        assert_eq!(code(quantity(0)), "INVALID_VALUE");
        assert_eq!(code(quantity(1)), "OK");
        assert_eq!(code(quantity(999)), "OK");
        assert_eq!(code(quantity(1000)), "MAX_EXCEEDED");
    }

    #[test]
    fn new_order_rules() {
        assert_eq!(code(new_order(&NewOrder::new(0))), "REQUIRED");

        let mut system = NewOrder::new(5);
        system.origin = Some(OrderOrigin::System);
        assert_eq!(code(new_order(&system)), "INVALID_VALUE");

        let with_bad_item = NewOrder::new(5).with_item(NewItem::new(7, 0));
        assert_eq!(code(new_order(&with_bad_item)), "INVALID_VALUE");

        assert_eq!(code(new_order(&NewOrder::new(5).with_item(NewItem::new(7, 2)))), "OK");
    }

    #[test]
    fn new_item_note_limit() {
        let item = NewItem::new(7, 1).with_note("x".repeat(MAX_NOTE_LEN + 1));
        assert_eq!(code(new_item(&item)), "MAX_EXCEEDED");
        assert_eq!(code(new_item(&NewItem::new(0, 1))), "REQUIRED");
    }

    #[test]
    fn cancel_reason_is_trimmed() {
        assert_eq!(code(cancel_reason("   ")), "REQUIRED");
        assert_eq!(code(cancel_reason("  abc  ")), "MIN_LENGTH");
        assert_eq!(code(cancel_reason("wrong table")), "OK");
        assert_eq!(code(cancel_reason(&"x".repeat(501))), "MAX_EXCEEDED");
    }

    #[test]
    fn close_rules_in_order() {
        let cash = CloseOrder::new(PaymentMethod::Cash);

        assert_eq!(code(close(None, &cash)), rules::ORDER_NOT_FOUND);

        let mut finalized = order(1, 2);
        finalized.status = OrderStatus::Finalized;
        assert_eq!(code(close(Some(&finalized), &cash)), rules::ALREADY_FINALIZED);

        let mut canceled = order(1, 2);
        canceled.status = OrderStatus::Canceled;
        assert_eq!(code(close(Some(&canceled), &cash)), rules::ORDER_CANCELED);

        let empty = Order::new(1, "1", 5, at(0));
        assert_eq!(code(close(Some(&empty), &cash)), rules::EMPTY_ORDER);

        let mut zero = order(1, 2);
        zero.total_value = 0;
        assert_eq!(code(close(Some(&zero), &cash)), rules::INVALID_TOTAL);

        let prepaid = CloseOrder::new(PaymentMethod::Prepaid);
        assert_eq!(code(close(Some(&order(1, 2)), &prepaid)), rules::NO_FUND);

        let mut funded = order(1, 2);
        funded.fund_id = Some(9);
        assert_eq!(code(close(Some(&funded), &prepaid)), "OK");
        assert_eq!(code(close(Some(&order(1, 2)), &cash)), "OK");
    }
}
