use super::errors::OrderError;
use super::value_objects::{LineItem, LineItemRequest, NewOrder, Order, OrderStatus, PriceQuote};

// ============================================================================
// Order Aggregate Rules
// ============================================================================
//
// Aggregates (quantity, total, markup, discount) are always derived from the
// line items. Nothing here trusts totals supplied by a caller.
//
// ============================================================================

/// Tolerance used when comparing money sums.
pub const MONEY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Totals {
    pub quantity: i32,
    pub total: f64,
    pub total_mark_up: f64,
    pub total_discount: f64,
}

impl Totals {
    pub fn of(lines: &[LineItem]) -> Self {
        lines.iter().fold(Totals::default(), |acc, line| Totals {
            quantity: acc.quantity.saturating_add(line.quantity),
            total: acc.total + line.final_price,
            total_mark_up: acc.total_mark_up + line.mark_up,
            total_discount: acc.total_discount + line.discount,
        })
    }
}

impl LineItem {
    /// Price a requested line from a per-unit quote.
    pub fn priced(request: LineItemRequest, quote: &PriceQuote) -> Self {
        let quantity = f64::from(request.quantity);
        Self {
            product_id: request.product_id,
            quantity: request.quantity,
            mark_up: quantity * quote.markup,
            discount: quantity * quote.discount,
            final_price: quantity * quote.final_price,
        }
    }
}

/// Reject empty orders, non-positive quantities and quantity sums that do
/// not fit the order's `i32` total, before any network call.
pub fn validate_requests(items: &[LineItemRequest]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::validation(None, "order must contain at least one line item"));
    }

    for item in items {
        if item.quantity <= 0 {
            return Err(OrderError::validation(
                Some(item.product_id),
                format!("invalid quantity {}", item.quantity),
            ));
        }
    }

    total_quantity(items.iter().map(|item| item.quantity))?;
    Ok(())
}

/// Checks for caller-priced lines replacing those of an existing order.
pub fn validate_lines(lines: &[LineItem]) -> Result<(), OrderError> {
    let requests: Vec<LineItemRequest> = lines
        .iter()
        .map(|line| LineItemRequest {
            product_id: line.product_id,
            quantity: line.quantity,
        })
        .collect();
    validate_requests(&requests)?;

    for line in lines {
        let amounts = [
            ("mark_up", line.mark_up),
            ("discount", line.discount),
            ("final_price", line.final_price),
        ];
        for (field, value) in amounts {
            if !value.is_finite() || value < 0.0 {
                return Err(OrderError::validation(
                    Some(line.product_id),
                    format!("invalid {field} {value}"),
                ));
            }
        }
    }

    Ok(())
}

pub fn validate_idempotency_key(key: &str) -> Result<(), OrderError> {
    if key.trim().is_empty() {
        return Err(OrderError::validation(None, "idempotency key must not be empty"));
    }
    Ok(())
}

fn total_quantity(mut quantities: impl Iterator<Item = i32>) -> Result<i32, OrderError> {
    quantities
        .try_fold(0i32, |sum, quantity| sum.checked_add(quantity))
        .ok_or_else(|| OrderError::validation(None, "total quantity exceeds the supported maximum"))
}

impl NewOrder {
    pub fn new(user_id: i64, idempotency_key: impl Into<String>, line_items: Vec<LineItem>) -> Self {
        let totals = Totals::of(&line_items);
        Self {
            user_id,
            line_items,
            quantity: totals.quantity,
            total: totals.total,
            total_mark_up: totals.total_mark_up,
            total_discount: totals.total_discount,
            status: OrderStatus::Created,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn into_order(self, id: i64) -> Order {
        Order {
            id,
            user_id: self.user_id,
            line_items: self.line_items,
            quantity: self.quantity,
            total: self.total,
            total_mark_up: self.total_mark_up,
            total_discount: self.total_discount,
            status: self.status,
            idempotency_key: self.idempotency_key,
        }
    }
}

impl Order {
    /// Replace the line items and recompute every aggregate from them.
    pub fn replace_lines(&mut self, line_items: Vec<LineItem>) {
        let totals = Totals::of(&line_items);
        self.line_items = line_items;
        self.quantity = totals.quantity;
        self.total = totals.total;
        self.total_mark_up = totals.total_mark_up;
        self.total_discount = totals.total_discount;
    }

    pub fn totals_consistent(&self) -> bool {
        let expected = Totals::of(&self.line_items);
        expected.quantity == self.quantity
            && (expected.total - self.total).abs() < MONEY_EPSILON
            && (expected.total_mark_up - self.total_mark_up).abs() < MONEY_EPSILON
            && (expected.total_discount - self.total_discount).abs() < MONEY_EPSILON
    }

    /// Check that moving to `next` keeps status monotonic.
    pub fn ensure_transition(&self, next: OrderStatus) -> Result<(), OrderError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(OrderError::validation(
                None,
                format!("order {} cannot move from {} to {}", self.id, self.status, next),
            ))
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(product_id: i64, markup: f64, discount: f64, final_price: f64) -> PriceQuote {
        PriceQuote { product_id, markup, discount, final_price }
    }

    #[test]
    fn test_priced_line_multiplies_by_quantity() {
        let line = LineItem::priced(
            LineItemRequest { product_id: 1, quantity: 3 },
            &quote(1, 2.0, 1.0, 20.0),
        );

        assert_eq!(line.quantity, 3);
        assert!((line.final_price - 60.0).abs() < MONEY_EPSILON);
        assert!((line.mark_up - 6.0).abs() < MONEY_EPSILON);
        assert!((line.discount - 3.0).abs() < MONEY_EPSILON);
    }

    #[test]
    fn test_new_order_aggregates_lines() {
        let lines = vec![
            LineItem::priced(LineItemRequest { product_id: 1, quantity: 3 }, &quote(1, 2.0, 1.0, 20.0)),
            LineItem::priced(LineItemRequest { product_id: 2, quantity: 1 }, &quote(2, 5.0, 0.0, 50.0)),
        ];

        let order = NewOrder::new(7, "key", lines).into_order(1_000_001);

        assert_eq!(order.quantity, 4);
        assert!((order.total - 110.0).abs() < MONEY_EPSILON);
        assert!((order.total_mark_up - 11.0).abs() < MONEY_EPSILON);
        assert!((order.total_discount - 3.0).abs() < MONEY_EPSILON);
        assert_eq!(order.status, OrderStatus::Created);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_replace_lines_recomputes_totals() {
        let mut order = NewOrder::new(
            1,
            "key",
            vec![LineItem::priced(LineItemRequest { product_id: 1, quantity: 1 }, &quote(1, 1.0, 0.0, 10.0))],
        )
        .into_order(1_000_001);

        order.total = 999.0;
        assert!(!order.totals_consistent());

        order.replace_lines(vec![LineItem::priced(
            LineItemRequest { product_id: 4, quantity: 2 },
            &quote(4, 0.5, 0.25, 12.5),
        )]);

        assert_eq!(order.quantity, 2);
        assert!((order.total - 25.0).abs() < MONEY_EPSILON);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_validate_requests() {
        assert!(validate_requests(&[]).is_err());
        assert!(validate_requests(&[LineItemRequest { product_id: 1, quantity: 0 }]).is_err());
        assert!(validate_requests(&[LineItemRequest { product_id: 1, quantity: 2 }]).is_ok());
    }

    #[test]
    fn test_quantity_sum_overflow_is_rejected() {
        let items = [
            LineItemRequest { product_id: 1, quantity: i32::MAX },
            LineItemRequest { product_id: 2, quantity: 1 },
        ];

        assert!(matches!(validate_requests(&items), Err(OrderError::Validation { .. })));
        assert!(validate_requests(&items[..1]).is_ok());
    }

    #[test]
    fn test_validate_lines_rejects_bad_amounts() {
        let good = LineItem::priced(LineItemRequest { product_id: 1, quantity: 2 }, &quote(1, 1.0, 0.5, 10.0));
        assert!(validate_lines(&[good.clone()]).is_ok());

        let nan = LineItem { final_price: f64::NAN, ..good.clone() };
        let negative = LineItem { mark_up: -1.0, ..good.clone() };
        let infinite = LineItem { discount: f64::INFINITY, ..good };

        for line in [nan, negative, infinite] {
            assert!(matches!(
                validate_lines(&[line]),
                Err(OrderError::Validation { product_id: Some(1), .. })
            ));
        }
    }

    #[test]
    fn test_blank_idempotency_key_is_rejected() {
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("   ").is_err());
        assert!(validate_idempotency_key("key-1").is_ok());
    }

    #[test]
    fn test_ensure_transition_rejects_reopening() {
        let mut order = NewOrder::new(1, "key", vec![]).into_order(1_000_001);
        order.status = OrderStatus::Cancelled;

        assert!(order.ensure_transition(OrderStatus::Paid).is_err());
        assert!(order.ensure_transition(OrderStatus::Cancelled).is_ok());
    }
}
