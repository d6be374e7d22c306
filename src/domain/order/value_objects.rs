use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Order Value Objects
// ============================================================================

/// A priced, validated line of an order.
///
/// Money fields are line totals (unit value multiplied by `quantity`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LineItem {
    pub product_id: i64,
    pub quantity: i32,
    pub mark_up: f64,
    pub discount: f64,
    pub final_price: f64,
}

/// A line as submitted by the caller, before stock and pricing checks.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineItemRequest {
    pub product_id: i64,
    pub quantity: i32,
}

/// Per-unit price returned by the pricing collaborator.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct PriceQuote {
    pub product_id: i64,
    pub markup: f64,
    pub discount: f64,
    pub final_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// created -> {paid, cancelled}, paid -> {cancelled}; cancelled is terminal.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, _) | (Paid, Paid) | (Paid, Cancelled) | (Cancelled, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Persisted order, including its line items.
///
/// Serialized as the lifecycle event payload; field names follow the wire
/// format the downstream inventory consumer reads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "product_requests")]
    pub line_items: Vec<LineItem>,
    pub quantity: i32,
    pub total: f64,
    pub total_mark_up: f64,
    pub total_discount: f64,
    pub status: OrderStatus,
    pub idempotency_key: String,
}

/// An order that has passed validation but has no identifier yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub line_items: Vec<LineItem>,
    pub quantity: i32,
    pub total: f64,
    pub total_mark_up: f64,
    pub total_discount: f64,
    pub status: OrderStatus,
    pub idempotency_key: String,
}

// ============================================================================
// Unit Tests
// ============================================================================
