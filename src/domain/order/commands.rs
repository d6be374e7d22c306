use serde::{Deserialize, Serialize};

use super::value_objects::{LineItem, LineItemRequest, OrderStatus};

// ============================================================================
// Order Commands - Represent caller intent
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    /// Client-supplied token; at most one order is ever created per key.
    pub idempotency_key: String,
    #[serde(rename = "product_requests")]
    pub line_items: Vec<LineItemRequest>,
}

/// Status change, optionally replacing the line items.
///
/// Lines can only be replaced while the order is still `created`; the
/// aggregates are recomputed from whatever lines end up on the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub order_id: i64,
    pub status: OrderStatus,
    #[serde(default, rename = "product_requests")]
    pub line_items: Option<Vec<LineItem>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: i64,
}
