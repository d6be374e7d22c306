use serde::{Deserialize, Serialize};
use std::fmt;

use super::value_objects::Order;

// ============================================================================
// Order Lifecycle Events
// ============================================================================
//
// One message per committed change, keyed `order-<type>-<order id>` and
// carrying the full order (line items included) as JSON. Delivery is
// at-least-once, so consumers dedupe on (key, order id).
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderEventType {
    Created,
    Updated,
    Cancelled,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::Created => "created",
            OrderEventType::Updated => "updated",
            OrderEventType::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_type: OrderEventType,
    pub order: Order,
}

impl LifecycleEvent {
    pub fn new(event_type: OrderEventType, order: Order) -> Self {
        Self { event_type, order }
    }

    /// Message key: `order-created-1000001`.
    pub fn key(&self) -> String {
        format!("order-{}-{}", self.event_type, self.order.id)
    }

    pub fn payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.order)
    }
}
