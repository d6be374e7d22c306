// ============================================================================
// Order Domain - Business rules for orders
// ============================================================================
//
// - Value objects (Order, LineItem, OrderStatus, PriceQuote)
// - Commands (CreateOrder, UpdateOrder, CancelOrder)
// - Events (LifecycleEvent and its message key)
// - Errors (OrderError taxonomy)
// - Aggregate rules (totals, status transitions)
//
// The orchestration that drives these rules lives in crate::orchestrator.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
