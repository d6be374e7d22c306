// ============================================================================
// Sharded Order Store
// ============================================================================
//
// Transactional persistence of orders and their line items. Every order
// lives on exactly one shard, chosen from its owning user when created and
// recovered from its identifier afterwards. No operation ever spans shards.
//
// Backends:
// - postgres: one sqlx pool per shard (production)
// - memory:   in-process shards with the same transactional contract
//
// ============================================================================

mod memory;
mod postgres;
pub mod schema;

pub use memory::{MemoryOrderStore, StoreFaults};
pub use postgres::ShardedOrderStore;

use async_trait::async_trait;

use crate::domain::order::{NewOrder, Order, OrderStatus};
use crate::messaging::DeadLetter;
use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(i64),

    #[error("idempotency key '{0}' already persisted")]
    DuplicateKey(String),

    #[error("order {0} was modified concurrently")]
    Conflict(i64),

    #[error("order {order_id} is owned by user {user_id} on another shard")]
    ShardMismatch { order_id: i64, user_id: i64 },

    #[error("shard {0} has exhausted its identifier range")]
    IdSpaceExhausted(usize),

    #[error("corrupt row for order {order_id}: {reason}")]
    Corrupt { order_id: i64, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StoreError::Backend(_) | StoreError::Conflict(_) => true,
            _ => false,
        }
    }
}

/// Transactional CRUD over the shard that owns each order.
///
/// Each method is a single transaction on a single shard: it either commits
/// completely or leaves no trace.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert the order row and all of its line items on the user's shard.
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    /// Rewrite the order row and replace its line items, provided the stored
    /// status still equals `expected_status`.
    async fn update_order(&self, order: &Order, expected_status: OrderStatus) -> Result<(), StoreError>;

    /// Delete the line items, then the order row.
    async fn delete_order(&self, order_id: i64) -> Result<(), StoreError>;

    /// Move the order from `from` to `to`; fails with `Conflict` if the stored
    /// status is no longer `from`.
    async fn update_status(
        &self,
        order_id: i64,
        user_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<(), StoreError>;

    async fn get_by_id(&self, order_id: i64) -> Result<Order, StoreError>;
}

/// Durable home for events that exhausted redelivery. Writes are upserts
/// keyed by the letter id, so repeating one is harmless.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError>;
}
