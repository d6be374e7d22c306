// ============================================================================
// Messaging - Order lifecycle event publishing
// ============================================================================
//
// Publishers emit one message per committed order change. A failed publish
// never reverts the change that produced it: the event is handed to the
// outbox relay for redelivery and, once retries are exhausted, recorded as a
// dead letter.
//
// ============================================================================

mod memory;
mod redpanda;

pub use memory::InMemoryPublisher;
pub use redpanda::RedpandaClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::order::{LifecycleEvent, OrderEventType};
use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker rejected message: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("circuit '{0}' is open")]
    CircuitOpen(&'static str),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl IsTransient for PublishError {
    fn is_transient(&self) -> bool {
        !matches!(self, PublishError::Serialize(_))
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), PublishError>;
}

/// An event that could not be delivered after every retry.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub order_id: i64,
    pub event_key: String,
    pub event_type: OrderEventType,
    pub payload: String,
    pub error_message: String,
    pub attempts: i32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        event: &LifecycleEvent,
        error: &PublishError,
        attempts: u32,
        first_failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            order_id: event.order.id,
            event_key: event.key(),
            event_type: event.event_type,
            // The order already serialized once when it was first published.
            payload: event.payload().unwrap_or_default(),
            error_message: error.to_string(),
            attempts: i32::try_from(attempts).unwrap_or(i32::MAX),
            first_failed_at,
            last_failed_at: Utc::now(),
        }
    }
}
