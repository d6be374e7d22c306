// ============================================================================
// Idempotency Store
// ============================================================================
//
// A client-supplied key may create at most one order. The key is reserved
// with a single atomic set-if-absent before any other work happens, so two
// concurrent requests carrying the same key can never both proceed.
//
// Each reservation carries a random token. Releasing requires the token, so
// a caller whose reservation expired cannot free a key that somebody else
// has since reserved.
//
// ============================================================================

mod memory;
mod redis;

pub use self::memory::MemoryIdempotencyStore;
pub use self::redis::RedisIdempotencyStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::utils::IsTransient;

/// Reservations outlive any realistic client retry window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub const KEY_PREFIX: &str = "idempotency-key";

pub fn namespaced(key: &str) -> String {
    format!("{KEY_PREFIX}:{key}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The caller now owns the key; keep the token to release it.
    Reserved(String),
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("idempotency key must not be empty")]
    EmptyKey,
}

impl IsTransient for IdempotencyError {
    fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            IdempotencyError::EmptyKey => false,
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserve `key` under a caller-chosen `token` if nobody
    /// holds it. Choosing the token up front lets a caller whose reserve
    /// call was abandoned still release whatever it may have written.
    async fn reserve_with_token(&self, key: &str, token: &str) -> Result<Reservation, IdempotencyError>;

    /// Atomically reserve `key` under a fresh token.
    async fn reserve(&self, key: &str) -> Result<Reservation, IdempotencyError> {
        self.reserve_with_token(key, &new_token()).await
    }

    /// Drop the reservation, but only if it still carries `token`.
    /// Returns whether anything was removed.
    async fn release(&self, key: &str, token: &str) -> Result<bool, IdempotencyError>;
}

pub fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
