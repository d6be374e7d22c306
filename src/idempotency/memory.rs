use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{namespaced, IdempotencyError, IdempotencyStore, Reservation};

struct Entry {
    token: String,
    expires_at: Instant,
}

/// Process-local reservations with the same expiry semantics as Redis.
pub struct MemoryIdempotencyStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryIdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_reserved(&self, key: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(&namespaced(key))
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn reserve_with_token(&self, key: &str, token: &str) -> Result<Reservation, IdempotencyError> {
        if key.is_empty() {
            return Err(IdempotencyError::EmptyKey);
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(&namespaced(key)) {
            if entry.expires_at > now {
                return Ok(Reservation::AlreadyExists);
            }
        }

        entries.insert(
            namespaced(key),
            Entry {
                token: token.to_string(),
                expires_at: now + self.ttl,
            },
        );
        Ok(Reservation::Reserved(token.to_string()))
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, IdempotencyError> {
        let mut entries = self.entries.lock().await;
        let name = namespaced(key);

        match entries.get(&name) {
            Some(entry) if entry.token == token => {
                entries.remove(&name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
