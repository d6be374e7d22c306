use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};

use super::{namespaced, IdempotencyError, IdempotencyStore, Reservation};

/// Delete the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisIdempotencyStore {
    conn: MultiplexedConnection,
    ttl: Duration,
    release_script: Script,
}

impl RedisIdempotencyStore {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, IdempotencyError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        tracing::info!(url = %url, ttl_secs = ttl.as_secs(), "Connected to Redis for idempotency keys");

        Ok(Self {
            conn,
            ttl,
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn reserve_with_token(&self, key: &str, token: &str) -> Result<Reservation, IdempotencyError> {
        if key.is_empty() {
            return Err(IdempotencyError::EmptyKey);
        }

        let mut conn = self.conn.clone();

        // SET NX replies OK when the key was written and nil when it exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(namespaced(key))
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(match reply {
            Some(_) => Reservation::Reserved(token.to_string()),
            None => Reservation::AlreadyExists,
        })
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, IdempotencyError> {
        let mut conn = self.conn.clone();

        let removed: i64 = self
            .release_script
            .key(namespaced(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }
}
