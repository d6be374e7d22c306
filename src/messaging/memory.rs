use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{EventPublisher, PublishError};
use crate::domain::order::LifecycleEvent;

/// Records published events in order; can be told to fail the next N
/// publishes to exercise redelivery.
#[derive(Default)]
pub struct InMemoryPublisher {
    events: Mutex<Vec<(String, String)>>,
    failures_remaining: AtomicU32,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// `(key, payload)` of every delivered event, oldest first.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.events.lock().await.clone()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.events.lock().await.iter().map(|(key, _)| key.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), PublishError> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PublishError::Unavailable("injected publish failure".to_string()));
        }

        let payload = event.payload()?;
        let key = event.key();
        tracing::debug!(event_key = %key, "Recorded lifecycle event");
        self.events.lock().await.push((key, payload));
        Ok(())
    }
}
