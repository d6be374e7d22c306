use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    producer::{FutureProducer, FutureRecord},
    config::ClientConfig,
};

use super::{EventPublisher, PublishError};
use crate::domain::order::LifecycleEvent;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

/// Kafka-compatible (Redpanda) producer for order lifecycle events.
pub struct RedpandaClient {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Arc<Metrics>>,
}

impl RedpandaClient {
    pub fn new(brokers: &str, topic: &str, message_timeout: Duration) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", message_timeout.as_millis().to_string())
            .create()?;

        // Configure circuit breaker for the broker
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,                    // Open after 5 failures
            open_timeout: Duration::from_secs(30),   // Wait 30s before probing
            success_threshold: 3,                    // Need 3 successes to close
        };

        tracing::info!(brokers = %brokers, topic = %topic, "Created Redpanda producer");

        Ok(Self {
            producer,
            topic: topic.to_string(),
            send_timeout: message_timeout,
            circuit_breaker: CircuitBreaker::new("broker", cb_config),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send(&self, key: &str, payload: &str) -> Result<(), PublishError> {
        // Use circuit breaker to protect against broker failures
        let result = self.circuit_breaker.call(async {
            let record = FutureRecord::to(&self.topic)
                .key(key)
                .payload(payload);

            self.producer
                .send(record, rdkafka::util::Timeout::After(self.send_timeout))
                .await
                .map_err(|(e, _)| PublishError::Kafka(e))?;

            Ok::<(), PublishError>(())
        }).await;

        if let Some(metrics) = &self.metrics {
            metrics.update_circuit_breaker_state(self.circuit_breaker.name(), self.get_circuit_breaker_state().await);
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    topic = %self.topic,
                    event_key = %key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen(name)) => {
                tracing::error!(
                    topic = %self.topic,
                    event_key = %key,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(PublishError::CircuitOpen(name))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    error = %e,
                    topic = %self.topic,
                    event_key = %key,
                    "Failed to publish to Redpanda"
                );
                Err(e)
            }
        }
    }

    pub async fn get_circuit_breaker_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}

#[async_trait]
impl EventPublisher for RedpandaClient {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), PublishError> {
        let payload = event.payload()?;
        let key = event.key();

        let result = self.send(&key, &payload).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(event.event_type.as_str(), result.is_ok());
        }
        result
    }
}
