// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order operations (throughput, latency, outcome)
// - Stock and pricing calls (latency by service and outcome)
// - Lifecycle event publishing
// - Relay retry attempts and outcomes
// - Dead Letter Queue statistics
// - Circuit breaker state per dependency
// - Actor health status
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Metrics
    pub orders_total: IntCounterVec,
    pub order_duration: HistogramVec,
    pub validation_failures: IntCounterVec,

    // Collaborator Metrics
    pub collaborator_duration: HistogramVec,

    // Publishing Metrics
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_event_type: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,

    // Actor Metrics
    pub actor_health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Order Metrics
        let orders_total = IntCounterVec::new(
            Opts::new("orders_total", "Order operations by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let order_duration = HistogramVec::new(
            HistogramOpts::new("order_operation_duration_seconds", "Order operation duration")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(order_duration.clone()))?;

        let validation_failures = IntCounterVec::new(
            Opts::new("order_validation_failures_total", "Orders rejected during validation"),
            &["reason"],
        )?;
        registry.register(Box::new(validation_failures.clone()))?;

        // Collaborator Metrics
        let collaborator_duration = HistogramVec::new(
            HistogramOpts::new("collaborator_call_duration_seconds", "Stock and pricing call duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["service", "outcome"],
        )?;
        registry.register(Box::new(collaborator_duration.clone()))?;

        // Publishing Metrics
        let events_published = IntCounterVec::new(
            Opts::new("order_events_published_total", "Lifecycle events written to the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("order_event_publish_failures_total", "Lifecycle events the broker rejected"),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Total successful retries"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages in dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_event_type = IntCounterVec::new(
            Opts::new("dlq_messages_by_event_type", "DLQ messages by event type"),
            &["event_type"],
        )?;
        registry.register(Box::new(dlq_messages_by_event_type.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["circuit"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        // Actor Metrics
        let actor_health_status = IntGauge::new(
            "actor_health_status",
            "System health status (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(actor_health_status.clone()))?;

        Ok(Self {
            registry,
            orders_total,
            order_duration,
            validation_failures,
            collaborator_duration,
            events_published,
            publish_failures,
            retry_attempts_total,
            retry_success,
            retry_failure,
            dlq_messages_total,
            dlq_messages_by_event_type,
            circuit_breaker_state,
            actor_health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.orders_total.with_label_values(&[operation, outcome]).inc();
        self.order_duration.with_label_values(&[operation]).observe(duration_secs);
    }

    pub fn record_validation_failure(&self, reason: &str) {
        self.validation_failures.with_label_values(&[reason]).inc();
    }

    pub fn record_collaborator_call(&self, service: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "ok" } else { "error" };
        self.collaborator_duration
            .with_label_values(&[service, outcome])
            .observe(duration_secs);
    }

    pub fn record_publish(&self, event_type: &str, success: bool) {
        if success {
            self.events_published.with_label_values(&[event_type]).inc();
        } else {
            self.publish_failures.with_label_values(&[event_type]).inc();
        }
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    /// Helper to record retry outcome
    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }

    /// Helper to record DLQ message
    pub fn record_dlq_message(&self, event_type: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_event_type.with_label_values(&[event_type]).inc();
    }

    pub fn update_circuit_breaker_state(&self, circuit: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[circuit])
            .set(state.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_order("create", "ok", 0.01);
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_order_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_order("create", "ok", 0.05);
        metrics.record_order("create", "validation", 0.01);
        metrics.record_order("create", "ok", 0.02);

        let gathered = metrics.registry.gather();
        let orders = gathered.iter().find(|m| m.name() == "orders_total").unwrap();
        assert_eq!(orders.metric.len(), 2); // Two different outcome labels
    }

    #[test]
    fn test_record_retry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_retry_attempt("order_event_publish", 1);
        metrics.record_retry_attempt("order_event_publish", 2);
        metrics.record_retry_outcome("order_event_publish", true);

        let gathered = metrics.registry.gather();
        let attempts = gathered.iter().find(|m| m.name() == "retry_attempts_total").unwrap();
        assert_eq!(attempts.metric.len(), 2); // Two different attempt labels
    }

    #[test]
    fn test_record_dlq_message() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("created");
        metrics.record_dlq_message("cancelled");

        let gathered = metrics.registry.gather();
        let dlq_total = gathered.iter().find(|m| m.name() == "dlq_messages_total").unwrap();
        assert_eq!(dlq_total.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state("broker", CircuitState::Closed);
        metrics.update_circuit_breaker_state("broker", CircuitState::Open);

        let gathered = metrics.registry.gather();
        let state = gathered.iter().find(|m| m.name() == "circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
