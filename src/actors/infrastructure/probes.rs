use async_trait::async_trait;

use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::clients::{HttpCollaborator, HttpPricingClient, HttpStockClient};
use crate::messaging::RedpandaClient;
use crate::store::ShardedOrderStore;
use crate::utils::CircuitState;

// ============================================================================
// Health probes for the components the orchestrator depends on
// ============================================================================

fn circuit_status(state: CircuitState) -> HealthStatus {
    match state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    }
}

#[async_trait]
impl HealthCheckable for RedpandaClient {
    async fn check_health(&self) -> ComponentHealth {
        let status = circuit_status(self.get_circuit_breaker_state().await);
        ComponentHealth::new(self.component_name(), status).with_details(format!("topic {}", self.topic()))
    }

    fn component_name(&self) -> &str {
        "redpanda"
    }
}

#[async_trait]
impl HealthCheckable for HttpCollaborator {
    async fn check_health(&self) -> ComponentHealth {
        ComponentHealth::new(self.component_name(), circuit_status(self.circuit_state().await))
    }

    fn component_name(&self) -> &str {
        self.name()
    }
}

#[async_trait]
impl HealthCheckable for HttpStockClient {
    async fn check_health(&self) -> ComponentHealth {
        self.collaborator().check_health().await
    }

    fn component_name(&self) -> &str {
        self.collaborator().component_name()
    }
}

#[async_trait]
impl HealthCheckable for HttpPricingClient {
    async fn check_health(&self) -> ComponentHealth {
        self.collaborator().check_health().await
    }

    fn component_name(&self) -> &str {
        self.collaborator().component_name()
    }
}

#[async_trait]
impl HealthCheckable for ShardedOrderStore {
    async fn check_health(&self) -> ComponentHealth {
        let shard_count = self.router().shard_count();
        let failures = self.unreachable_shards().await;

        let status = if failures.is_empty() {
            HealthStatus::Healthy
        } else {
            let reasons: Vec<String> = failures
                .iter()
                .map(|(shard, e)| format!("shard {shard}: {e}"))
                .collect();
            HealthStatus::Unhealthy(reasons.join("; "))
        };

        ComponentHealth::new(self.component_name(), status)
            .with_details(format!("{} of {shard_count} shards reachable", shard_count - failures.len()))
    }

    fn component_name(&self) -> &str {
        "order_shards"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fresh_collaborator_is_healthy() {
        let http = HttpCollaborator::new("pricing", "http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let health = http.check_health().await;

        assert_eq!(health.name, "pricing");
        assert!(health.status.is_healthy());
    }

    #[test]
    fn test_open_circuit_is_unhealthy() {
        assert!(circuit_status(CircuitState::Open).is_unhealthy());
        assert!(circuit_status(CircuitState::Closed).is_healthy());
    }
}
