use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kameo::Actor;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use serde_json::json;

use crate::actors::core::{plain_reply, ComponentHealth, HealthCheckable, HealthStatus};
use crate::metrics::Metrics;

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Probe every registered component on a fixed interval
// - Aggregate system-wide health for the /health endpoint
//
// ============================================================================

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct GetSystemHealth;

/// Run every probe now instead of waiting for the next tick.
#[derive(Debug)]
pub struct ProbeNow;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

impl SystemHealth {
    pub fn to_json(&self) -> serde_json::Value {
        let components: serde_json::Map<String, serde_json::Value> = self
            .components
            .iter()
            .map(|(name, health)| (name.clone(), health.to_json()))
            .collect();

        json!({
            "status": self.overall_status.as_str(),
            "service": "order-orchestrator",
            "check_time": self.check_time.to_rfc3339(),
            "components": components,
        })
    }
}

plain_reply!(SystemHealth);

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    probes: Vec<Arc<dyn HealthCheckable>>,
    interval: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl HealthMonitorActor {
    pub fn new(probes: Vec<Arc<dyn HealthCheckable>>) -> Self {
        Self {
            components: HashMap::new(),
            probes,
            interval: DEFAULT_PROBE_INTERVAL,
            metrics: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }

    async fn probe_all(&mut self) {
        for probe in &self.probes {
            let health = probe.check_health().await;
            if !health.status.is_healthy() {
                tracing::warn!(component = %health.name, status = ?health.status, "Component not healthy");
            }
            self.components.insert(health.name.clone(), health);
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(
        state: Self::Args,
        actor_ref: ActorRef<Self>
    ) -> Result<Self, Self::Error> {
        tracing::info!(probes = state.probes.len(), "HealthMonitorActor started");

        let interval = state.interval;

        // Schedule periodic health checks
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                // Stop once the actor is gone.
                if actor_ref.tell(ProbeNow).send().await.is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<ProbeNow> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, _msg: ProbeNow, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.probe_all().await;
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let overall_status = self.compute_overall_status();

        if let Some(metrics) = &self.metrics {
            metrics.actor_health_status.set(overall_status.as_gauge());
        }

        SystemHealth {
            overall_status,
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}
