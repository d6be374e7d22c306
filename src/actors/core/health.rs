use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

// ============================================================================
// Health Check Abstractions
// ============================================================================
//
// Anything the health monitor can probe: the broker, the collaborators and
// the order shards each report their own status.
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }

    /// Gauge encoding: 0=Unhealthy, 1=Degraded, 2=Healthy.
    pub fn as_gauge(&self) -> i64 {
        match self {
            HealthStatus::Unhealthy(_) => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => Some(reason),
        }
    }
}

/// Health information for a component
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "status": self.status.as_str(),
            "reason": self.status.reason(),
            "details": self.details,
            "last_check": self.last_check.to_rfc3339(),
        })
    }
}

/// Components that can report their health status
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    /// Get the current health status
    async fn check_health(&self) -> ComponentHealth;

    /// Get the component name
    fn component_name(&self) -> &str;
}
