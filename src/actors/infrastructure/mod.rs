// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Reusable infrastructure actors for system concerns:
// - Out-of-band redelivery of lifecycle events
// - Dead letter queue
// - Health monitoring
//
// ============================================================================

// Private module declarations
mod dlq;
mod health_monitor;
mod outbox_relay;
mod probes;

// Re-export for public API
pub use dlq::{AddToDlq, DlqActor, DlqMessages, DlqStats, GetDlqMessages, GetDlqStats};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, ProbeNow, SystemHealth};
pub use outbox_relay::{GetRelayStats, OutboxRelay, Redeliver, RelayStats};
