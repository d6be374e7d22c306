// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for work that happens outside a request.
//
// Structure:
// - core/           - Abstract traits and types (HealthCheckable, replies)
// - infrastructure/ - Concrete infrastructure actors (Relay, DLQ, Health)
//
// Note: Order rules run in the orchestrator, NOT in actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

// Re-export only what's needed in the public API
pub use self::core::{ComponentHealth, HealthCheckable, HealthStatus};
pub use infrastructure::{
    AddToDlq,
    DlqActor,
    DlqMessages,
    DlqStats,
    GetDlqMessages,
    GetDlqStats,
    GetRelayStats,
    GetSystemHealth,
    HealthMonitorActor,
    OutboxRelay,
    ProbeNow,
    Redeliver,
    RelayStats,
    SystemHealth,
};
