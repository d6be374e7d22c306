// ============================================================================
// Order Orchestrator
// ============================================================================
//
// Creates, updates and cancels orders across sharded Postgres databases:
// - sharding:      user -> shard routing and per-shard id ranges
// - clients:       stock and pricing collaborators
// - idempotency:   one order per client key (Redis SET NX)
// - store:         transactional per-shard order persistence
// - messaging:     lifecycle events to Redpanda
// - orchestrator:  the request flow tying the above together
// - actors:        redelivery, dead letters and health (kameo)
//
// ============================================================================

pub mod actors;
pub mod clients;
pub mod config;
pub mod context;
pub mod domain;
pub mod idempotency;
pub mod messaging;
pub mod metrics;
pub mod orchestrator;
pub mod sharding;
pub mod store;
pub mod utils;

pub use config::Config;
pub use context::RequestContext;
pub use orchestrator::{OrderOrchestrator, OrderOutcome, PublishStatus};
