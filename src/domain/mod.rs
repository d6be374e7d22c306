// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Order value objects, commands, events, errors and aggregate rules.
// Nothing in here performs I/O.
//
// ============================================================================

pub mod order;
