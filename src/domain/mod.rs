// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Domain types and rules, independent of storage and transport.
//
// ============================================================================

pub mod order;
