// ============================================================================
// Order Domain - Business Logic for the Order Aggregate
// ============================================================================
//
// Order types and rules:
// - Value objects (OrderItem, OrderStatus, TransitionPolicy)
// - Events (OrderCreatedEvent)
// - Commands (NewOrder, StatusUpdate, OrderFilter)
// - Errors (OrderError enum)
// - Aggregate (Order with the status state machine)
//
// Persistence lives in crate::ledger.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
