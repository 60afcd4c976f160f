// ============================================================================
// Order Ledger - authoritative store of orders and their items
// ============================================================================
//
// Responsibilities:
// 1. Create an order and all of its items as one atomic unit
// 2. Read, filter and paginate orders
// 3. Apply status changes with compare-and-swap on `version`
// 4. Optionally write the OrderCreated event to the outbox in the same
//    transaction as the order (see crate::messaging::OutboxRelay)
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::{FailurePoint, InMemoryOrderLedger};
pub use postgres::PostgresOrderLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::order::{NewOrder, Order, OrderError, OrderFilter, StatusUpdate};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Rejected(#[from] OrderError),

    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("version conflict on order {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Uuid, expected: i64, actual: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored row is invalid: {0}")]
    InvalidRow(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Persist the order row and every item row, or nothing.
    async fn create(&self, new: NewOrder) -> Result<Order, LedgerError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Order, LedgerError>;

    /// Matching orders for the requested page (newest first) and the total
    /// number of matches across all pages.
    async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, i64), LedgerError>;

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Order, LedgerError>;

    /// Remove items, then the order, in one transaction.
    async fn delete(&self, id: Uuid) -> Result<(), LedgerError>;

    async fn exists(&self, id: Uuid) -> Result<bool, LedgerError>;
}

/// Pending event written alongside an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub topic: String,
    pub payload: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished, not dead-lettered messages first.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, LedgerError>;

    async fn mark_published(&self, id: Uuid) -> Result<(), LedgerError>;

    async fn record_failure(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), LedgerError>;

    /// Stop relaying a message that has been handed to the dead-letter queue.
    async fn mark_dead_lettered(&self, id: Uuid) -> Result<(), LedgerError>;
}

pub(crate) fn outbox_message_for(order: &Order, topic: &str) -> Result<OutboxMessage, LedgerError> {
    let event = order.created_event();
    Ok(OutboxMessage {
        id: Uuid::new_v4(),
        aggregate_id: order.id,
        event_type: crate::domain::order::OrderCreatedEvent::EVENT_TYPE.to_string(),
        topic: topic.to_string(),
        payload: event.to_payload()?,
        attempts: 0,
        last_error: None,
        created_at: order.created_at,
    })
}

/// Shared read-check-write logic for status updates. Returns the order as it
/// should be stored, or the reason it must not be.
pub(crate) fn plan_status_update(
    current: &Order,
    update: StatusUpdate,
    policy: crate::domain::order::TransitionPolicy,
) -> Result<Order, LedgerError> {
    if let Some(expected) = update.expected_version {
        if expected != current.version {
            return Err(LedgerError::VersionConflict {
                id: current.id,
                expected,
                actual: current.version,
            });
        }
    }

    let mut next = current.clone();
    next.transition(update.status, policy, Utc::now())?;
    Ok(next)
}
