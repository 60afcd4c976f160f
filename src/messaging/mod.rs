// ============================================================================
// Messaging - event bus publishing, consuming and the outbox relay
// ============================================================================
//
// Delivery is at-least-once end to end:
// - producers may publish the same OrderCreated event more than once
//   (outbox relay retries, inline publish after a timeout)
// - the consumer dedupes on `order_id` before running its handler
//
// ============================================================================

mod consumer;
mod dedup;
mod dlq;
mod kafka;
mod memory;
mod outbox_relay;

pub use consumer::{ConsumeOutcome, ConsumerError, EventConsumer, HandlerError, LoggingOrderHandler, OrderCreatedHandler};
pub use dedup::{InMemoryProcessedEvents, ProcessedEvents, ProcessedEventsError, RedisProcessedEvents};
pub use dlq::{DeadLetter, DeadLetterQueue, InMemoryDeadLetterQueue, PostgresDeadLetterQueue};
pub use kafka::{KafkaEventConsumer, KafkaEventPublisher};
pub use memory::{PublishedMessage, RecordingPublisher};
pub use outbox_relay::{OutboxRelay, OutboxRelayConfig, RelayStats};

use async_trait::async_trait;

use crate::domain::order::OrderCreatedEvent;
use crate::utils::IsTransient;

/// Default subject for order creation events.
pub const ORDER_CREATED_TOPIC: &str = "order.created";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event bus circuit breaker is open")]
    CircuitOpen,

    #[error("broker rejected message: {0}")]
    Broker(String),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IsTransient for PublishError {
    fn is_transient(&self) -> bool {
        !matches!(self, PublishError::Serialization(_))
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an already-serialized payload, keyed for partitioning.
    async fn publish_raw(&self, subject: &str, key: &str, payload: &str) -> Result<(), PublishError>;

    /// Serialize and publish an OrderCreated event keyed by its order id.
    async fn publish(&self, subject: &str, event: &OrderCreatedEvent) -> Result<(), PublishError> {
        let payload = event.to_payload()?;
        self.publish_raw(subject, &event.order_id.to_string(), &payload).await
    }
}
