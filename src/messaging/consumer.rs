use std::sync::Arc;

use async_trait::async_trait;

use super::dedup::{ProcessedEvents, ProcessedEventsError};
use super::dlq::{DeadLetter, DeadLetterQueue};
use crate::domain::order::OrderCreatedEvent;
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};

// ============================================================================
// Event Consumer - OrderCreated processing with dedupe, retry and DLQ
// ============================================================================
//
// Per message:
// 1. decode; failures are poison and go straight to the DLQ
// 2. claim `order_id` in the processed-events store; already claimed means
//    a redelivery, which is acknowledged and skipped
// 3. run the handler, retrying transient failures with backoff
// 4. on final failure release the claim and dead-letter the message
//
// Every outcome above is "handled" from the broker's point of view; only
// infrastructure failures (dedupe store, DLQ) leave the message unacked.
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("transient handler failure: {0}")]
    Transient(String),

    #[error("handler rejected event: {0}")]
    Permanent(String),
}

impl IsTransient for HandlerError {
    fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

#[async_trait]
pub trait OrderCreatedHandler: Send + Sync {
    async fn handle_order_created(&self, event: &OrderCreatedEvent) -> Result<(), HandlerError>;
}

/// Default downstream handler for the binary: records that the order was seen.
#[derive(Debug, Default, Clone)]
pub struct LoggingOrderHandler;

#[async_trait]
impl OrderCreatedHandler for LoggingOrderHandler {
    async fn handle_order_created(&self, event: &OrderCreatedEvent) -> Result<(), HandlerError> {
        tracing::info!(
            order_id = %event.order_id,
            user_id = %event.user_id,
            total = %event.total,
            items = event.items.len(),
            created_at = %event.created_at,
            "📦 Processing created order"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Processed,
    Duplicate,
    DeadLettered,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("processed-events store failed: {0}")]
    Dedupe(#[from] ProcessedEventsError),

    #[error("failed to dead-letter message: {0}")]
    DeadLetter(anyhow::Error),
}

pub struct EventConsumer {
    handler: Arc<dyn OrderCreatedHandler>,
    processed: Option<Arc<dyn ProcessedEvents>>,
    dlq: Arc<dyn DeadLetterQueue>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl EventConsumer {
    pub fn new(
        handler: Arc<dyn OrderCreatedHandler>,
        processed: Arc<dyn ProcessedEvents>,
        dlq: Arc<dyn DeadLetterQueue>,
    ) -> Self {
        Self {
            handler,
            processed: Some(processed),
            dlq,
            retry: RetryConfig::for_handler(),
            metrics: None,
        }
    }

    /// No dedupe: every delivery runs the handler.
    pub fn without_dedupe(handler: Arc<dyn OrderCreatedHandler>, dlq: Arc<dyn DeadLetterQueue>) -> Self {
        Self {
            handler,
            processed: None,
            dlq,
            retry: RetryConfig::for_handler(),
            metrics: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn handle_message(&self, payload: &[u8]) -> Result<ConsumeOutcome, ConsumerError> {
        let event = match OrderCreatedEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "Undecodable OrderCreated payload");
                self.dead_letter(None, String::from_utf8_lossy(payload).into_owned(), e.to_string(), 1)
                    .await?;
                self.record("poison");
                return Ok(ConsumeOutcome::DeadLettered);
            }
        };

        let key = event.order_id.to_string();
        if let Some(processed) = &self.processed {
            if !processed.try_claim(&key).await? {
                tracing::info!(order_id = %event.order_id, "⏭️  Skipping already processed event");
                self.record("duplicate");
                return Ok(ConsumeOutcome::Duplicate);
            }
        }

        tracing::debug!(order_id = %event.order_id, schema_version = event.schema_version, "Handling OrderCreated");

        let handler = &self.handler;
        let metrics = &self.metrics;
        let outcome = retry_on_transient(&self.retry, |attempt| {
            if attempt > 1 {
                if let Some(m) = metrics {
                    m.record_retry_attempt("order_created_handler");
                }
            }
            handler.handle_order_created(&event)
        })
        .await;

        let (error, attempts) = match outcome {
            RetryResult::Success(()) => {
                tracing::info!(order_id = %event.order_id, "✅ Processed OrderCreated");
                self.record("processed");
                return Ok(ConsumeOutcome::Processed);
            }
            RetryResult::Exhausted { error, attempts } | RetryResult::PermanentFailure { error, attempts } => {
                (error, attempts)
            }
        };

        if let Some(processed) = &self.processed {
            if let Err(e) = processed.release(&key).await {
                tracing::warn!(order_id = %event.order_id, error = %e, "Failed to release dedupe claim");
            }
        }

        // Original payload is kept verbatim for replay.
        let raw = String::from_utf8_lossy(payload).into_owned();
        self.dead_letter(Some(event.order_id), raw, error.to_string(), attempts as i32)
            .await?;
        self.record("failed");
        Ok(ConsumeOutcome::DeadLettered)
    }

    async fn dead_letter(
        &self,
        aggregate_id: Option<uuid::Uuid>,
        payload: String,
        error: String,
        failure_count: i32,
    ) -> Result<(), ConsumerError> {
        let message = DeadLetter::new(
            "consumer",
            OrderCreatedEvent::EVENT_TYPE,
            aggregate_id,
            payload,
            error,
            failure_count,
        );
        self.dlq.push(message).await.map_err(ConsumerError::DeadLetter)?;
        if let Some(m) = &self.metrics {
            m.record_dlq_message(OrderCreatedEvent::EVENT_TYPE, "consumer");
        }
        Ok(())
    }

    fn record(&self, outcome: &str) {
        if let Some(m) = &self.metrics {
            m.record_consumed(OrderCreatedEvent::EVENT_TYPE, outcome);
        }
    }
}
