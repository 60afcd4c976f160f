use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::dlq::{DeadLetter, DeadLetterQueue};
use super::{EventPublisher, PublishError};
use crate::ledger::{OutboxMessage, OutboxStore};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Outbox Relay - polls outbox_messages and publishes to the event bus
// ============================================================================
//
// 1. Fetch pending rows (unpublished, not dead-lettered), oldest first
// 2. Publish each with retry/backoff, keyed by aggregate id
// 3. Mark published on success
// 4. On a transient failure (broker error, open circuit) record the attempt,
//    leave the row pending and stop the batch; the next poll resumes from it
// 5. Copy to the DLQ and mark dead-lettered only on a permanent failure or
//    once `max_delivery_attempts` is spent
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub retry: RetryConfig,
    /// Attempts across polls before a transiently failing message is
    /// dead-lettered.
    pub max_delivery_attempts: i32,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            retry: RetryConfig::for_publish(),
            max_delivery_attempts: 100,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub published: usize,
    pub dead_lettered: usize,
    pub deferred: usize,
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    dlq: Arc<dyn DeadLetterQueue>,
    config: OutboxRelayConfig,
    metrics: Option<Arc<Metrics>>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        dlq: Arc<dyn DeadLetterQueue>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            dlq,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Poll until `shutdown` flips to `true`. A batch in progress is
    /// finished before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "🔄 Starting outbox relay"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Outbox relay poll failed");
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
        Ok(())
    }

    /// Relay one batch of pending messages.
    pub async fn run_once(&self) -> anyhow::Result<RelayStats> {
        let messages = self.store.fetch_pending(self.config.batch_size).await?;
        let mut stats = RelayStats::default();

        if messages.is_empty() {
            return Ok(stats);
        }
        tracing::info!(message_count = messages.len(), "📬 Fetched pending outbox messages");

        for (index, msg) in messages.iter().enumerate() {
            match self.publish(msg).await {
                RetryResult::Success(()) => {
                    self.store.mark_published(msg.id).await?;
                    stats.published += 1;
                    if let Some(m) = &self.metrics {
                        m.record_published(&msg.event_type, "outbox");
                    }
                    tracing::info!(
                        event_id = %msg.id,
                        aggregate_id = %msg.aggregate_id,
                        "✅ Relayed outbox message"
                    );
                }
                RetryResult::Exhausted { error, attempts } => {
                    let total_attempts = msg.attempts.saturating_add(attempts as i32);
                    if total_attempts >= self.config.max_delivery_attempts {
                        self.dead_letter(msg, &error, total_attempts).await?;
                        stats.dead_lettered += 1;
                        continue;
                    }

                    self.store.record_failure(msg.id, total_attempts, &error.to_string()).await?;
                    stats.deferred = messages.len() - index;
                    tracing::warn!(
                        event_id = %msg.id,
                        attempts = total_attempts,
                        deferred = stats.deferred,
                        error = %error,
                        "Event bus unavailable, deferring rest of batch"
                    );
                    break;
                }
                RetryResult::PermanentFailure { error, attempts } => {
                    self.dead_letter(msg, &error, msg.attempts.saturating_add(attempts as i32)).await?;
                    stats.dead_lettered += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn publish(&self, msg: &OutboxMessage) -> RetryResult<(), PublishError> {
        let key = msg.aggregate_id.to_string();
        let publisher = &self.publisher;
        let metrics = &self.metrics;

        retry_on_transient(&self.config.retry, |attempt| {
            if attempt > 1 {
                if let Some(m) = metrics {
                    m.record_retry_attempt("outbox_publish");
                }
            }
            publisher.publish_raw(&msg.topic, &key, &msg.payload)
        })
        .await
    }

    async fn dead_letter(&self, msg: &OutboxMessage, error: &PublishError, total_attempts: i32) -> anyhow::Result<()> {
        let reason = error.to_string();
        self.store.record_failure(msg.id, total_attempts, &reason).await?;

        let letter = DeadLetter::new(
            "outbox",
            &msg.event_type,
            Some(msg.aggregate_id),
            msg.payload.clone(),
            reason,
            total_attempts,
        )
        .first_failed_at(msg.created_at);
        self.dlq.push(letter).await?;
        self.store.mark_dead_lettered(msg.id).await?;

        if let Some(m) = &self.metrics {
            m.record_dlq_message(&msg.event_type, "outbox");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{NewOrder, NewOrderItem, OrderCreatedEvent};
    use crate::ledger::{InMemoryOrderLedger, OrderLedger};
    use crate::messaging::{InMemoryDeadLetterQueue, RecordingPublisher};
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: Arc<InMemoryOrderLedger>,
        publisher: Arc<RecordingPublisher>,
        dlq: Arc<InMemoryDeadLetterQueue>,
        relay: OutboxRelay,
    }

    fn config() -> OutboxRelayConfig {
        OutboxRelayConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
            max_delivery_attempts: 9,
        }
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryOrderLedger::default().with_outbox("order.created"));
        let publisher = Arc::new(RecordingPublisher::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let relay = OutboxRelay::new(ledger.clone(), publisher.clone(), dlq.clone(), config());
        Fixture {
            ledger,
            publisher,
            dlq,
            relay,
        }
    }

    /// Fails every publish with the error `make` builds.
    struct RefusingPublisher {
        make: fn() -> PublishError,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventPublisher for RefusingPublisher {
        async fn publish_raw(&self, _subject: &str, _key: &str, _payload: &str) -> Result<(), PublishError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err((self.make)())
        }
    }

    fn refusing(make: fn() -> PublishError) -> (Arc<InMemoryOrderLedger>, Arc<InMemoryDeadLetterQueue>, Arc<RefusingPublisher>, OutboxRelay) {
        let ledger = Arc::new(InMemoryOrderLedger::default().with_outbox("order.created"));
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let publisher = Arc::new(RefusingPublisher {
            make,
            calls: Default::default(),
        });
        let relay = OutboxRelay::new(ledger.clone(), publisher.clone(), dlq.clone(), config());
        (ledger, dlq, publisher, relay)
    }

    async fn place(ledger: &InMemoryOrderLedger, user: &str) -> uuid::Uuid {
        let new = NewOrder::new(user, vec![NewOrderItem::new("p1", "Gravel bike", Decimal::from(900), 1)]);
        ledger.create(new).await.unwrap().id
    }

    #[tokio::test]
    async fn test_relays_pending_messages_in_order() {
        let fx = fixture();
        let first = place(&fx.ledger, "u1").await;
        let second = place(&fx.ledger, "u2").await;

        let stats = fx.relay.run_once().await.unwrap();
        assert_eq!(stats.published, 2);

        let published = fx.publisher.published();
        assert_eq!(published[0].key, first.to_string());
        assert_eq!(published[1].key, second.to_string());
        assert_eq!(published[0].subject, "order.created");

        let event = OrderCreatedEvent::from_payload(published[0].payload.as_bytes()).unwrap();
        assert_eq!(event.order_id, first);

        // Nothing left to relay
        assert!(fx.ledger.fetch_pending(10).await.unwrap().is_empty());
        assert_eq!(fx.relay.run_once().await.unwrap(), RelayStats::default());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fx = fixture();
        place(&fx.ledger, "u1").await;
        fx.publisher.fail_next(2);

        let stats = fx.relay.run_once().await.unwrap();

        assert_eq!(stats.published, 1);
        assert_eq!(fx.publisher.attempts(), 3);
        assert!(fx.dlq.is_empty());
    }

    #[tokio::test]
    async fn test_broker_outage_keeps_message_pending() {
        let fx = fixture();
        let first = place(&fx.ledger, "u1").await;
        place(&fx.ledger, "u2").await;
        fx.publisher.set_failing(true);

        let stats = fx.relay.run_once().await.unwrap();
        assert_eq!(stats, RelayStats { published: 0, dead_lettered: 0, deferred: 2 });
        assert_eq!(fx.publisher.attempts(), 3);
        assert!(fx.dlq.is_empty());

        let pending = fx.ledger.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].aggregate_id, first);
        assert_eq!(pending[0].attempts, 3);
        assert_eq!(pending[0].last_error.as_deref(), Some("broker rejected message: broker unreachable"));

        // The bus comes back: the next poll delivers both, oldest first
        fx.publisher.set_failing(false);
        assert_eq!(fx.relay.run_once().await.unwrap().published, 2);
        assert_eq!(fx.publisher.published()[0].key, first.to_string());
        assert!(fx.dlq.is_empty());
    }

    #[tokio::test]
    async fn test_message_dead_lettered_after_delivery_budget() {
        let fx = fixture();
        let order_id = place(&fx.ledger, "u1").await;
        fx.publisher.set_failing(true);

        // 3 attempts per poll against a budget of 9
        for _ in 0..2 {
            assert_eq!(fx.relay.run_once().await.unwrap().deferred, 1);
        }
        let stats = fx.relay.run_once().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);

        let letters = fx.dlq.recent(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].aggregate_id, Some(order_id));
        assert_eq!(letters[0].failure_count, 9);
        assert_eq!(letters[0].source, "outbox");

        // Dead-lettered rows are not picked up again
        fx.publisher.set_failing(false);
        assert_eq!(fx.relay.run_once().await.unwrap().published, 0);
        assert_eq!(fx.dlq.len(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_defers_whole_batch() {
        let (ledger, dlq, publisher, relay) = refusing(|| PublishError::CircuitOpen);
        place(&ledger, "u1").await;
        place(&ledger, "u2").await;
        place(&ledger, "u3").await;

        let stats = relay.run_once().await.unwrap();

        assert_eq!(stats, RelayStats { published: 0, dead_lettered: 0, deferred: 3 });
        // Only the head of the batch was tried
        assert_eq!(publisher.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(dlq.is_empty());

        let pending = ledger.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].last_error.as_deref(), Some("event bus circuit breaker is open"));
        assert_eq!(pending[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered_immediately() {
        let (ledger, dlq, publisher, relay) =
            refusing(|| PublishError::Serialization(serde_json::from_str::<u8>("x").unwrap_err()));
        place(&ledger, "u1").await;

        let stats = relay.run_once().await.unwrap();

        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(publisher.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(dlq.len(), 1);
        assert!(ledger.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture();
        place(&fx.ledger, "u1").await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(fx.relay.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(fx.publisher.published().len(), 1);
    }
}
