use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tokio::sync::watch;

use super::consumer::EventConsumer;
use super::{EventPublisher, PublishError};
use crate::utils::{CircuitBreaker, CircuitBreakerError, CircuitState};

// ============================================================================
// Kafka / Redpanda adapters
// ============================================================================

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str, circuit_breaker: CircuitBreaker) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        tracing::info!(brokers = %brokers, "Created Kafka producer");

        Ok(Self {
            producer,
            circuit_breaker,
            send_timeout: Duration::from_secs(5),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish_raw(&self, subject: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(subject).key(key).payload(payload);
                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| PublishError::Broker(e.to_string()))
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(topic = %subject, key = %key, "Published to Kafka");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %subject, "Circuit breaker open - event bus unavailable");
                Err(PublishError::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %subject, key = %key, "Failed to publish to Kafka");
                Err(e)
            }
        }
    }
}

/// Subscription loop feeding an [`EventConsumer`].
pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
    topic: String,
    processor: Arc<EventConsumer>,
}

impl KafkaEventConsumer {
    pub fn new(brokers: &str, group_id: &str, topic: &str, processor: Arc<EventConsumer>) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            processor,
        })
    }

    /// Consume until `shutdown` flips to `true` (or its sender is dropped).
    /// The message being handled when shutdown arrives is finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        tracing::info!(topic = %self.topic, "🔄 Consuming OrderCreated events");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(error = %e, "Kafka receive error");
                            continue;
                        }
                    };

                    let payload = message.payload().unwrap_or_default();
                    match self.processor.handle_message(payload).await {
                        Ok(outcome) => {
                            tracing::debug!(
                                partition = message.partition(),
                                offset = message.offset(),
                                outcome = ?outcome,
                                "Message handled"
                            );
                            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(error = %e, "Failed to commit offset");
                            }
                        }
                        Err(e) => {
                            // Left uncommitted; redelivered after restart or rebalance.
                            tracing::error!(
                                error = %e,
                                partition = message.partition(),
                                offset = message.offset(),
                                "Failed to handle message"
                            );
                        }
                    }
                }
            }
        }

        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Consumer unsubscribed");
        Ok(())
    }
}
