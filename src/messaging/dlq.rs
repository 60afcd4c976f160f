use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

// ============================================================================
// Dead Letter Queue
// ============================================================================
//
// Messages land here when:
// - the outbox relay exhausts its publish attempts
// - the consumer cannot decode a payload (poison message)
// - the consumer handler keeps failing after its retries
//
// Rows are kept for manual inspection and replay.
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub id: Uuid,
    /// Order id when known; poison messages may not have one.
    pub aggregate_id: Option<Uuid>,
    pub event_type: String,
    /// `outbox` or `consumer`
    pub source: String,
    pub payload: String,
    pub error_message: String,
    pub failure_count: i32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        source: &str,
        event_type: &str,
        aggregate_id: Option<Uuid>,
        payload: impl Into<String>,
        error_message: impl Into<String>,
        failure_count: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            event_type: event_type.to_string(),
            source: source.to_string(),
            payload: payload.into(),
            error_message: error_message.into(),
            failure_count,
            first_failed_at: now,
            last_failed_at: now,
        }
    }

    pub fn first_failed_at(mut self, at: DateTime<Utc>) -> Self {
        self.first_failed_at = at;
        self
    }
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn push(&self, message: DeadLetter) -> anyhow::Result<()>;

    /// Most recent first.
    async fn recent(&self, limit: i64) -> anyhow::Result<Vec<DeadLetter>>;
}

#[derive(Clone)]
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

impl PostgresDeadLetterQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterQueue for PostgresDeadLetterQueue {
    async fn push(&self, msg: DeadLetter) -> anyhow::Result<()> {
        tracing::error!(
            event_id = %msg.id,
            event_type = %msg.event_type,
            source = %msg.source,
            aggregate_id = ?msg.aggregate_id,
            error = %msg.error_message,
            failure_count = msg.failure_count,
            "💀 Adding message to Dead Letter Queue"
        );

        sqlx::query(
            "INSERT INTO dead_letter_queue (
                id, aggregate_id, event_type, source, payload,
                error_message, failure_count, first_failed_at, last_failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(msg.id)
        .bind(msg.aggregate_id)
        .bind(&msg.event_type)
        .bind(&msg.source)
        .bind(&msg.payload)
        .bind(&msg.error_message)
        .bind(msg.failure_count)
        .bind(msg.first_failed_at)
        .bind(msg.last_failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to insert into DLQ: {}", e))?;

        Ok(())
    }

    async fn recent(&self, limit: i64) -> anyhow::Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            "SELECT id, aggregate_id, event_type, source, payload, error_message,
                    failure_count, first_failed_at, last_failed_at
             FROM dead_letter_queue
             ORDER BY last_failed_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(DeadLetter {
                id: row.try_get("id")?,
                aggregate_id: row.try_get("aggregate_id")?,
                event_type: row.try_get("event_type")?,
                source: row.try_get("source")?,
                payload: row.try_get("payload")?,
                error_message: row.try_get("error_message")?,
                failure_count: row.try_get("failure_count")?,
                first_failed_at: row.try_get("first_failed_at")?,
                last_failed_at: row.try_get("last_failed_at")?,
            });
        }
        Ok(messages)
    }
}

#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    messages: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, message: DeadLetter) -> anyhow::Result<()> {
        tracing::error!(
            event_id = %message.id,
            source = %message.source,
            error = %message.error_message,
            "💀 Adding message to Dead Letter Queue"
        );
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).push(message);
        Ok(())
    }

    async fn recent(&self, limit: i64) -> anyhow::Result<Vec<DeadLetter>> {
        let messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
        Ok(messages
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}
