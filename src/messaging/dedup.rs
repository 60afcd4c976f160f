use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

// ============================================================================
// Processed-event stores
// ============================================================================
//
// The consumer claims an event id before running its handler and releases
// the claim if the handler fails, so a redelivery can try again. Retention
// is bounded: by entry count in memory, by TTL in Redis.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProcessedEventsError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait ProcessedEvents: Send + Sync {
    /// `true` if this call claimed the id, `false` if it was already claimed.
    async fn try_claim(&self, event_id: &str) -> Result<bool, ProcessedEventsError>;

    async fn release(&self, event_id: &str) -> Result<(), ProcessedEventsError>;
}

/// Bounded FIFO set; the oldest id is evicted once `capacity` is reached.
pub struct InMemoryProcessedEvents {
    capacity: usize,
    state: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl InMemoryProcessedEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(Seen::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProcessedEvents for InMemoryProcessedEvents {
    async fn try_claim(&self, event_id: &str) -> Result<bool, ProcessedEventsError> {
        let mut seen = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if seen.ids.contains(event_id) {
            return Ok(false);
        }

        while seen.ids.len() >= self.capacity {
            match seen.order.pop_front() {
                Some(oldest) => {
                    seen.ids.remove(&oldest);
                }
                None => break,
            }
        }

        seen.ids.insert(event_id.to_string());
        seen.order.push_back(event_id.to_string());
        Ok(true)
    }

    async fn release(&self, event_id: &str) -> Result<(), ProcessedEventsError> {
        let mut seen = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if seen.ids.remove(event_id) {
            seen.order.retain(|id| id != event_id);
        }
        Ok(())
    }
}

/// Shared dedupe across consumer instances using `SET key 1 NX EX ttl`.
#[derive(Clone)]
pub struct RedisProcessedEvents {
    conn: MultiplexedConnection,
    prefix: String,
    ttl_secs: u64,
}

impl RedisProcessedEvents {
    pub async fn connect(url: &str, ttl_secs: u64) -> Result<Self, ProcessedEventsError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(ttl_secs, "Connected to Redis for event dedupe");
        Ok(Self {
            conn,
            prefix: "order_flow:processed:".to_string(),
            ttl_secs,
        })
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}{}", self.prefix, event_id)
    }
}

#[async_trait]
impl ProcessedEvents for RedisProcessedEvents {
    async fn try_claim(&self, event_id: &str) -> Result<bool, ProcessedEventsError> {
        let mut conn = self.conn.clone();
        // Reply is "OK" when the key was set, nil when it already existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(event_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, event_id: &str) -> Result<(), ProcessedEventsError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(self.key(event_id)).query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_claim_is_rejected() {
        let store = InMemoryProcessedEvents::new(10);
        assert!(store.try_claim("a").await.unwrap());
        assert!(!store.try_claim("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_allows_reclaim() {
        let store = InMemoryProcessedEvents::new(10);
        store.try_claim("a").await.unwrap();
        store.release("a").await.unwrap();
        assert!(store.try_claim("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_oldest_entry_is_evicted_at_capacity() {
        let store = InMemoryProcessedEvents::new(2);
        store.try_claim("a").await.unwrap();
        store.try_claim("b").await.unwrap();
        store.try_claim("c").await.unwrap();

        assert_eq!(store.len(), 2);
        // "a" fell out of the window
        assert!(store.try_claim("a").await.unwrap());
        assert!(!store.try_claim("c").await.unwrap());
    }
}
