use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{EventPublisher, PublishError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub key: String,
    pub payload: String,
}

/// In-process publisher that records every message. Can be made to fail
/// (always, or for the next N calls) and to stall before answering.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next(&self, times: usize) {
        self.fail_next.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Calls made, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_raw(&self, subject: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Broker("broker unreachable".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(PublishError::Broker("transient broker error".to_string()));
        }

        self.published
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(PublishedMessage {
                subject: subject.to_string(),
                key: key.to_string(),
                payload: payload.to_string(),
            });
        Ok(())
    }
}
