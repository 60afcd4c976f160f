use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used by the outbox relay (publish) and the event consumer (handler).
// Inline side effects in the orchestrator are never retried.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Outbox publishing: the row stays in the table, so we can afford to
    /// wait longer between attempts.
    pub fn for_publish() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Consumer handlers: the partition is blocked while we retry.
    pub fn for_handler() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// Delay to use after `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = Duration::from_millis(((current.as_millis() as f64) * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Every attempt failed; carries the last error and the attempt count.
    Exhausted { error: E, attempts: u32 },
    /// The error was not transient; no further attempts were made.
    PermanentFailure { error: E, attempts: u32 },
}

/// Whether an error is worth retrying.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry only failures whose error reports itself as transient, with
/// exponential backoff, until `max_attempts` is reached.
pub async fn retry_on_transient<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success(value);
            }
            Err(error) if !error.is_transient() => {
                tracing::error!(attempt, error = %error, "Permanent failure, not retrying");
                return RetryResult::PermanentFailure { error, attempts: attempt };
            }
            Err(error) if attempt >= config.max_attempts.max(1) => {
                tracing::error!(attempt, error = %error, "Operation failed after all retries");
                return RetryResult::Exhausted { error, attempts: attempt };
            }
            Err(error) => {
                tracing::warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying after delay"
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
