use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards the event bus producer. After `failure_threshold` consecutive
// failures the breaker opens and calls fail fast until `open_timeout` has
// elapsed; then a half-open probe decides whether to close again.
//
// States:
// - Closed: calls pass through
// - Open: calls rejected without touching the broker
// - HalfOpen: calls pass through, one failure re-opens
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by the metrics registry.
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    /// Successes needed in half-open before closing
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("{0}")]
    OperationFailed(E),
}

type TransitionHook = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    config: CircuitBreakerConfig,
    on_transition: Option<TransitionHook>,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
            config,
            on_transition: None,
        }
    }

    /// Called with `(from, to)` on every state change.
    pub fn on_transition(mut self, hook: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static) -> Self {
        self.on_transition = Some(Arc::new(hook));
        self
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means another caller panicked mid-update; the
        // counters are still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.open_timeout {
                    inner.successes = 0;
                    self.move_to(&mut inner, CircuitState::Open, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    self.move_to(&mut inner, CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;

        match inner.state {
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.opened_at = Some(Instant::now());
                self.move_to(&mut inner, CircuitState::Closed, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                inner.successes = 0;
                inner.opened_at = Some(Instant::now());
                self.move_to(&mut inner, CircuitState::HalfOpen, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn move_to(&self, inner: &mut Inner, from: CircuitState, to: CircuitState) {
        if from == to {
            return;
        }
        inner.state = to;
        tracing::warn!(from = ?from, to = ?to, failures = inner.failures, "Circuit breaker state change");
        if let Some(hook) = &self.on_transition {
            hook(from, to);
        }
    }
}
