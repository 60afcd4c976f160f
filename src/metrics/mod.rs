mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - order placement (successes, failures by category, latency)
// - best-effort side effects (notification / inline publish failures)
// - outbox relay and consumer throughput
// - retries, dead-lettered messages and the producer circuit breaker
//
// Served as Prometheus text on GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Orchestrator
    pub orders_placed: IntCounter,
    pub order_failures: IntCounterVec,
    pub placement_duration: HistogramVec,
    pub side_effect_failures: IntCounterVec,

    // Event delivery
    pub events_published: IntCounterVec,
    pub events_consumed: IntCounterVec,

    // Retry / DLQ
    pub retry_attempts: IntCounterVec,
    pub dlq_messages: IntCounterVec,

    // Producer circuit breaker
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let orders_placed = IntCounter::new("orders_placed_total", "Orders committed by the ledger")?;
        registry.register(Box::new(orders_placed.clone()))?;

        let order_failures = IntCounterVec::new(
            Opts::new("order_failures_total", "Order operations rejected, by error category"),
            &["operation", "category"],
        )?;
        registry.register(Box::new(order_failures.clone()))?;

        let placement_duration = HistogramVec::new(
            HistogramOpts::new("order_placement_duration_seconds", "End-to-end place_order latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(placement_duration.clone()))?;

        let side_effect_failures = IntCounterVec::new(
            Opts::new(
                "order_side_effect_failures_total",
                "Best-effort side effects that failed or timed out after commit",
            ),
            &["side_effect", "reason"],
        )?;
        registry.register(Box::new(side_effect_failures.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events handed to the event bus"),
            &["event_type", "path"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_consumed = IntCounterVec::new(
            Opts::new("events_consumed_total", "Events seen by the consumer, by outcome"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let retry_attempts = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Retried attempts (excludes the first try)"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_attempts.clone()))?;

        let dlq_messages = IntCounterVec::new(
            Opts::new("dlq_messages_total", "Messages moved to the dead letter queue"),
            &["event_type", "source"],
        )?;
        registry.register(Box::new(dlq_messages.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Producer circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            orders_placed,
            order_failures,
            placement_duration,
            side_effect_failures,
            events_published,
            events_consumed,
            retry_attempts,
            dlq_messages,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_placed(&self, duration_secs: f64) {
        self.orders_placed.inc();
        self.placement_duration.with_label_values(&["ok"]).observe(duration_secs);
    }

    pub fn record_order_failure(&self, operation: &str, category: &str, duration_secs: Option<f64>) {
        self.order_failures.with_label_values(&[operation, category]).inc();
        if let Some(secs) = duration_secs {
            self.placement_duration.with_label_values(&["error"]).observe(secs);
        }
    }

    pub fn record_side_effect_failure(&self, side_effect: &str, reason: &str) {
        self.side_effect_failures.with_label_values(&[side_effect, reason]).inc();
    }

    /// `path` is `inline` or `outbox`.
    pub fn record_published(&self, event_type: &str, path: &str) {
        self.events_published.with_label_values(&[event_type, path]).inc();
    }

    /// `outcome` is one of `processed`, `duplicate`, `failed`, `poison`.
    pub fn record_consumed(&self, event_type: &str, outcome: &str) {
        self.events_consumed.with_label_values(&[event_type, outcome]).inc();
    }

    pub fn record_retry_attempt(&self, operation: &str) {
        self.retry_attempts.with_label_values(&[operation]).inc();
    }

    pub fn record_dlq_message(&self, event_type: &str, source: &str) {
        self.dlq_messages.with_label_values(&[event_type, source]).inc();
    }

    pub fn record_circuit_transition(&self, from: crate::utils::CircuitState, to: crate::utils::CircuitState) {
        self.circuit_breaker_state.set(to.as_gauge());
        self.circuit_breaker_transitions
            .with_label_values(&[&format!("{from:?}"), &format!("{to:?}")])
            .inc();
    }
}
