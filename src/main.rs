use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_flow::auth::{JwtAuthGate, Role};
use order_flow::config::AppConfig;
use order_flow::domain::order::{NewOrderItem, OrderStatus, VariantAttributes};
use order_flow::inventory::PostgresStockVerifier;
use order_flow::ledger::PostgresOrderLedger;
use order_flow::messaging::{
    EventConsumer, InMemoryProcessedEvents, KafkaEventConsumer, KafkaEventPublisher, LoggingOrderHandler, OutboxRelay,
    OutboxRelayConfig, PostgresDeadLetterQueue, ProcessedEvents, RedisProcessedEvents,
};
use order_flow::metrics::{self, Metrics};
use order_flow::notification::LoggingNotifier;
use order_flow::orchestrator::{Collaborators, EventDelivery, OrchestratorConfig, OrderOrchestrator};
use order_flow::utils::{CircuitBreaker, CircuitBreakerConfig, RetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,order_flow=debug")))
        .init();

    tracing::info!("🚀 Starting order-flow");

    let config = AppConfig::from_env()?;
    tracing::debug!(config = ?config, "Loaded configuration");

    // === 1. Postgres + migrations ===
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database ready");

    // === 2. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    // actix-web gets its own runtime on a dedicated thread
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    });

    // === 3. Collaborators ===
    let auth = JwtAuthGate::new(&config.auth_secret, config.auth_leeway_secs)?;

    let mut ledger = PostgresOrderLedger::new(pool.clone(), config.status_transitions);
    if config.event_delivery == EventDelivery::Outbox {
        ledger = ledger.with_outbox(&config.order_created_topic);
    }
    let ledger = Arc::new(ledger);

    let breaker_metrics = metrics.clone();
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::default())
        .on_transition(move |from, to| breaker_metrics.record_circuit_transition(from, to));
    let publisher = Arc::new(KafkaEventPublisher::new(&config.kafka_brokers, breaker)?);

    let dlq = Arc::new(PostgresDeadLetterQueue::new(pool.clone()));

    let orchestrator = OrderOrchestrator::new(
        Collaborators {
            auth: Arc::new(auth.clone()),
            stock: Arc::new(PostgresStockVerifier::new(pool.clone())),
            ledger: ledger.clone(),
            publisher: publisher.clone(),
            notifier: Arc::new(LoggingNotifier),
        },
        metrics.clone(),
        OrchestratorConfig {
            topic: config.order_created_topic.clone(),
            side_effect_timeout: config.side_effect_timeout,
            delivery: config.event_delivery,
        },
    );

    // === 4. Background loops ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if config.event_delivery == EventDelivery::Outbox {
        let relay = OutboxRelay::new(
            ledger.clone(),
            publisher.clone(),
            dlq.clone(),
            OutboxRelayConfig {
                poll_interval: config.outbox_poll_interval,
                batch_size: config.outbox_batch_size,
                retry: RetryConfig::for_publish(),
                max_delivery_attempts: config.outbox_max_attempts,
            },
        )
        .with_metrics(metrics.clone());
        tasks.push(tokio::spawn(relay.run(shutdown_rx.clone())));
    }

    let processed: Arc<dyn ProcessedEvents> = match &config.redis_url {
        Some(url) => Arc::new(RedisProcessedEvents::connect(url, config.dedup_ttl.as_secs()).await?),
        None => {
            tracing::warn!("REDIS_URL not set, dedupe is local to this process");
            Arc::new(InMemoryProcessedEvents::new(config.dedup_capacity))
        }
    };
    let event_consumer = EventConsumer::new(Arc::new(LoggingOrderHandler), processed, dlq.clone())
        .with_metrics(metrics.clone());
    let kafka_consumer = KafkaEventConsumer::new(
        &config.kafka_brokers,
        &config.kafka_group_id,
        &config.order_created_topic,
        Arc::new(event_consumer),
    )?;
    tasks.push(tokio::spawn(kafka_consumer.run(shutdown_rx)));

    // === 5. Optional walkthrough ===
    if std::env::args().any(|arg| arg == "--demo") {
        if let Err(e) = run_demo(&pool, &auth, &orchestrator).await {
            tracing::error!(error = %e, "Demo failed");
        }
    }

    tracing::info!("✅ order-flow ready, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!(circuit = ?publisher.circuit_state(), "Shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Background task failed"),
            Err(e) => tracing::error!(error = %e, "Background task panicked"),
        }
    }
    pool.close().await;

    tracing::info!("🎉 Stopped");
    Ok(())
}

/// Seed two products, place an order for them and move it to `paid`.
async fn run_demo(pool: &PgPool, auth: &JwtAuthGate, orchestrator: &OrderOrchestrator) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order placement");

    for (id, name, price, stock) in [("p1", "Road bike", 500, 10), ("p2", "Mountain bike", 300, 4)] {
        sqlx::query("INSERT INTO products (id, name, price, stock) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .bind(name)
            .bind(Decimal::from(price))
            .bind(stock)
            .execute(pool)
            .await?;
    }

    let token = auth.issue_token("demo-user", Role::User, chrono::Duration::minutes(15))?;
    let items = vec![
        NewOrderItem::new("p1", "Road bike", Decimal::from(500), 1).with_variant(VariantAttributes {
            frame_size: Some("56cm".to_string()),
            wheel_size: Some("700c".to_string()),
            color: Some("red".to_string()),
            bike_type: Some("road".to_string()),
        }),
        NewOrderItem::new("p2", "Mountain bike", Decimal::from(300), 2),
    ];

    let order = orchestrator.place_order(&token, items).await?;
    tracing::info!(order_id = %order.id, total = %order.total, "✅ Order created");

    let paid = orchestrator
        .update_order_status(&token, order.id, OrderStatus::Paid, Some(order.version))
        .await?;
    tracing::info!(order_id = %paid.id, version = paid.version, "✅ Order paid");

    Ok(())
}
