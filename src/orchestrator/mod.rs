// ============================================================================
// Request Orchestrator
// ============================================================================
//
// place_order:
//   authenticate -> validate -> batched stock check -> ledger create
//   -> best-effort notify + publish (bounded by a timeout) -> Ok(order)
//
// The ledger commit is the only success criterion. Anything that fails
// after it is logged and counted, never returned and never retried here.
// With `EventDelivery::Outbox` the ledger writes the event in the order
// transaction and the relay publishes it, so no inline publish happens.
//
// ============================================================================

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join;
use tokio::time::timeout;
use uuid::Uuid;

use crate::auth::{require_role, AuthClaims, AuthError, Authenticator, Role};
use crate::domain::order::{NewOrder, NewOrderItem, Order, OrderError, OrderFilter, OrderStatus, StatusUpdate};
use crate::inventory::{StockError, StockQuery, StockVerifier};
use crate::ledger::{LedgerError, OrderLedger};
use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::notification::{order_details, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventDelivery {
    /// Publish from the request path after commit.
    Inline,
    /// Ledger writes an outbox row; `OutboxRelay` publishes it.
    #[default]
    Outbox,
}

impl FromStr for EventDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(EventDelivery::Inline),
            "outbox" => Ok(EventDelivery::Outbox),
            other => Err(format!("unknown event delivery mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub topic: String,
    pub side_effect_timeout: Duration,
    pub delivery: EventDelivery,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            topic: crate::messaging::ORDER_CREATED_TOPIC.to_string(),
            side_effect_timeout: Duration::from_secs(2),
            delivery: EventDelivery::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    Validation,
    Stock,
    Persistence,
    Forbidden,
    NotFound,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Stock => "stock",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::Forbidden => "forbidden",
            ErrorCategory::NotFound => "not_found",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaceOrderError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] OrderError),

    #[error("insufficient stock for products: {}", unavailable.join(", "))]
    StockUnavailable { unavailable: Vec<String> },

    #[error("stock check failed: {0}")]
    StockCheckFailed(StockError),

    #[error("access denied")]
    Forbidden,

    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("failed to persist order: {0}")]
    Persistence(LedgerError),
}

impl PlaceOrderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlaceOrderError::Auth(_) => ErrorCategory::Auth,
            PlaceOrderError::Validation(_) => ErrorCategory::Validation,
            PlaceOrderError::StockUnavailable { .. } | PlaceOrderError::StockCheckFailed(_) => ErrorCategory::Stock,
            PlaceOrderError::Forbidden => ErrorCategory::Forbidden,
            PlaceOrderError::NotFound(_) => ErrorCategory::NotFound,
            PlaceOrderError::Persistence(_) => ErrorCategory::Persistence,
        }
    }
}

impl From<LedgerError> for PlaceOrderError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(e) => PlaceOrderError::Validation(e),
            LedgerError::NotFound(id) => PlaceOrderError::NotFound(id),
            other => PlaceOrderError::Persistence(other),
        }
    }
}

/// Services the orchestrator calls out to.
pub struct Collaborators {
    pub auth: Arc<dyn Authenticator>,
    pub stock: Arc<dyn StockVerifier>,
    pub ledger: Arc<dyn OrderLedger>,
    pub publisher: Arc<dyn EventPublisher>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct OrderOrchestrator {
    auth: Arc<dyn Authenticator>,
    stock: Arc<dyn StockVerifier>,
    ledger: Arc<dyn OrderLedger>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
}

impl OrderOrchestrator {
    pub fn new(collaborators: Collaborators, metrics: Arc<Metrics>, config: OrchestratorConfig) -> Self {
        Self {
            auth: collaborators.auth,
            stock: collaborators.stock,
            ledger: collaborators.ledger,
            publisher: collaborators.publisher,
            notifier: collaborators.notifier,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ========================================================================
    // Place order
    // ========================================================================

    pub async fn place_order(&self, token: &str, items: Vec<NewOrderItem>) -> Result<Order, PlaceOrderError> {
        let started = Instant::now();
        let result = self.try_place_order(token, items).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => self.metrics.record_order_placed(elapsed),
            Err(e) => {
                tracing::warn!(error = %e, category = e.category().as_str(), "Order placement rejected");
                self.metrics
                    .record_order_failure("place_order", e.category().as_str(), Some(elapsed));
            }
        }
        result
    }

    async fn try_place_order(&self, token: &str, items: Vec<NewOrderItem>) -> Result<Order, PlaceOrderError> {
        let claims = self.auth.authenticate(token)?;

        let new = NewOrder::new(claims.user_id.clone(), items);
        new.validate()?;

        let queries: Vec<StockQuery> = new
            .items
            .iter()
            .map(|item| StockQuery::new(item.product_id.clone(), item.quantity))
            .collect();
        let stock = self
            .stock
            .check_stock(&queries)
            .await
            .map_err(PlaceOrderError::StockCheckFailed)?;
        if !stock.available {
            return Err(PlaceOrderError::StockUnavailable {
                unavailable: stock.unavailable,
            });
        }

        let order = self.ledger.create(new).await.map_err(|e| match e {
            LedgerError::Rejected(e) => PlaceOrderError::Validation(e),
            other => PlaceOrderError::Persistence(other),
        })?;

        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            total = %order.total,
            items = order.items.len(),
            "✅ Order placed"
        );

        self.dispatch_side_effects(&claims, &order).await;
        Ok(order)
    }

    /// Notify and publish concurrently, each bounded by the side-effect
    /// timeout. Outcomes are only logged and counted.
    async fn dispatch_side_effects(&self, claims: &AuthClaims, order: &Order) {
        let limit = self.config.side_effect_timeout;
        let details = order_details(order);

        let notify = timeout(
            limit,
            self.notifier.send_order_confirmation(&claims.user_id, order.id, &details),
        );

        let publish = async {
            match self.config.delivery {
                EventDelivery::Outbox => None,
                EventDelivery::Inline => {
                    let event = order.created_event();
                    Some(timeout(limit, self.publisher.publish(&self.config.topic, &event)).await)
                }
            }
        };

        let (notified, published) = join(notify, publish).await;

        match notified {
            Ok(Ok(())) => tracing::debug!(order_id = %order.id, "Order confirmation sent"),
            Ok(Err(e)) => {
                tracing::warn!(order_id = %order.id, error = %e, "Order confirmation failed");
                self.metrics.record_side_effect_failure("notification", "error");
            }
            Err(_) => {
                tracing::warn!(order_id = %order.id, timeout_ms = limit.as_millis() as u64, "Order confirmation timed out");
                self.metrics.record_side_effect_failure("notification", "timeout");
            }
        }

        match published {
            None => {}
            Some(Ok(Ok(()))) => self.metrics.record_published(crate::domain::order::OrderCreatedEvent::EVENT_TYPE, "inline"),
            Some(Ok(Err(e))) => {
                tracing::warn!(order_id = %order.id, error = %e, "OrderCreated publish failed");
                self.metrics.record_side_effect_failure("publish", "error");
            }
            Some(Err(_)) => {
                tracing::warn!(order_id = %order.id, timeout_ms = limit.as_millis() as u64, "OrderCreated publish timed out");
                self.metrics.record_side_effect_failure("publish", "timeout");
            }
        }
    }

    // ========================================================================
    // Supplementary operations
    // ========================================================================

    /// Owner or admin.
    pub async fn get_order(&self, token: &str, id: Uuid) -> Result<Order, PlaceOrderError> {
        self.observe("get_order", async {
            let claims = self.auth.authenticate(token)?;
            let order = self.ledger.get_by_id(id).await?;
            ensure_owner_or_admin(&claims, &order)?;
            Ok::<_, PlaceOrderError>(order)
        })
        .await
    }

    /// Admins may filter by any user; everyone else only sees their own.
    pub async fn list_orders(&self, token: &str, mut filter: OrderFilter) -> Result<(Vec<Order>, i64), PlaceOrderError> {
        self.observe("list_orders", async {
            let claims = self.auth.authenticate(token)?;
            if !claims.is_admin() {
                filter.user_id = Some(claims.user_id.clone());
            }
            Ok::<_, PlaceOrderError>(self.ledger.list(&filter).await?)
        })
        .await
    }

    /// Owner or admin. Without `expected_version` the version read here is
    /// used for the compare-and-swap.
    pub async fn update_order_status(
        &self,
        token: &str,
        id: Uuid,
        status: OrderStatus,
        expected_version: Option<i64>,
    ) -> Result<Order, PlaceOrderError> {
        self.observe("update_order_status", async {
            let claims = self.auth.authenticate(token)?;
            let current = self.ledger.get_by_id(id).await?;
            ensure_owner_or_admin(&claims, &current)?;

            let update = StatusUpdate {
                status,
                expected_version: Some(expected_version.unwrap_or(current.version)),
            };
            let updated = self.ledger.update_status(id, update).await?;

            tracing::info!(
                order_id = %id,
                actor = %claims.user_id,
                from = %current.status,
                to = %updated.status,
                "Order status changed"
            );
            Ok::<_, PlaceOrderError>(updated)
        })
        .await
    }

    /// Admin only.
    pub async fn delete_order(&self, token: &str, id: Uuid) -> Result<(), PlaceOrderError> {
        self.observe("delete_order", async {
            let claims = self.auth.authenticate(token)?;
            if !require_role(&claims, Role::Admin) {
                return Err(PlaceOrderError::Forbidden);
            }
            self.ledger.delete(id).await?;
            tracing::info!(order_id = %id, actor = %claims.user_id, "Order deleted");
            Ok(())
        })
        .await
    }

    async fn observe<T, F>(&self, operation: &str, fut: F) -> Result<T, PlaceOrderError>
    where
        F: std::future::Future<Output = Result<T, PlaceOrderError>>,
    {
        let result = fut.await;
        if let Err(e) = &result {
            tracing::debug!(operation, error = %e, category = e.category().as_str(), "Order operation rejected");
            self.metrics.record_order_failure(operation, e.category().as_str(), None);
        }
        result
    }
}

fn ensure_owner_or_admin(claims: &AuthClaims, order: &Order) -> Result<(), PlaceOrderError> {
    if claims.is_admin() || order.is_owned_by(&claims.user_id) {
        Ok(())
    } else {
        Err(PlaceOrderError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtAuthGate;
    use crate::domain::order::{OrderCreatedEvent, TransitionPolicy};
    use crate::inventory::InMemoryStockVerifier;
    use crate::ledger::{FailurePoint, InMemoryOrderLedger, OutboxStore};
    use crate::messaging::RecordingPublisher;
    use crate::notification::RecordingNotifier;
    use rust_decimal::Decimal;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    struct Fixture {
        gate: JwtAuthGate,
        stock: Arc<InMemoryStockVerifier>,
        ledger: Arc<InMemoryOrderLedger>,
        publisher: Arc<RecordingPublisher>,
        notifier: Arc<RecordingNotifier>,
        metrics: Arc<Metrics>,
        orchestrator: OrderOrchestrator,
    }

    impl Fixture {
        fn new(delivery: EventDelivery) -> Self {
            let gate = JwtAuthGate::new(SECRET, 0).unwrap();
            let stock = Arc::new(InMemoryStockVerifier::with_stock([("p1", 10), ("p2", 5)]));
            let ledger = match delivery {
                EventDelivery::Outbox => InMemoryOrderLedger::new(TransitionPolicy::Enforced).with_outbox("order.created"),
                EventDelivery::Inline => InMemoryOrderLedger::new(TransitionPolicy::Enforced),
            };
            let ledger = Arc::new(ledger);
            let publisher = Arc::new(RecordingPublisher::new());
            let notifier = Arc::new(RecordingNotifier::new());
            let metrics = Arc::new(Metrics::new().unwrap());

            let orchestrator = OrderOrchestrator::new(
                Collaborators {
                    auth: Arc::new(gate.clone()),
                    stock: stock.clone(),
                    ledger: ledger.clone(),
                    publisher: publisher.clone(),
                    notifier: notifier.clone(),
                },
                metrics.clone(),
                OrchestratorConfig {
                    topic: "order.created".to_string(),
                    side_effect_timeout: Duration::from_millis(50),
                    delivery,
                },
            );

            Self {
                gate,
                stock,
                ledger,
                publisher,
                notifier,
                metrics,
                orchestrator,
            }
        }

        fn token(&self, user_id: &str, role: Role) -> String {
            self.gate.issue_token(user_id, role, chrono::Duration::minutes(5)).unwrap()
        }
    }

    fn bikes(p2_quantity: i32) -> Vec<NewOrderItem> {
        vec![
            NewOrderItem::new("p1", "Road bike", Decimal::from(500), 1),
            NewOrderItem::new("p2", "Mountain bike", Decimal::from(300), p2_quantity),
        ]
    }

    fn failures(fx: &Fixture, operation: &str, category: &str) -> u64 {
        fx.metrics.order_failures.with_label_values(&[operation, category]).get()
    }

    #[tokio::test]
    async fn test_place_order_with_sufficient_stock() {
        let fx = Fixture::new(EventDelivery::Inline);
        let token = fx.token("u1", Role::User);

        let order = fx.orchestrator.place_order(&token, bikes(2)).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.user_id, "u1");
        assert_eq!(order.total, Decimal::from(1100));
        assert_eq!(order.items.len(), 2);
        assert_eq!(fx.stock.calls(), 1);
        assert_eq!(fx.ledger.row_counts().await, (1, 2, 0));

        let published = fx.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, order.id.to_string());
        let event = OrderCreatedEvent::from_payload(published[0].payload.as_bytes()).unwrap();
        assert_eq!(event.total, Decimal::from(1100));

        assert_eq!(fx.notifier.sent(), vec![("u1".to_string(), order.id)]);
        assert_eq!(fx.metrics.orders_placed.get(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_stock_lists_failing_products_and_writes_nothing() {
        let fx = Fixture::new(EventDelivery::Inline);
        fx.stock.set_stock("p2", 1).await;
        let token = fx.token("u1", Role::User);

        let err = fx.orchestrator.place_order(&token, bikes(2)).await.unwrap_err();

        match &err {
            PlaceOrderError::StockUnavailable { unavailable } => assert_eq!(unavailable, &vec!["p2".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.category(), ErrorCategory::Stock);
        assert_eq!(fx.ledger.row_counts().await, (0, 0, 0));
        assert!(fx.publisher.published().is_empty());
        assert!(fx.notifier.sent().is_empty());
        assert_eq!(failures(&fx, "place_order", "stock"), 1);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_before_any_call() {
        let fx = Fixture::new(EventDelivery::Inline);
        let forged = JwtAuthGate::new("another-secret-that-is-also-32-bytes-long!", 0)
            .unwrap()
            .issue_token("u1", Role::User, chrono::Duration::minutes(5))
            .unwrap();

        let err = fx.orchestrator.place_order(&forged, bikes(1)).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Auth);
        assert_eq!(fx.stock.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_items_fail_validation_before_stock_check() {
        let fx = Fixture::new(EventDelivery::Inline);
        let token = fx.token("u1", Role::User);

        let err = fx.orchestrator.place_order(&token, vec![]).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let zero_qty = vec![NewOrderItem::new("p1", "Road bike", Decimal::from(500), 0)];
        let err = fx.orchestrator.place_order(&token, zero_qty).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Validation(OrderError::InvalidQuantity { .. })));

        assert_eq!(fx.stock.calls(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_amounts_fail_validation_without_writes() {
        let fx = Fixture::new(EventDelivery::Inline);
        let token = fx.token("u1", Role::User);

        let huge = vec![NewOrderItem::new("p1", "Road bike", Decimal::MAX, 2)];
        let err = fx.orchestrator.place_order(&token, huge).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Validation(OrderError::PriceOutOfRange(1))));

        let fractional = vec![NewOrderItem::new("p1", "Road bike", Decimal::new(499_995, 3), 1)];
        let err = fx.orchestrator.place_order(&token, fractional).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Validation(OrderError::PriceTooPrecise(1))));

        assert_eq!(fx.stock.calls(), 0);
        assert_eq!(fx.ledger.row_counts().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn test_stock_service_failure_is_a_stock_error() {
        let fx = Fixture::new(EventDelivery::Inline);
        fx.stock.set_offline(true);
        let token = fx.token("u1", Role::User);

        let err = fx.orchestrator.place_order(&token, bikes(1)).await.unwrap_err();

        assert!(matches!(err, PlaceOrderError::StockCheckFailed(_)));
        assert_eq!(err.category(), ErrorCategory::Stock);
        assert_eq!(fx.ledger.row_counts().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn test_ledger_failure_is_persistence_error_without_side_effects() {
        let fx = Fixture::new(EventDelivery::Inline);
        fx.ledger.fail_next_create_at(FailurePoint::BeforeItem(1)).await;
        let token = fx.token("u1", Role::User);

        let err = fx.orchestrator.place_order(&token, bikes(1)).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Persistence);
        assert_eq!(fx.ledger.row_counts().await, (0, 0, 0));
        assert!(fx.publisher.published().is_empty());
        assert!(fx.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_side_effect_failures_do_not_fail_the_order() {
        let fx = Fixture::new(EventDelivery::Inline);
        fx.publisher.set_failing(true);
        fx.notifier.set_failing(true);
        let token = fx.token("u1", Role::User);

        let order = fx.orchestrator.place_order(&token, bikes(1)).await.unwrap();

        assert!(fx.ledger.exists(order.id).await.unwrap());
        assert_eq!(fx.publisher.attempts(), 1);
        assert_eq!(
            fx.metrics.side_effect_failures.with_label_values(&["publish", "error"]).get(),
            1
        );
        assert_eq!(
            fx.metrics.side_effect_failures.with_label_values(&["notification", "error"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_slow_side_effects_are_cut_off() {
        let fx = Fixture::new(EventDelivery::Inline);
        fx.publisher.set_delay(Duration::from_millis(500));
        fx.notifier.set_delay(Duration::from_millis(500));
        let token = fx.token("u1", Role::User);

        let started = Instant::now();
        let order = fx.orchestrator.place_order(&token, bikes(1)).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(fx.ledger.exists(order.id).await.unwrap());
        assert_eq!(
            fx.metrics.side_effect_failures.with_label_values(&["publish", "timeout"]).get(),
            1
        );
        assert_eq!(
            fx.metrics.side_effect_failures.with_label_values(&["notification", "timeout"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_outbox_delivery_skips_inline_publish() {
        let fx = Fixture::new(EventDelivery::Outbox);
        let token = fx.token("u1", Role::User);

        let order = fx.orchestrator.place_order(&token, bikes(1)).await.unwrap();

        assert_eq!(fx.publisher.attempts(), 0);
        let pending = fx.ledger.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].aggregate_id, order.id);
        assert_eq!(pending[0].topic, "order.created");
    }

    #[tokio::test]
    async fn test_get_order_requires_owner_or_admin() {
        let fx = Fixture::new(EventDelivery::Inline);
        let owner = fx.token("u1", Role::User);
        let order = fx.orchestrator.place_order(&owner, bikes(1)).await.unwrap();

        assert_eq!(fx.orchestrator.get_order(&owner, order.id).await.unwrap().id, order.id);

        let stranger = fx.token("u2", Role::User);
        let err = fx.orchestrator.get_order(&stranger, order.id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);

        let admin = fx.token("root", Role::Admin);
        assert!(fx.orchestrator.get_order(&admin, order.id).await.is_ok());

        let err = fx.orchestrator.get_order(&admin, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(failures(&fx, "get_order", "not_found"), 1);
    }

    #[tokio::test]
    async fn test_list_orders_scopes_non_admins_to_themselves() {
        let fx = Fixture::new(EventDelivery::Inline);
        let u1 = fx.token("u1", Role::User);
        let u2 = fx.token("u2", Role::User);
        fx.orchestrator.place_order(&u1, bikes(1)).await.unwrap();
        fx.orchestrator.place_order(&u2, bikes(1)).await.unwrap();

        let (orders, total) = fx
            .orchestrator
            .list_orders(&u1, OrderFilter::for_user("u2"))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert!(orders.iter().all(|o| o.user_id == "u1"));

        let admin = fx.token("root", Role::Admin);
        let (_, total) = fx.orchestrator.list_orders(&admin, OrderFilter::default()).await.unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_update_order_status_follows_transition_table() {
        let fx = Fixture::new(EventDelivery::Inline);
        let token = fx.token("u1", Role::User);
        let order = fx.orchestrator.place_order(&token, bikes(1)).await.unwrap();

        let paid = fx
            .orchestrator
            .update_order_status(&token, order.id, OrderStatus::Paid, None)
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.version, order.version + 1);

        let err = fx
            .orchestrator
            .update_order_status(&token, order.id, OrderStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceOrderError::Validation(OrderError::InvalidStatusTransition { .. })));

        // Caller still holds the pre-payment version
        let err = fx
            .orchestrator
            .update_order_status(&token, order.id, OrderStatus::Shipped, Some(order.version))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceOrderError::Persistence(LedgerError::VersionConflict { .. })));

        let stranger = fx.token("u2", Role::User);
        let err = fx
            .orchestrator
            .update_order_status(&stranger, order.id, OrderStatus::Shipped, None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
    }

    #[tokio::test]
    async fn test_delete_order_is_admin_only() {
        let fx = Fixture::new(EventDelivery::Inline);
        let owner = fx.token("u1", Role::User);
        let order = fx.orchestrator.place_order(&owner, bikes(1)).await.unwrap();

        let err = fx.orchestrator.delete_order(&owner, order.id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);

        let admin = fx.token("root", Role::Admin);
        fx.orchestrator.delete_order(&admin, order.id).await.unwrap();
        assert!(!fx.ledger.exists(order.id).await.unwrap());

        let err = fx.orchestrator.delete_order(&admin, order.id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_event_delivery_parsing() {
        assert_eq!("outbox".parse::<EventDelivery>().unwrap(), EventDelivery::Outbox);
        assert_eq!("INLINE".parse::<EventDelivery>().unwrap(), EventDelivery::Inline);
        assert!("kafka".parse::<EventDelivery>().is_err());
    }
}
