use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{outbox_message_for, plan_status_update, LedgerError, OrderLedger, OutboxMessage, OutboxStore};
use crate::domain::order::{NewOrder, Order, OrderFilter, OrderItem, StatusUpdate, TransitionPolicy};

/// Where an injected failure interrupts `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    AfterOrderRow,
    /// Before the item at this zero-based position is inserted.
    BeforeItem(usize),
    BeforeCommit,
}

#[derive(Debug, Clone)]
struct OrderRow {
    order: Order,
}

#[derive(Debug, Clone)]
struct OutboxRow {
    message: OutboxMessage,
    published: bool,
    dead_lettered: bool,
}

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, OrderRow>,
    items: HashMap<Uuid, Vec<OrderItem>>,
    outbox: Vec<OutboxRow>,
    fail_create_at: Option<FailurePoint>,
}

/// Pending writes of one `create`, applied to `State` only on commit.
#[derive(Default)]
struct Staged {
    order: Option<OrderRow>,
    items: Vec<OrderItem>,
    outbox: Option<OutboxRow>,
}

/// Process-local ledger with the same transactional guarantees as the
/// Postgres one. Used by tests and the demo wiring.
pub struct InMemoryOrderLedger {
    state: Mutex<State>,
    policy: TransitionPolicy,
    outbox_topic: Option<String>,
}

impl Default for InMemoryOrderLedger {
    fn default() -> Self {
        Self::new(TransitionPolicy::default())
    }
}

impl InMemoryOrderLedger {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            policy,
            outbox_topic: None,
        }
    }

    pub fn with_outbox(mut self, topic: impl Into<String>) -> Self {
        self.outbox_topic = Some(topic.into());
        self
    }

    /// Make the next `create` fail at `point`.
    pub async fn fail_next_create_at(&self, point: FailurePoint) {
        self.state.lock().await.fail_create_at = Some(point);
    }

    /// `(order rows, item rows, outbox rows)` currently stored.
    pub async fn row_counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().await;
        let items = state.items.values().map(Vec::len).sum();
        (state.orders.len(), items, state.outbox.len())
    }

    fn check_failure(point: Option<FailurePoint>, at: FailurePoint) -> Result<(), LedgerError> {
        if point == Some(at) {
            return Err(LedgerError::Storage(format!("injected failure at {at:?}")));
        }
        Ok(())
    }

    fn assemble(state: &State, row: &OrderRow) -> Order {
        let mut order = row.order.clone();
        order.items = state.items.get(&order.id).cloned().unwrap_or_default();
        order
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn create(&self, new: NewOrder) -> Result<Order, LedgerError> {
        new.validate()?;
        let order = Order::from_new(&new, Utc::now())?;

        let mut state = self.state.lock().await;
        let failure = state.fail_create_at.take();
        let mut staged = Staged::default();

        let mut header = order.clone();
        header.items.clear();
        staged.order = Some(OrderRow { order: header });
        Self::check_failure(failure, FailurePoint::AfterOrderRow)?;

        for (position, item) in order.items.iter().enumerate() {
            Self::check_failure(failure, FailurePoint::BeforeItem(position))?;
            staged.items.push(item.clone());
        }

        if let Some(topic) = &self.outbox_topic {
            staged.outbox = Some(OutboxRow {
                message: outbox_message_for(&order, topic)?,
                published: false,
                dead_lettered: false,
            });
        }
        Self::check_failure(failure, FailurePoint::BeforeCommit)?;

        // commit
        if let Some(row) = staged.order {
            state.orders.insert(order.id, row);
        }
        state.items.insert(order.id, staged.items);
        if let Some(row) = staged.outbox {
            state.outbox.push(row);
        }

        tracing::debug!(order_id = %order.id, items = order.items.len(), "Stored order in memory");
        Ok(order)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Order, LedgerError> {
        let state = self.state.lock().await;
        let row = state.orders.get(&id).ok_or(LedgerError::NotFound(id))?;
        Ok(Self::assemble(&state, row))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, i64), LedgerError> {
        let state = self.state.lock().await;

        let mut matching: Vec<&OrderRow> = state
            .orders
            .values()
            .filter(|row| {
                let order = &row.order;
                filter.user_id.as_ref().map_or(true, |u| &order.user_id == u)
                    && filter.status.map_or(true, |s| order.status == s)
                    && filter.from_date.map_or(true, |from| order.created_at >= from)
                    && filter.to_date.map_or(true, |to| order.created_at <= to)
            })
            .collect();
        matching.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit() as usize)
            .map(|row| Self::assemble(&state, row))
            .collect();

        Ok((page, total))
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Order, LedgerError> {
        let mut state = self.state.lock().await;
        let current = {
            let row = state.orders.get(&id).ok_or(LedgerError::NotFound(id))?;
            Self::assemble(&state, row)
        };

        let next = plan_status_update(&current, update, self.policy)?;

        let mut header = next.clone();
        header.items.clear();
        state.orders.insert(id, OrderRow { order: header });

        tracing::debug!(
            order_id = %id,
            from = %current.status,
            to = %next.status,
            version = next.version,
            "Updated order status"
        );
        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if !state.orders.contains_key(&id) {
            return Err(LedgerError::NotFound(id));
        }
        state.items.remove(&id);
        state.orders.remove(&id);
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, LedgerError> {
        Ok(self.state.lock().await.orders.contains_key(&id))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderLedger {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|row| !row.published && !row.dead_lettered)
            .take(limit.max(0) as usize)
            .map(|row| row.message.clone())
            .collect())
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.message.id == id) {
            row.published = true;
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.message.id == id) {
            row.message.attempts = attempts;
            row.message.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_dead_lettered(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|row| row.message.id == id) {
            row.dead_lettered = true;
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
