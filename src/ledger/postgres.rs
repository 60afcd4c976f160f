use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{outbox_message_for, plan_status_update, LedgerError, OrderLedger, OutboxMessage, OutboxStore};
use crate::domain::order::{
    NewOrder, Order, OrderFilter, OrderItem, OrderStatus, StatusUpdate, TransitionPolicy, VariantAttributes,
};

const ORDER_COLUMNS: &str = "id, user_id, status, total, version, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, order_id, product_id, name, price, quantity, frame_size, wheel_size, color, bike_type";

// ============================================================================
// Postgres Order Ledger
// ============================================================================
//
// Tables: orders, order_items (FK -> orders), outbox_messages.
// See migrations/0001_order_ledger.sql.
//
// ============================================================================

#[derive(Clone)]
pub struct PostgresOrderLedger {
    pool: PgPool,
    policy: TransitionPolicy,
    outbox_topic: Option<String>,
}

impl PostgresOrderLedger {
    pub fn new(pool: PgPool, policy: TransitionPolicy) -> Self {
        Self {
            pool,
            policy,
            outbox_topic: None,
        }
    }

    /// Write an OrderCreated outbox row in the same transaction as each new
    /// order.
    pub fn with_outbox(mut self, topic: impl Into<String>) -> Self {
        self.outbox_topic = Some(topic.into());
        self
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>, LedgerError> {
        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(items);
        }

        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let item = item_from_row(&row)?;
            items.entry(item.order_id).or_default().push(item);
        }
        Ok(items)
    }

    async fn current_version(&self, id: Uuid) -> Result<Option<i64>, LedgerError> {
        let version = sqlx::query_scalar::<_, i64>("SELECT version FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(version)
    }
}

#[async_trait]
impl OrderLedger for PostgresOrderLedger {
    async fn create(&self, new: NewOrder) -> Result<Order, LedgerError> {
        new.validate()?;
        let order = Order::from_new(&new, Utc::now())?;
        let outbox = match &self.outbox_topic {
            Some(topic) => Some(outbox_message_for(&order, topic)?),
            None => None,
        };

        // Dropping `tx` on any early return rolls the whole order back.
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(order.id)
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .bind(order.total)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(&format!(
                "INSERT INTO order_items ({ITEM_COLUMNS}, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
            ))
            .bind(item.id)
            .bind(item.order_id)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(item.price)
            .bind(item.quantity)
            .bind(item.variant.frame_size.as_deref())
            .bind(item.variant.wheel_size.as_deref())
            .bind(item.variant.color.as_deref())
            .bind(item.variant.bike_type.as_deref())
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(message) = &outbox {
            sqlx::query(
                "INSERT INTO outbox_messages (id, aggregate_id, event_type, topic, payload, attempts, created_at) \
                 VALUES ($1, $2, $3, $4, $5, 0, $6)",
            )
            .bind(message.id)
            .bind(message.aggregate_id)
            .bind(&message.event_type)
            .bind(&message.topic)
            .bind(&message.payload)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            items = order.items.len(),
            total = %order.total,
            outbox = outbox.is_some(),
            "✅ Persisted order"
        );

        Ok(order)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Order, LedgerError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(id))?;

        let mut order = order_from_row(&row)?;
        order.items = self.load_items(&[id]).await?.remove(&id).unwrap_or_default();
        Ok(order)
    }

    async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, i64), LedgerError> {
        let mut query = list_query(filter);
        let rows = query.build().fetch_all(&self.pool).await?;

        let mut orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;

        let total: i64 = count_query(filter).build_query_scalar().fetch_one(&self.pool).await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items = self.load_items(&ids).await?;
        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }

        Ok((orders, total))
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Order, LedgerError> {
        let current = self.get_by_id(id).await?;
        let next = plan_status_update(&current, update, self.policy)?;

        let result = sqlx::query(
            "UPDATE orders SET status = $1, version = $2, updated_at = $3 WHERE id = $4 AND version = $5",
        )
        .bind(next.status.as_str())
        .bind(next.version)
        .bind(next.updated_at)
        .bind(id)
        .bind(current.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Someone else changed or removed the row after we read it.
            return match self.current_version(id).await? {
                None => Err(LedgerError::NotFound(id)),
                Some(actual) => Err(LedgerError::VersionConflict {
                    id,
                    expected: current.version,
                    actual,
                }),
            };
        }

        tracing::info!(
            order_id = %id,
            from = %current.status,
            to = %next.status,
            version = next.version,
            "Updated order status"
        );

        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(id));
        }

        tx.commit().await?;
        tracing::info!(order_id = %id, "Deleted order");
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, LedgerError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl OutboxStore for PostgresOrderLedger {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, aggregate_id, event_type, topic, payload, attempts, last_error, created_at \
             FROM outbox_messages \
             WHERE published_at IS NULL AND dead_lettered_at IS NULL \
             ORDER BY created_at ASC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OutboxMessage {
                    id: row.try_get("id")?,
                    aggregate_id: row.try_get("aggregate_id")?,
                    event_type: row.try_get("event_type")?,
                    topic: row.try_get("topic")?,
                    payload: row.try_get("payload")?,
                    attempts: row.try_get("attempts")?,
                    last_error: row.try_get("last_error")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("UPDATE outbox_messages SET published_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), LedgerError> {
        sqlx::query("UPDATE outbox_messages SET attempts = $1, last_error = $2 WHERE id = $3")
            .bind(attempts)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_dead_lettered(&self, id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("UPDATE outbox_messages SET dead_lettered_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Query building and row mapping
// ============================================================================

fn push_filters(query: &mut QueryBuilder<'static, Postgres>, filter: &OrderFilter) {
    let mut separator = " WHERE ";

    if let Some(user_id) = &filter.user_id {
        query.push(separator).push("user_id = ").push_bind(user_id.clone());
        separator = " AND ";
    }
    if let Some(status) = filter.status {
        query.push(separator).push("status = ").push_bind(status.as_str());
        separator = " AND ";
    }
    if let Some(from) = filter.from_date {
        query.push(separator).push("created_at >= ").push_bind(from);
        separator = " AND ";
    }
    if let Some(to) = filter.to_date {
        query.push(separator).push("created_at <= ").push_bind(to);
    }
}

fn list_query(filter: &OrderFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
    push_filters(&mut query, filter);
    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(filter.limit())
        .push(" OFFSET ")
        .push_bind(filter.offset());
    query
}

fn count_query(filter: &OrderFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT COUNT(*) FROM orders");
    push_filters(&mut query, filter);
    query
}

fn order_from_row(row: &PgRow) -> Result<Order, LedgerError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<OrderStatus>()
        .map_err(|e| LedgerError::InvalidRow(e.to_string()))?;

    Ok(Order {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        user_id: row.try_get("user_id")?,
        status,
        total: row.try_get("total")?,
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, LedgerError> {
    Ok(OrderItem {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        product_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        variant: VariantAttributes {
            frame_size: row.try_get("frame_size")?,
            wheel_size: row.try_get("wheel_size")?,
            color: row.try_get("color")?,
            bike_type: row.try_get("bike_type")?,
        },
    })
}
