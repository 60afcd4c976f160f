use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::NewOrder;
use super::errors::OrderError;
use super::events::{OrderCreatedEvent, OrderItemEvent};
use super::value_objects::{OrderItem, OrderStatus, TransitionPolicy};

// ============================================================================
// Order Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub version: i64,

    pub user_id: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub items: Vec<OrderItem>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build the row set for a new order. The caller is expected to have
    /// validated `new`; status is always `pending` and version starts at 1.
    pub fn from_new(new: &NewOrder, now: DateTime<Utc>) -> Result<Self, OrderError> {
        let total = new.resolved_total()?;
        let id = Uuid::new_v4();
        let items = new
            .items
            .iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: item.product_id.clone(),
                name: item.name.clone(),
                price: item.price,
                quantity: item.quantity,
                variant: item.variant.clone(),
            })
            .collect();

        Ok(Self {
            id,
            version: 1,
            user_id: new.user_id.clone(),
            status: OrderStatus::Pending,
            total,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a status change under `policy`, bumping the version.
    pub fn transition(&mut self, to: OrderStatus, policy: TransitionPolicy, now: DateTime<Utc>) -> Result<(), OrderError> {
        policy.check(self.status, to)?;
        self.status = to;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn created_event(&self) -> OrderCreatedEvent {
        OrderCreatedEvent::new(
            self.id,
            self.user_id.clone(),
            self.total,
            self.status,
            self.items.iter().map(OrderItemEvent::from).collect(),
            self.created_at,
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::NewOrderItem;

    fn sample() -> Order {
        let new = NewOrder::new(
            "u1",
            vec![
                NewOrderItem::new("p1", "City bike", Decimal::from(500), 1),
                NewOrderItem::new("p2", "Kids bike", Decimal::from(300), 2),
            ],
        );
        Order::from_new(&new, Utc::now()).unwrap()
    }

    #[test]
    fn test_new_order_is_pending_with_owned_items() {
        let order = sample();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.version, 1);
        assert_eq!(order.total, Decimal::from(1100));
        assert_eq!(order.items.len(), 2);
        assert!(order.items.iter().all(|i| i.order_id == order.id));
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn test_overflowing_total_is_an_error() {
        let new = NewOrder::new("u1", vec![NewOrderItem::new("p1", "City bike", Decimal::MAX, 2)]);

        assert_eq!(Order::from_new(&new, Utc::now()), Err(OrderError::TotalOutOfRange));
    }

    #[test]
    fn test_transition_bumps_version() {
        let mut order = sample();
        order
            .transition(OrderStatus::Paid, TransitionPolicy::Enforced, Utc::now())
            .unwrap();

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.version, 2);
    }

    #[test]
    fn test_rejected_transition_leaves_order_untouched() {
        let mut order = sample();
        let before = order.clone();

        let err = order
            .transition(OrderStatus::Delivered, TransitionPolicy::Enforced, Utc::now())
            .unwrap_err();

        assert!(matches!(err, OrderError::InvalidStatusTransition { .. }));
        assert_eq!(order, before);
    }

    #[test]
    fn test_created_event_snapshot() {
        let order = sample();
        let event = order.created_event();

        assert_eq!(event.order_id, order.id);
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.total, order.total);
        assert_eq!(event.status, OrderStatus::Pending);
        assert_eq!(event.items.len(), 2);
        assert_eq!(event.items[1].quantity, 2);
    }
}
