use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Descriptive variant attributes of a line item.
///
/// These are opaque labels carried through to the order and the event; they
/// are never checked against inventory.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct VariantAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheel_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bike_type: Option<String>,
}

/// A line item as requested by the caller, before it is persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewOrderItem {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    #[serde(default, flatten)]
    pub variant: VariantAttributes,
}

impl NewOrderItem {
    pub fn new(product_id: impl Into<String>, name: impl Into<String>, price: Decimal, quantity: i32) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            price,
            quantity,
            variant: VariantAttributes::default(),
        }
    }

    pub fn with_variant(mut self, variant: VariantAttributes) -> Self {
        self.variant = variant;
        self
    }

    /// `None` when the product does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

/// A persisted line item, owned by exactly one order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    #[serde(default, flatten)]
    pub variant: VariantAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Successor states permitted by the transition table.
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// How strictly status changes are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Only moves listed in [`OrderStatus::allowed_next`] are accepted.
    #[default]
    Enforced,
    /// Any status may follow any other. Kept for deployments that rely on
    /// administrative corrections such as `delivered -> pending`.
    Permissive,
}

impl TransitionPolicy {
    pub fn check(&self, from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        match self {
            TransitionPolicy::Permissive => Ok(()),
            TransitionPolicy::Enforced if from.can_transition_to(to) => Ok(()),
            TransitionPolicy::Enforced => Err(OrderError::InvalidStatusTransition { from, to }),
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enforced" => Ok(TransitionPolicy::Enforced),
            "permissive" => Ok(TransitionPolicy::Permissive),
            other => Err(OrderError::UnknownPolicy(other.to_string())),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "refunded".parse::<OrderStatus>().unwrap_err();
        assert!(matches!(err, OrderError::UnknownStatus(s) if s == "refunded"));

        let json = serde_json::from_str::<OrderStatus>("\"PENDING\"");
        assert!(json.is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OrderStatus::Shipped).unwrap(), "\"shipped\"");
    }

    #[test]
    fn test_transition_table() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));

        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));

        for status in OrderStatus::ALL {
            assert!(!OrderStatus::Delivered.can_transition_to(status));
            assert!(!OrderStatus::Cancelled.can_transition_to(status));
        }
    }

    #[test]
    fn test_permissive_policy_allows_anything() {
        let policy = TransitionPolicy::Permissive;
        assert!(policy.check(OrderStatus::Delivered, OrderStatus::Pending).is_ok());

        let policy = TransitionPolicy::Enforced;
        assert!(matches!(
            policy.check(OrderStatus::Delivered, OrderStatus::Pending),
            Err(OrderError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn test_line_total() {
        let item = NewOrderItem::new("p2", "Road bike", Decimal::from(300), 2);
        assert_eq!(item.line_total(), Some(Decimal::from(600)));

        let huge = NewOrderItem::new("p1", "Road bike", Decimal::MAX, 2);
        assert_eq!(huge.line_total(), None);
    }

    #[test]
    fn test_variant_attributes_are_flattened() {
        let item = NewOrderItem::new("p1", "Gravel", Decimal::from(10), 1).with_variant(VariantAttributes {
            color: Some("red".to_string()),
            ..Default::default()
        });

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["color"], "red");
        assert!(json.get("frame_size").is_none());
    }
}
