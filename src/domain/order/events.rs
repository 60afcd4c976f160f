use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{OrderItem, OrderStatus, VariantAttributes};

// ============================================================================
// Order Events
// ============================================================================

/// Current wire schema of [`OrderCreatedEvent`]. Bump when a field changes
/// meaning; additive optional fields keep the same number.
pub const ORDER_CREATED_SCHEMA_VERSION: u32 = 1;

/// Immutable snapshot published once per created order.
///
/// Consumers may see the same event more than once and must key any side
/// effect on `order_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCreatedEvent {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub order_id: Uuid,
    pub user_id: String,
    pub total: Decimal,
    pub status: OrderStatus,
    pub items: Vec<OrderItemEvent>,
    pub created_at: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    ORDER_CREATED_SCHEMA_VERSION
}

impl OrderCreatedEvent {
    pub const EVENT_TYPE: &'static str = "OrderCreated";

    pub fn new(
        order_id: Uuid,
        user_id: String,
        total: Decimal,
        status: OrderStatus,
        items: Vec<OrderItemEvent>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: ORDER_CREATED_SCHEMA_VERSION,
            order_id,
            user_id,
            total,
            status,
            items,
            created_at,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderItemEvent {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    #[serde(default, flatten)]
    pub variant: VariantAttributes,
}

impl From<&OrderItem> for OrderItemEvent {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            name: item.name.clone(),
            price: item.price,
            quantity: item.quantity,
            variant: item.variant.clone(),
        }
    }
}
