use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::value_objects::{NewOrderItem, OrderStatus};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Decimal places stored for prices and totals (`NUMERIC(12, 2)`).
pub const MONEY_SCALE: u32 = 2;

/// Largest amount a `NUMERIC(12, 2)` column holds: 9,999,999,999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, MONEY_SCALE);

/// Request to create an order. Status and identifiers are always assigned by
/// the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: String,
    pub items: Vec<NewOrderItem>,
    /// Caller-supplied total. `None` or zero means "compute from items".
    #[serde(default)]
    pub total: Option<Decimal>,
}

impl NewOrder {
    pub fn new(user_id: impl Into<String>, items: Vec<NewOrderItem>) -> Self {
        Self {
            user_id: user_id.into(),
            items,
            total: None,
        }
    }

    pub fn with_total(mut self, total: Decimal) -> Self {
        self.total = Some(total);
        self
    }

    pub fn validate(&self) -> Result<(), OrderError> {
        if self.user_id.trim().is_empty() {
            return Err(OrderError::MissingUserId);
        }
        validate_items(&self.items)?;
        if let Some(total) = self.total {
            if total < Decimal::ZERO {
                return Err(OrderError::NegativeTotal);
            }
            if !fits_scale(total) {
                return Err(OrderError::TotalTooPrecise);
            }
        }
        self.resolved_total().map(|_| ())
    }

    /// The caller's total, or the sum of the line totals when it is absent
    /// or zero. Fails when the result does not fit the stored column.
    pub fn resolved_total(&self) -> Result<Decimal, OrderError> {
        let total = match self.total {
            Some(total) if !total.is_zero() => total,
            _ => compute_total(&self.items)?,
        };
        if total > MAX_AMOUNT {
            return Err(OrderError::TotalOutOfRange);
        }
        Ok(total)
    }
}

/// Shape checks shared by the orchestrator and the ledger. Item indices in
/// errors are 1-based.
pub fn validate_items(items: &[NewOrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    for (i, item) in items.iter().enumerate() {
        let index = i + 1;
        if item.product_id.trim().is_empty() {
            return Err(OrderError::MissingProductId(index));
        }
        if item.name.trim().is_empty() {
            return Err(OrderError::MissingProductName(index));
        }
        if item.price < Decimal::ZERO {
            return Err(OrderError::NegativePrice(index));
        }
        if item.price > MAX_AMOUNT {
            return Err(OrderError::PriceOutOfRange(index));
        }
        if !fits_scale(item.price) {
            return Err(OrderError::PriceTooPrecise(index));
        }
        if item.quantity <= 0 {
            return Err(OrderError::InvalidQuantity {
                index,
                quantity: item.quantity,
            });
        }
    }

    Ok(())
}

pub fn compute_total(items: &[NewOrderItem]) -> Result<Decimal, OrderError> {
    items.iter().try_fold(Decimal::ZERO, |acc, item| {
        item.line_total()
            .and_then(|line| acc.checked_add(line))
            .ok_or(OrderError::TotalOutOfRange)
    })
}

/// Trailing zeros do not count: `10.500` is stored exactly as `10.50`.
fn fits_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    /// When set, the update only applies if the stored version still matches.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl StatusUpdate {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            status,
            expected_version: None,
        }
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

impl OrderFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn limit(&self) -> i64 {
        if self.page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(MAX_PAGE_SIZE)
        }
    }

    /// Rows to skip. Saturates instead of overflowing for absurd pages,
    /// which then simply return nothing.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.limit())
    }
}
