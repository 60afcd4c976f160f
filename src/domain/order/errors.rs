use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("user ID is required")]
    MissingUserId,

    #[error("order must contain at least one item")]
    EmptyItems,

    #[error("product ID is required for item {0}")]
    MissingProductId(usize),

    #[error("product name is required for item {0}")]
    MissingProductName(usize),

    #[error("product price cannot be negative for item {0}")]
    NegativePrice(usize),

    #[error("product price for item {0} exceeds {max}", max = super::MAX_AMOUNT)]
    PriceOutOfRange(usize),

    #[error("product price for item {0} has more than {places} decimal places", places = super::MONEY_SCALE)]
    PriceTooPrecise(usize),

    #[error("product quantity must be positive for item {index} (got {quantity})")]
    InvalidQuantity { index: usize, quantity: i32 },

    #[error("order total cannot be negative")]
    NegativeTotal,

    #[error("order total exceeds {max}", max = super::MAX_AMOUNT)]
    TotalOutOfRange,

    #[error("order total has more than {places} decimal places", places = super::MONEY_SCALE)]
    TotalTooPrecise,

    #[error("cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("unknown order status: {0}")]
    UnknownStatus(String),

    #[error("unknown transition policy: {0}")]
    UnknownPolicy(String),
}
