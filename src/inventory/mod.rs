// ============================================================================
// Stock Verifier - client for the inventory service
// ============================================================================
//
// Read-only availability check. Nothing here reserves or decrements stock:
// between a successful check and order persistence another order can take
// the same units. A successor design needs an atomic
// decrement-if-available primitive on the inventory side.
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::InMemoryStockVerifier;
pub use postgres::PostgresStockVerifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuery {
    pub product_id: String,
    pub quantity: i32,
}

impl StockQuery {
    pub fn new(product_id: impl Into<String>, quantity: i32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockResult {
    pub available: bool,
    pub unavailable: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("inventory lookup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("inventory service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait StockVerifier: Send + Sync {
    async fn check_stock(&self, items: &[StockQuery]) -> Result<StockResult, StockError>;
}

/// Sum requested quantities per product, keeping first-seen order.
pub(crate) fn required_quantities(items: &[StockQuery]) -> Vec<(String, i64)> {
    let mut required: Vec<(String, i64)> = Vec::with_capacity(items.len());
    for item in items {
        match required.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, qty)) => *qty += i64::from(item.quantity),
            None => required.push((item.product_id.clone(), i64::from(item.quantity))),
        }
    }
    required
}

/// Compare required quantities against current stock. Unknown products
/// (`None`) count as unavailable.
pub(crate) fn evaluate<F>(required: &[(String, i64)], current_stock: F) -> StockResult
where
    F: Fn(&str) -> Option<i64>,
{
    let unavailable: Vec<String> = required
        .iter()
        .filter(|(id, qty)| current_stock(id).map_or(true, |stock| stock < *qty))
        .map(|(id, _)| id.clone())
        .collect();

    StockResult {
        available: unavailable.is_empty(),
        unavailable,
    }
}
