use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{evaluate, required_quantities, StockError, StockQuery, StockResult, StockVerifier};

/// Stock levels held in process. Used by tests and the demo wiring.
#[derive(Default)]
pub struct InMemoryStockVerifier {
    stock: RwLock<HashMap<String, i64>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryStockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            stock: RwLock::new(levels.into_iter().map(|(id, qty)| (id.into(), qty)).collect()),
            ..Default::default()
        }
    }

    pub async fn set_stock(&self, product_id: impl Into<String>, quantity: i64) {
        self.stock.write().await.insert(product_id.into(), quantity);
    }

    /// Make every subsequent check fail as if the service were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StockVerifier for InMemoryStockVerifier {
    async fn check_stock(&self, items: &[StockQuery]) -> Result<StockResult, StockError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StockError::Unavailable("inventory offline".to_string()));
        }

        let stock = self.stock.read().await;
        let required = required_quantities(items);
        Ok(evaluate(&required, |id| stock.get(id).copied()))
    }
}
