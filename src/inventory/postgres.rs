use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{evaluate, required_quantities, StockError, StockQuery, StockResult, StockVerifier};

/// Reads current stock from the inventory `products` table in one query.
#[derive(Clone)]
pub struct PostgresStockVerifier {
    pool: PgPool,
}

impl PostgresStockVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockVerifier for PostgresStockVerifier {
    async fn check_stock(&self, items: &[StockQuery]) -> Result<StockResult, StockError> {
        let required = required_quantities(items);
        let ids: Vec<String> = required.iter().map(|(id, _)| id.clone()).collect();

        let rows = sqlx::query("SELECT id, stock FROM products WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        let mut stock = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let level: i32 = row.try_get("stock")?;
            stock.insert(id, i64::from(level));
        }

        let result = evaluate(&required, |id| stock.get(id).copied());

        tracing::debug!(
            products = ids.len(),
            available = result.available,
            unavailable = ?result.unavailable,
            "Checked stock"
        );

        Ok(result)
    }
}
