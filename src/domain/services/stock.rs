//! Inventory reservation during checkout.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::infrastructure::{StoreError, StoreTransaction};

#[derive(Debug, Error)]
pub enum StockError {
    #[error("insufficient stock for product {product_id}: {available} available, {requested} requested")]
    Insufficient { product_id: Uuid, available: i32, requested: i32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Guards `stock_quantity` for products that track inventory without
/// backorders. Other products pass through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct StockLedger;

impl StockLedger {
    /// Pre-commit check against a freshly loaded product row.
    pub fn check(&self, product: &Product, quantity: i32) -> Result<(), StockError> {
        if product.can_fulfil(quantity) { return Ok(()); }
        Err(StockError::Insufficient { product_id: product.id, available: product.stock_quantity, requested: quantity })
    }

    /// Decrements stock inside `tx` with a single conditional update. Zero
    /// affected rows means another checkout got there first.
    pub async fn reserve(&self, tx: &mut dyn StoreTransaction, product: &Product, quantity: i32) -> Result<(), StockError> {
        if !product.requires_stock() { return Ok(()); }
        let affected = tx.decrement_stock(product.id, quantity).await?;
        if affected == 0 {
            let available = tx.stock_level(product.id).await?.unwrap_or(0);
            tracing::info!(product_id = %product.id, available, requested = quantity, "stock reservation lost");
            return Err(StockError::Insufficient { product_id: product.id, available, requested: quantity });
        }
        Ok(())
    }
}
