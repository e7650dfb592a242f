//! Product Aggregate (the subset checkout consumes)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub track_quantity: bool,
    pub stock_quantity: i32,
    pub allow_backorder: bool,
}

impl Product {
    /// Whether purchases of this product consume tracked inventory that may
    /// not be oversold.
    pub fn requires_stock(&self) -> bool { self.track_quantity && !self.allow_backorder }

    pub fn can_fulfil(&self, quantity: i32) -> bool {
        !self.requires_stock() || self.stock_quantity >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(track: bool, backorder: bool, stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(), category_id: None, name: "Widget".into(), price: dec!(10), currency: "USD".into(),
            is_active: true, track_quantity: track, stock_quantity: stock, allow_backorder: backorder,
        }
    }

    #[test]
    fn test_stock_rules() {
        assert!(product(true, false, 5).can_fulfil(5));
        assert!(!product(true, false, 5).can_fulfil(6));
        assert!(product(true, true, 0).can_fulfil(6));
        assert!(product(false, false, 0).can_fulfil(6));
    }
}
