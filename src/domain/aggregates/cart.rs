//! Cart Aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::domain::services::PriceIntegrityGuard;
use crate::domain::value_objects::{CouponCode, Quantity, QuantityError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CartStatus {
    #[default]
    Active,
    Abandoned,
    Completed,
    Expired,
}

/// A user's cart. Totals are derived by `CartTotalsCalculator` after every
/// mutation and are never edited directly by callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CartStatus,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line item with the price snapshot taken when the product was added.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    #[serde(skip_serializing, default)]
    pub price_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal { self.unit_price * Decimal::from(self.quantity) }

    fn set_quantity(&mut self, quantity: i32, now: DateTime<Utc>) {
        self.quantity = quantity;
        self.total_price = self.line_total();
        self.updated_at = now;
    }
}

impl Cart {
    pub fn open(user_id: Uuid, currency: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), user_id, status: CartStatus::Active,
            subtotal: Decimal::ZERO, tax_amount: Decimal::ZERO, discount_amount: Decimal::ZERO, total: Decimal::ZERO,
            currency: currency.to_string(), coupon_id: None, coupon_code: None,
            expires_at: Some(now + ttl), items: vec![], created_at: now, updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.expires_at.is_some_and(|at| at <= now) }
    pub fn item(&self, item_id: Uuid) -> Option<&CartItem> { self.items.iter().find(|i| i.id == item_id) }

    /// Adds `quantity` of `product`, merging into an existing line for the
    /// same product. The existing line's price token is verified first.
    pub fn add_item(&mut self, product: &Product, quantity: Quantity, guard: &PriceIntegrityGuard, now: DateTime<Utc>) -> Result<&CartItem, CartError> {
        self.ensure_active()?;
        let position = match self.items.iter().position(|i| i.product_id == product.id) {
            Some(position) => {
                let existing = &mut self.items[position];
                if !guard.verify(existing.product_id, existing.unit_price, &existing.price_hash) {
                    return Err(CartError::Integrity { item_id: existing.id, product_id: existing.product_id });
                }
                let merged = Quantity::new(existing.quantity)?.add(quantity)?;
                if !product.can_fulfil(merged.value()) {
                    return Err(CartError::InsufficientStock { product_id: product.id, available: product.stock_quantity, requested: merged.value() });
                }
                existing.set_quantity(merged.value(), now);
                position
            }
            None => {
                if !product.can_fulfil(quantity.value()) {
                    return Err(CartError::InsufficientStock { product_id: product.id, available: product.stock_quantity, requested: quantity.value() });
                }
                self.items.push(CartItem {
                    id: Uuid::now_v7(), cart_id: self.id, product_id: product.id, description: product.name.clone(),
                    quantity: quantity.value(), unit_price: product.price, total_price: product.price * Decimal::from(quantity.value()),
                    price_hash: guard.bind(product.id, product.price), created_at: now, updated_at: now,
                });
                self.items.len() - 1
            }
        };
        self.updated_at = now;
        Ok(&self.items[position])
    }

    /// Sets an item's quantity; zero removes the line.
    pub fn update_item(&mut self, item_id: Uuid, quantity: i32, product: &Product, guard: &PriceIntegrityGuard, now: DateTime<Utc>) -> Result<(), CartError> {
        self.ensure_active()?;
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(CartError::ItemNotFound)?;
        if !guard.verify(item.product_id, item.unit_price, &item.price_hash) {
            return Err(CartError::Integrity { item_id: item.id, product_id: item.product_id });
        }
        if quantity == 0 {
            self.items.retain(|i| i.id != item_id);
        } else {
            let quantity = Quantity::new(quantity)?;
            if !product.can_fulfil(quantity.value()) {
                return Err(CartError::InsufficientStock { product_id: product.id, available: product.stock_quantity, requested: quantity.value() });
            }
            item.set_quantity(quantity.value(), now);
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: Uuid, now: DateTime<Utc>) -> Result<(), CartError> {
        self.ensure_active()?;
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.updated_at = now;
        Ok(())
    }

    /// Empties the cart and drops any applied coupon.
    pub fn clear(&mut self, now: DateTime<Utc>) -> Result<(), CartError> {
        self.ensure_active()?;
        self.items.clear();
        self.coupon_id = None;
        self.coupon_code = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn attach_coupon(&mut self, coupon_id: Uuid, code: &CouponCode, now: DateTime<Utc>) -> Result<(), CartError> {
        self.ensure_active()?;
        self.coupon_id = Some(coupon_id);
        self.coupon_code = Some(code.to_string());
        self.updated_at = now;
        Ok(())
    }

    pub fn detach_coupon(&mut self, now: DateTime<Utc>) -> Result<(), CartError> {
        self.ensure_active()?;
        if self.coupon_id.is_none() { return Err(CartError::NoCouponApplied); }
        self.coupon_id = None;
        self.coupon_code = None;
        self.updated_at = now;
        Ok(())
    }

    /// Sum of the stored line totals.
    pub fn items_subtotal(&self) -> Decimal { self.items.iter().map(|i| i.total_price).sum() }

    /// First line whose stored total disagrees with `unit_price * quantity`.
    pub fn inconsistent_line(&self) -> Option<&CartItem> { self.items.iter().find(|i| i.total_price != i.line_total()) }

    pub fn extend_expiry(&mut self, ttl: Duration, now: DateTime<Utc>) { self.expires_at = Some(now + ttl); }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = CartStatus::Expired;
        self.updated_at = now;
    }

    fn ensure_active(&self) -> Result<(), CartError> {
        if self.status != CartStatus::Active { return Err(CartError::NotActive(self.status)); }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("cart item not found")]
    ItemNotFound,
    #[error("cart item {item_id} failed price verification")]
    Integrity { item_id: Uuid, product_id: Uuid },
    #[error("insufficient stock for product {product_id}: {available} available, {requested} requested")]
    InsufficientStock { product_id: Uuid, available: i32, requested: i32 },
    #[error("{0}")]
    Quantity(#[from] QuantityError),
    #[error("no coupon applied to cart")]
    NoCouponApplied,
    #[error("cart is {0}")]
    NotActive(CartStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn guard() -> PriceIntegrityGuard { PriceIntegrityGuard::new(b"test-secret-that-is-long-enough-1234").unwrap() }

    fn widget(stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(), category_id: None, name: "Widget".into(), price: dec!(10), currency: "USD".into(),
            is_active: true, track_quantity: true, stock_quantity: stock, allow_backorder: false,
        }
    }

    #[test]
    fn test_cart_operations() {
        let (guard, now, p) = (guard(), Utc::now(), widget(10));
        let mut cart = Cart::open(Uuid::new_v4(), "USD", Duration::days(30), now);
        cart.add_item(&p, Quantity::new(2).unwrap(), &guard, now).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items_subtotal(), dec!(20));
        cart.add_item(&p, Quantity::new(1).unwrap(), &guard, now).unwrap();
        assert_eq!(cart.items[0].quantity, 3); // Merged
        assert_eq!(cart.items[0].total_price, dec!(30));
    }

    #[test]
    fn test_merge_checks_stock_against_merged_quantity() {
        let (guard, now, p) = (guard(), Utc::now(), widget(3));
        let mut cart = Cart::open(Uuid::new_v4(), "USD", Duration::days(30), now);
        cart.add_item(&p, Quantity::new(2).unwrap(), &guard, now).unwrap();
        let err = cart.add_item(&p, Quantity::new(2).unwrap(), &guard, now).unwrap_err();
        assert_eq!(err, CartError::InsufficientStock { product_id: p.id, available: 3, requested: 4 });
    }

    #[test]
    fn test_tampered_price_blocks_update() {
        let (guard, now, p) = (guard(), Utc::now(), widget(10));
        let mut cart = Cart::open(Uuid::new_v4(), "USD", Duration::days(30), now);
        let item_id = cart.add_item(&p, Quantity::new(1).unwrap(), &guard, now).unwrap().id;
        cart.items[0].unit_price = dec!(0.01);
        assert!(matches!(cart.update_item(item_id, 2, &p, &guard, now), Err(CartError::Integrity { .. })));
    }

    #[test]
    fn test_update_to_zero_removes_and_clear_drops_coupon() {
        let (guard, now, p) = (guard(), Utc::now(), widget(10));
        let mut cart = Cart::open(Uuid::new_v4(), "USD", Duration::days(30), now);
        let item_id = cart.add_item(&p, Quantity::new(1).unwrap(), &guard, now).unwrap().id;
        cart.update_item(item_id, 0, &p, &guard, now).unwrap();
        assert!(cart.is_empty());

        cart.attach_coupon(Uuid::new_v4(), &CouponCode::new("save10").unwrap(), now).unwrap();
        cart.clear(now).unwrap();
        assert_eq!(cart.coupon_id, None);
        assert_eq!(cart.detach_coupon(now), Err(CartError::NoCouponApplied));
    }

    #[test]
    fn test_completed_cart_is_frozen() {
        let (guard, now, p) = (guard(), Utc::now(), widget(10));
        let mut cart = Cart::open(Uuid::new_v4(), "USD", Duration::days(30), now);
        cart.status = CartStatus::Completed;
        assert_eq!(cart.add_item(&p, Quantity::new(1).unwrap(), &guard, now).unwrap_err(), CartError::NotActive(CartStatus::Completed));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let cart = Cart::open(Uuid::new_v4(), "USD", Duration::days(1), now);
        assert!(!cart.is_expired(now));
        assert!(cart.is_expired(now + Duration::days(2)));
    }
}
