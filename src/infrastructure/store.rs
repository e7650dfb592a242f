//! Persistence ports.
//!
//! Reads outside a checkout go through [`BillingStore`]. Every write of the
//! commit phase goes through one [`StoreTransaction`] handed explicitly to
//! each step, so they cannot end up on different connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Coupon, CouponType, CouponUsage, Invoice, Product};
use crate::domain::value_objects::CouponCode;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("injected fault: {0}")]
    Fault(&'static str),
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// The user's `active` cart with its items, whatever its expiry.
    async fn find_active_cart(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError>;
    /// Fails with [`StoreError::Conflict`] if the user already has an active cart.
    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError>;
    /// Persists cart fields and replaces its item set. Fails with
    /// [`StoreError::Conflict`] unless the stored cart is still `active`, so a
    /// stale copy cannot reopen a completed cart.
    async fn save_cart(&self, cart: &Cart) -> Result<(), StoreError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;

    /// Soft-deleted coupons are reported as absent.
    async fn find_coupon(&self, id: Uuid) -> Result<Option<Coupon>, StoreError>;
    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError>;
    /// One page of [`Coupon::is_discoverable`] coupons ordered by code, with
    /// the number of matches across all pages.
    async fn list_public_coupons(&self, kind: Option<CouponType>, now: DateTime<Utc>, limit: i64, offset: i64) -> Result<(Vec<Coupon>, i64), StoreError>;
    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: Uuid) -> Result<i64, StoreError>;

    async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One database transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Inserts the invoice row and all of its items.
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    /// `stock_quantity -= quantity WHERE stock_quantity >= quantity`; returns affected rows.
    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<u64, StoreError>;
    async fn stock_level(&mut self, product_id: Uuid) -> Result<Option<i32>, StoreError>;

    /// `used_count += 1 WHERE usage_limit IS NULL OR used_count < usage_limit`;
    /// returns affected rows. Locks the coupon row until the transaction ends.
    async fn increment_coupon_usage(&mut self, coupon_id: Uuid) -> Result<u64, StoreError>;
    async fn count_coupon_usages(&mut self, coupon_id: Uuid, user_id: Uuid) -> Result<i64, StoreError>;
    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<(), StoreError>;

    /// Writes final totals and flips the cart to `completed` if it is still
    /// `active`; returns affected rows.
    async fn complete_cart(&mut self, cart: &Cart) -> Result<u64, StoreError>;

    /// Marks a pending or overdue invoice paid; returns affected rows.
    async fn mark_invoice_paid(&mut self, invoice_id: Uuid, payment_id: &str, payment_method: &str, paid_at: DateTime<Utc>) -> Result<u64, StoreError>;
    /// Activates a `pending` service; returns affected rows.
    async fn activate_service(&mut self, service_id: Uuid, activated_at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
