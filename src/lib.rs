//! OpenSASE Billing
//!
//! Transactional core of the billing platform: turns a user-editable cart
//! into an immutable invoice.
//!
//! ## Features
//! - Cart pricing with keyed price-integrity tokens
//! - Coupon validation, discounting and a redemption ledger
//! - All-or-nothing checkout (invoice, stock, coupon usage, cart status)
//! - Payment webhook settlement and service activation

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::CartError;
use crate::domain::services::{CouponRejection, StockError};
use crate::infrastructure::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cart is empty")]
    EmptyCart,

    #[error("cart has expired")]
    CartExpired,

    #[error("product {0} is no longer available")]
    ProductUnavailable(Uuid),

    /// Details are for the server log only.
    #[error("cart integrity check failed")]
    IntegrityViolation { item_id: Uuid, product_id: Uuid },

    #[error("insufficient stock for product {product_id}: {available} available, {requested} requested")]
    InsufficientStock { product_id: Uuid, available: i32, requested: i32 },

    #[error("coupon invalid: {}", .0.code())]
    CouponInvalid(CouponRejection),

    #[error("cart totals do not match its items (stored {stored}, expected {expected})")]
    TotalsMismatch { expected: Decimal, stored: Decimal },

    #[error("checkout failed")]
    CheckoutFailed,

    #[error("authentication required")]
    Unauthorized,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CartError> for BillingError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound => Self::NotFound("cart item"),
            CartError::Integrity { item_id, product_id } => Self::IntegrityViolation { item_id, product_id },
            CartError::InsufficientStock { product_id, available, requested } => Self::InsufficientStock { product_id, available, requested },
            CartError::Quantity(e) => Self::Validation(e.to_string()),
            CartError::NoCouponApplied => Self::Validation("no coupon applied to cart".to_string()),
            CartError::NotActive(_) => Self::NotFound("active cart"),
        }
    }
}

impl From<StockError> for BillingError {
    fn from(e: StockError) -> Self {
        match e {
            StockError::Insufficient { product_id, available, requested } => Self::InsufficientStock { product_id, available, requested },
            StockError::Store(e) => Self::Store(e),
        }
    }
}

impl From<CouponRejection> for BillingError {
    fn from(e: CouponRejection) -> Self { Self::CouponInvalid(e) }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, BillingError>;
