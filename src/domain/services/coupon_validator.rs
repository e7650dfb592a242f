//! Coupon eligibility and discount rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, CouponType};
use crate::domain::value_objects::round_cents;

/// Why a coupon cannot be used. Variants are listed in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon is not yet valid")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Order amount does not meet minimum requirement")]
    MinOrderNotMet,
    #[error("Coupon usage limit has been reached")]
    UsageLimitReached,
    #[error("You have reached the usage limit for this coupon")]
    UserUsageLimitReached,
    #[error("Coupon is not applicable to items in your cart")]
    NotApplicable,
    #[error("Coupon cannot be applied to one or more items in your cart")]
    ExcludedProduct,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::MinOrderNotMet => "min_order_not_met",
            Self::UsageLimitReached => "usage_limit_reached",
            Self::UserUsageLimitReached => "user_usage_limit_reached",
            Self::NotApplicable => "not_applicable",
            Self::ExcludedProduct => "excluded_product",
        }
    }
}

/// A cart line as the allow/exclude lists see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouponLine {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
}

/// Everything a validation needs besides the coupon itself.
#[derive(Debug, Clone)]
pub struct CouponContext<'a> {
    pub subtotal: Decimal,
    pub lines: &'a [CouponLine],
    /// Redemptions by this user, counted from the usage ledger.
    pub user_usage_count: i64,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CouponValidator {
    free_shipping_offset: Decimal,
}

impl CouponValidator {
    pub fn new(free_shipping_offset: Decimal) -> Self { Self { free_shipping_offset } }

    /// Runs every check in order; the first failure wins.
    pub fn validate(&self, coupon: &Coupon, ctx: &CouponContext<'_>) -> Result<(), CouponRejection> {
        Self::check_window(coupon, ctx.subtotal, ctx.now)?;
        if coupon.is_exhausted() {
            return Err(CouponRejection::UsageLimitReached);
        }
        if coupon.user_usage_limit.is_some_and(|limit| ctx.user_usage_count >= i64::from(limit)) {
            return Err(CouponRejection::UserUsageLimitReached);
        }
        if coupon.has_allow_list() && !ctx.lines.iter().any(|l| coupon.allows(l.product_id, l.category_id)) {
            return Err(CouponRejection::NotApplicable);
        }
        if ctx.lines.iter().any(|l| coupon.excludes(l.product_id)) {
            return Err(CouponRejection::ExcludedProduct);
        }
        Ok(())
    }

    /// The subset of checks that depend only on the coupon, the subtotal and
    /// the clock. Totals use this to decide whether an attached coupon still
    /// discounts anything.
    pub fn check_window(coupon: &Coupon, subtotal: Decimal, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !coupon.is_active || coupon.deleted_at.is_some() {
            return Err(CouponRejection::Inactive);
        }
        if coupon.starts_at.is_some_and(|at| now < at) {
            return Err(CouponRejection::NotYetValid);
        }
        if coupon.expires_at.is_some_and(|at| now > at) {
            return Err(CouponRejection::Expired);
        }
        if coupon.min_order_amount.is_some_and(|min| subtotal < min) {
            return Err(CouponRejection::MinOrderNotMet);
        }
        Ok(())
    }

    /// Discount for `subtotal`, capped by `max_discount_amount` and then by
    /// `ceiling` (what the cart would cost before the discount, tax included).
    pub fn discount(&self, coupon: &Coupon, subtotal: Decimal, ceiling: Decimal) -> Decimal {
        let raw = match coupon.kind {
            CouponType::Percentage => subtotal * coupon.value / Decimal::ONE_HUNDRED,
            CouponType::Fixed => coupon.value,
            CouponType::FreeShipping => self.free_shipping_offset,
        };
        let capped = coupon.max_discount_amount.map_or(raw, |cap| raw.min(cap));
        round_cents(capped.min(ceiling).max(Decimal::ZERO))
    }
}
