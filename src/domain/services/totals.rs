//! Cart totals derived from line items, tax and the attached coupon.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{Cart, CartItem, Coupon};
use crate::domain::services::CouponValidator;
use crate::domain::value_objects::round_cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
}

/// Derives cart totals from line items and the freshly loaded coupon.
/// A previously stored discount is never reused.
#[derive(Clone, Debug)]
pub struct CartTotalsCalculator {
    tax_rate: Decimal,
    coupons: CouponValidator,
}

impl CartTotalsCalculator {
    pub fn new(tax_rate: Decimal, coupons: CouponValidator) -> Self { Self { tax_rate, coupons } }

    pub fn coupons(&self) -> &CouponValidator { &self.coupons }

    /// Discount `coupon` would give on `subtotal`, capped so the total
    /// cannot drop below zero. Eligibility is not checked.
    pub fn coupon_discount(&self, coupon: &Coupon, subtotal: Decimal) -> Decimal {
        self.coupons.discount(coupon, subtotal, subtotal + self.tax(subtotal))
    }

    fn tax(&self, subtotal: Decimal) -> Decimal { round_cents(subtotal * self.tax_rate) }

    pub fn compute(&self, items: &[CartItem], coupon: Option<&Coupon>, now: DateTime<Utc>) -> CartTotals {
        let subtotal: Decimal = items.iter().map(|i| i.total_price).sum();
        let tax_amount = self.tax(subtotal);
        let discount_amount = coupon
            .filter(|c| CouponValidator::check_window(c, subtotal, now).is_ok())
            .map_or(Decimal::ZERO, |c| self.coupon_discount(c, subtotal));
        let total = (subtotal + tax_amount - discount_amount).max(Decimal::ZERO);
        CartTotals { subtotal, tax_amount, discount_amount, total }
    }

    /// Writes fresh totals into `cart`. `coupon` is ignored unless it is the
    /// one attached to the cart.
    pub fn recompute(&self, cart: &mut Cart, coupon: Option<&Coupon>, now: DateTime<Utc>) -> CartTotals {
        let coupon = coupon.filter(|c| cart.coupon_id == Some(c.id));
        let totals = self.compute(&cart.items, coupon, now);
        cart.subtotal = totals.subtotal;
        cart.tax_amount = totals.tax_amount;
        cart.discount_amount = totals.discount_amount;
        cart.total = totals.total;
        totals
    }
}
