//! Cart to invoice conversion.
//!
//! Pre-checks run against plain reads and fail fast with a correctable
//! error. The commit phase then runs every write through a single
//! [`StoreTransaction`]: invoice, stock, coupon ledger and cart status land
//! together or not at all.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::application::cart_service::coupon_lines;
use crate::application::payments::{validate_payment_method, PaymentInitiator, PaymentMethod};
use crate::application::rollback;
use crate::domain::aggregates::{Cart, Coupon, CouponUsage, Invoice, Product};
use crate::domain::events::DomainEvent;
use crate::domain::services::{CartTotalsCalculator, CouponContext, CouponRejection, PriceIntegrityGuard, StockLedger};
use crate::infrastructure::{BillingStore, EventPublisher, StoreTransaction};
use crate::{BillingError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(custom = "validate_payment_method")]
    pub payment_method: String,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub payment_url: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Clone)]
pub struct CheckoutTransaction {
    store: Arc<dyn BillingStore>,
    guard: Arc<PriceIntegrityGuard>,
    totals: CartTotalsCalculator,
    stock: StockLedger,
    payments: Arc<dyn PaymentInitiator>,
    events: EventPublisher,
    invoice_due: Duration,
}

/// Everything the commit phase writes, gathered by the pre-checks.
struct CheckoutPlan {
    cart: Cart,
    invoice: Invoice,
    products: HashMap<Uuid, Product>,
    coupon: Option<Coupon>,
}

impl CheckoutTransaction {
    pub fn new(
        store: Arc<dyn BillingStore>,
        guard: Arc<PriceIntegrityGuard>,
        totals: CartTotalsCalculator,
        payments: Arc<dyn PaymentInitiator>,
        events: EventPublisher,
        invoice_due: Duration,
    ) -> Self {
        Self { store, guard, totals, stock: StockLedger, payments, events, invoice_due }
    }

    pub async fn checkout(&self, user_id: Uuid, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        request.validate()?;
        let method: PaymentMethod = request.payment_method.parse()
            .map_err(|_| BillingError::Validation(format!("unsupported payment method {}", request.payment_method)))?;
        let now = Utc::now();
        let plan = self.prepare(user_id, method, request.notes, now).await?;
        self.commit(&plan, now).await?;

        let CheckoutPlan { cart, invoice, coupon, .. } = plan;
        tracing::info!(%user_id, cart_id = %cart.id, invoice_id = %invoice.id, total = %invoice.total, "checkout completed");
        self.events.publish(DomainEvent::CheckoutCompleted {
            invoice_id: invoice.id, cart_id: cart.id, user_id, total: invoice.total, currency: invoice.currency.clone(),
        }).await;
        if let Some(coupon) = coupon {
            self.events.publish(DomainEvent::CouponRedeemed {
                coupon_id: coupon.id, user_id, invoice_id: invoice.id, discount_amount: invoice.discount_amount,
            }).await;
        }

        let amount = invoice.amount_due();
        Ok(CheckoutReceipt {
            payment_url: self.payments.payment_url(method, &invoice),
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number,
            amount: amount.amount(),
            currency: amount.currency().to_string(),
        })
    }

    /// Re-runs every validation against fresh reads. Nothing is written.
    async fn prepare(&self, user_id: Uuid, method: PaymentMethod, notes: Option<String>, now: DateTime<Utc>) -> Result<CheckoutPlan> {
        let mut cart = self.store.find_active_cart(user_id).await?.ok_or(BillingError::NotFound("active cart"))?;
        if cart.is_expired(now) {
            return Err(BillingError::CartExpired);
        }
        if cart.is_empty() {
            return Err(BillingError::EmptyCart);
        }

        for item in &cart.items {
            if !self.guard.verify(item.product_id, item.unit_price, &item.price_hash) {
                tracing::warn!(target: "security", %user_id, cart_id = %cart.id, item_id = %item.id, product_id = %item.product_id,
                    unit_price = %item.unit_price, "price integrity violation at checkout");
                return Err(BillingError::IntegrityViolation { item_id: item.id, product_id: item.product_id });
            }
        }

        if let Some(line) = cart.inconsistent_line() {
            return Err(BillingError::TotalsMismatch { expected: line.line_total(), stored: line.total_price });
        }
        let expected = cart.items_subtotal();
        if cart.subtotal != expected {
            return Err(BillingError::TotalsMismatch { expected, stored: cart.subtotal });
        }

        let ids: Vec<Uuid> = cart.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, Product> = self.store.find_products(&ids).await?.into_iter().map(|p| (p.id, p)).collect();
        for item in &cart.items {
            let product = products.get(&item.product_id).filter(|p| p.is_active).ok_or(BillingError::ProductUnavailable(item.product_id))?;
            self.stock.check(product, item.quantity)?;
        }

        let coupon = match cart.coupon_id {
            Some(coupon_id) => {
                let coupon = self.store.find_coupon(coupon_id).await?.ok_or(BillingError::CouponInvalid(CouponRejection::Inactive))?;
                let lines = coupon_lines(self.store.as_ref(), &cart.items).await?;
                let user_usage_count = self.store.count_coupon_usages(coupon.id, user_id).await?;
                let ctx = CouponContext { subtotal: expected, lines: &lines, user_usage_count, now };
                self.totals.coupons().validate(&coupon, &ctx)?;
                Some(coupon)
            }
            None => None,
        };

        self.totals.recompute(&mut cart, coupon.as_ref(), now);
        let invoice = Invoice::from_cart(&cart, method.as_ref(), notes, self.invoice_due, now);
        Ok(CheckoutPlan { cart, invoice, products, coupon })
    }

    async fn commit(&self, plan: &CheckoutPlan, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.store.begin().await.map_err(|e| commit_fault(plan, e.into()))?;
        if let Err(e) = self.write(tx.as_mut(), plan, now).await {
            rollback(tx).await;
            return Err(commit_fault(plan, e));
        }
        tx.commit().await.map_err(|e| commit_fault(plan, e.into()))
    }

    /// Invoice first, then stock, then the coupon ledger, then the cart.
    async fn write(&self, tx: &mut dyn StoreTransaction, plan: &CheckoutPlan, now: DateTime<Utc>) -> Result<()> {
        let CheckoutPlan { cart, invoice, products, coupon } = plan;
        tx.insert_invoice(invoice).await?;

        for item in &cart.items {
            let product = products.get(&item.product_id).ok_or(BillingError::ProductUnavailable(item.product_id))?;
            self.stock.reserve(tx, product, item.quantity).await?;
        }

        if let Some(coupon) = coupon {
            if tx.increment_coupon_usage(coupon.id).await? == 0 {
                return Err(BillingError::CouponInvalid(CouponRejection::UsageLimitReached));
            }
            // The increment holds the coupon row, so this count cannot race
            // another redemption by the same user.
            let used = tx.count_coupon_usages(coupon.id, cart.user_id).await?;
            if coupon.user_usage_limit.is_some_and(|limit| used >= i64::from(limit)) {
                return Err(BillingError::CouponInvalid(CouponRejection::UserUsageLimitReached));
            }
            tx.insert_coupon_usage(&CouponUsage {
                id: Uuid::now_v7(), coupon_id: coupon.id, user_id: cart.user_id, cart_id: cart.id,
                invoice_id: invoice.id, discount_amount: invoice.discount_amount, used_at: now,
            }).await?;
        }

        if tx.complete_cart(cart).await? == 0 {
            return Err(BillingError::CheckoutFailed);
        }
        Ok(())
    }
}

/// Lost races on stock or coupon usage keep their meaning; anything else in
/// the commit phase is a fault and reported as `CheckoutFailed`.
fn commit_fault(plan: &CheckoutPlan, e: BillingError) -> BillingError {
    match e {
        BillingError::InsufficientStock { .. } | BillingError::CouponInvalid(_) => {
            tracing::info!(cart_id = %plan.cart.id, error = %e, "checkout lost a race");
            e
        }
        e => {
            tracing::error!(cart_id = %plan.cart.id, invoice_id = %plan.invoice.id, error = %e, "checkout commit failed, rolled back");
            BillingError::CheckoutFailed
        }
    }
}
