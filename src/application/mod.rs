//! Use cases: cart editing, checkout, payment settlement and coupon discovery
pub mod cart_service;
pub mod checkout;
pub mod coupon_catalog;
pub mod payments;

pub use cart_service::{AddItemRequest, ApplyCouponRequest, CartService, CheckoutSummary, CouponCheck, UpdateItemRequest};
pub use checkout::{CheckoutReceipt, CheckoutRequest, CheckoutTransaction};
pub use coupon_catalog::{CouponCatalog, PageMeta, PublicCoupon, PublicCouponPage, PublicCouponQuery};
pub use payments::{HostedCheckoutLinks, PaymentInitiator, PaymentMethod, PaymentWebhook, PaymentWebhookHandler, WebhookOutcome};

use chrono::Duration;
use std::sync::Arc;

use crate::config::{BillingConfig, ConfigError};
use crate::domain::services::{CartTotalsCalculator, CouponValidator, PriceIntegrityGuard};
use crate::infrastructure::{BillingStore, EventPublisher, StoreTransaction};

#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub checkout: CheckoutTransaction,
    pub webhooks: PaymentWebhookHandler,
    pub coupons: CouponCatalog,
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: Arc<dyn BillingStore>, config: &BillingConfig, events: EventPublisher) -> Result<Self, ConfigError> {
        let guard = PriceIntegrityGuard::new(config.price_integrity_secret.as_bytes())
            .map_err(|e| ConfigError::WeakSecret(e.min))?;
        let guard = Arc::new(guard);
        let totals = CartTotalsCalculator::new(config.tax_rate, CouponValidator::new(config.free_shipping_discount));
        let payments = Arc::new(HostedCheckoutLinks {
            stripe_base: config.stripe_checkout_url.clone(),
            paypal_base: config.paypal_checkout_url.clone(),
        });
        Ok(Self {
            carts: CartService::new(store.clone(), guard.clone(), totals.clone(), &config.default_currency, Duration::days(config.cart_ttl_days)),
            checkout: CheckoutTransaction::new(store.clone(), guard, totals, payments, events.clone(), Duration::days(config.invoice_due_days)),
            coupons: CouponCatalog::new(store.clone()),
            webhooks: PaymentWebhookHandler::new(store, events),
            webhook_secret: config.payment_webhook_secret.as_deref().map(Arc::from),
        })
    }
}

/// Explicit rollback on an error path. A failed rollback leaves nothing
/// committed, so it is only logged.
pub(crate) async fn rollback(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "transaction rollback failed");
    }
}
