//! Cart and coupon operations for the signed-in user.
//!
//! Every mutation re-derives totals from a fresh coupon lookup and persists
//! the cart before returning it.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Cart, CartError, CartItem, Product};
use crate::domain::services::{CartTotals, CartTotalsCalculator, CouponContext, CouponLine, CouponRejection, PriceIntegrityGuard};
use crate::domain::value_objects::{CouponCode, Quantity};
use crate::infrastructure::{BillingStore, StoreError};
use crate::{BillingError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateItemRequest {
    #[validate(range(min = 0, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 3, max = 50))]
    pub coupon_code: String,
}

/// Result of a dry-run coupon validation.
#[derive(Debug, Clone, Serialize)]
pub struct CouponCheck {
    pub code: String,
    pub valid: bool,
    pub reason: Option<CouponRejection>,
    pub message: Option<String>,
    pub discount_amount: Decimal,
}

/// Read-only projection shown before the user confirms checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSummary {
    pub cart_id: Uuid,
    pub items: Vec<CartItem>,
    pub item_count: i32,
    #[serde(flatten)]
    pub totals: CartTotals,
    pub currency: String,
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn BillingStore>,
    guard: Arc<PriceIntegrityGuard>,
    totals: CartTotalsCalculator,
    currency: String,
    ttl: Duration,
}

impl CartService {
    pub fn new(store: Arc<dyn BillingStore>, guard: Arc<PriceIntegrityGuard>, totals: CartTotalsCalculator, currency: &str, ttl: Duration) -> Self {
        Self { store, guard, totals, currency: currency.to_string(), ttl }
    }

    /// The user's active cart with freshly derived totals, opened on first use.
    pub async fn get_cart(&self, user_id: Uuid) -> Result<Cart> {
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        let before = (cart.subtotal, cart.tax_amount, cart.discount_amount, cart.total);
        self.refresh_totals(&mut cart, now).await?;
        if before != (cart.subtotal, cart.tax_amount, cart.discount_amount, cart.total) {
            self.store.save_cart(&cart).await?;
        }
        Ok(cart)
    }

    pub async fn add_item(&self, user_id: Uuid, request: AddItemRequest) -> Result<Cart> {
        request.validate()?;
        let quantity = Quantity::new(request.quantity).map_err(|e| BillingError::Validation(e.to_string()))?;
        let product = self.available_product(request.product_id).await?;
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        let cart_id = cart.id;
        cart.add_item(&product, quantity, &self.guard, now).map(|_| ()).map_err(|e| flag_tampering(user_id, cart_id, e))?;
        self.persist(&mut cart, now).await?;
        tracing::debug!(%user_id, cart_id = %cart.id, product_id = %product.id, quantity = request.quantity, "item added to cart");
        Ok(cart)
    }

    /// Sets a line's quantity; zero removes it.
    pub async fn update_item(&self, user_id: Uuid, item_id: Uuid, request: UpdateItemRequest) -> Result<Cart> {
        request.validate()?;
        if request.quantity == 0 {
            return self.remove_item(user_id, item_id).await;
        }
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        let product_id = cart.item(item_id).ok_or(BillingError::NotFound("cart item"))?.product_id;
        let product = self.available_product(product_id).await?;
        cart.update_item(item_id, request.quantity, &product, &self.guard, now).map_err(|e| flag_tampering(user_id, cart.id, e))?;
        self.persist(&mut cart, now).await?;
        Ok(cart)
    }

    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<Cart> {
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        cart.remove_item(item_id, now)?;
        self.persist(&mut cart, now).await?;
        Ok(cart)
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<Cart> {
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        cart.clear(now)?;
        self.persist(&mut cart, now).await?;
        Ok(cart)
    }

    pub async fn apply_coupon(&self, user_id: Uuid, request: ApplyCouponRequest) -> Result<Cart> {
        request.validate()?;
        let code = CouponCode::new(&request.coupon_code).map_err(|e| BillingError::Validation(e.to_string()))?;
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        if cart.is_empty() {
            return Err(BillingError::EmptyCart);
        }
        let coupon = self.store.find_coupon_by_code(&code).await?.ok_or(BillingError::NotFound("coupon"))?;
        let lines = self.coupon_lines(&cart.items).await?;
        let user_usage_count = self.store.count_coupon_usages(coupon.id, user_id).await?;
        let ctx = CouponContext { subtotal: cart.items_subtotal(), lines: &lines, user_usage_count, now };
        self.totals.coupons().validate(&coupon, &ctx)?;

        cart.attach_coupon(coupon.id, &code, now)?;
        cart.extend_expiry(self.ttl, now);
        self.totals.recompute(&mut cart, Some(&coupon), now);
        self.store.save_cart(&cart).await?;
        tracing::info!(%user_id, cart_id = %cart.id, coupon = %code, discount = %cart.discount_amount, "coupon applied");
        Ok(cart)
    }

    pub async fn remove_coupon(&self, user_id: Uuid) -> Result<Cart> {
        let now = Utc::now();
        let mut cart = self.active_cart(user_id, now).await?;
        cart.detach_coupon(now)?;
        self.persist(&mut cart, now).await?;
        Ok(cart)
    }

    /// Runs the full coupon check against the current cart without attaching it.
    pub async fn validate_coupon(&self, user_id: Uuid, code: &str) -> Result<CouponCheck> {
        let code = CouponCode::new(code).map_err(|e| BillingError::Validation(e.to_string()))?;
        let now = Utc::now();
        let cart = self.active_cart(user_id, now).await?;
        let coupon = self.store.find_coupon_by_code(&code).await?.ok_or(BillingError::NotFound("coupon"))?;
        let lines = self.coupon_lines(&cart.items).await?;
        let user_usage_count = self.store.count_coupon_usages(coupon.id, user_id).await?;
        let subtotal = cart.items_subtotal();
        let ctx = CouponContext { subtotal, lines: &lines, user_usage_count, now };
        Ok(match self.totals.coupons().validate(&coupon, &ctx) {
            Ok(()) => CouponCheck {
                code: code.to_string(), valid: true, reason: None, message: None,
                discount_amount: self.totals.coupon_discount(&coupon, subtotal),
            },
            Err(reason) => CouponCheck {
                code: code.to_string(), valid: false, reason: Some(reason), message: Some(reason.to_string()),
                discount_amount: Decimal::ZERO,
            },
        })
    }

    pub async fn summary(&self, user_id: Uuid) -> Result<CheckoutSummary> {
        let now = Utc::now();
        let cart = self.store.find_active_cart(user_id).await?.ok_or(BillingError::NotFound("active cart"))?;
        if cart.is_expired(now) {
            return Err(BillingError::CartExpired);
        }
        let coupon = match cart.coupon_id {
            Some(id) => self.store.find_coupon(id).await?,
            None => None,
        };
        let totals = self.totals.compute(&cart.items, coupon.as_ref(), now);
        Ok(CheckoutSummary {
            cart_id: cart.id,
            item_count: cart.items.iter().map(|i| i.quantity).sum(),
            totals,
            currency: cart.currency,
            coupon_code: cart.coupon_code,
            items: cart.items,
        })
    }

    /// Loads the active cart, retiring it first if it has expired.
    async fn active_cart(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Cart> {
        if let Some(mut cart) = self.store.find_active_cart(user_id).await? {
            if !cart.is_expired(now) {
                return Ok(cart);
            }
            tracing::info!(%user_id, cart_id = %cart.id, "cart expired");
            cart.expire(now);
            match self.store.save_cart(&cart).await {
                // already retired or checked out by a concurrent request
                Ok(()) | Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let cart = Cart::open(user_id, &self.currency, self.ttl, now);
        match self.store.insert_cart(&cart).await {
            Ok(()) => Ok(cart),
            // another request opened one first
            Err(StoreError::Conflict(_)) => self.store.find_active_cart(user_id).await?.ok_or(BillingError::NotFound("active cart")),
            Err(e) => Err(e.into()),
        }
    }

    async fn available_product(&self, product_id: Uuid) -> Result<Product> {
        let product = self.store.find_product(product_id).await?.ok_or(BillingError::NotFound("product"))?;
        if !product.is_active {
            return Err(BillingError::ProductUnavailable(product_id));
        }
        Ok(product)
    }

    async fn coupon_lines(&self, items: &[CartItem]) -> Result<Vec<CouponLine>> {
        coupon_lines(self.store.as_ref(), items).await
    }

    async fn refresh_totals(&self, cart: &mut Cart, now: DateTime<Utc>) -> Result<CartTotals> {
        let coupon = match cart.coupon_id {
            Some(id) => self.store.find_coupon(id).await?,
            None => None,
        };
        Ok(self.totals.recompute(cart, coupon.as_ref(), now))
    }

    async fn persist(&self, cart: &mut Cart, now: DateTime<Utc>) -> Result<()> {
        cart.extend_expiry(self.ttl, now);
        self.refresh_totals(cart, now).await?;
        self.store.save_cart(cart).await?;
        Ok(())
    }
}

/// Resolves each line's category for the coupon allow-lists. Products that
/// have disappeared keep their id with no category.
pub(crate) async fn coupon_lines(store: &dyn BillingStore, items: &[CartItem]) -> Result<Vec<CouponLine>> {
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products = store.find_products(&ids).await?;
    Ok(items.iter().map(|item| CouponLine {
        product_id: item.product_id,
        category_id: products.iter().find(|p| p.id == item.product_id).and_then(|p| p.category_id),
    }).collect())
}

fn flag_tampering(user_id: Uuid, cart_id: Uuid, e: CartError) -> BillingError {
    if let CartError::Integrity { item_id, product_id } = &e {
        tracing::warn!(target: "security", %user_id, %cart_id, %item_id, %product_id, "cart item failed price verification");
    }
    e.into()
}
