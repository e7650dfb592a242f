//! HTTP surface
pub mod auth;
pub mod error;

use axum::{body::Bytes, extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{delete, get, post, put}, Json, Router};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::application::{
    AddItemRequest, AppState, ApplyCouponRequest, CheckoutReceipt, CheckoutRequest, CheckoutSummary, CouponCheck, PaymentWebhook, PublicCoupon, PublicCouponPage,
    PublicCouponQuery, UpdateItemRequest,
};
use crate::domain::aggregates::Cart;
use crate::{BillingError, Result};
pub use auth::AuthenticatedUser;

pub const SIGNATURE_HEADER: &str = "x-signature";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-billing"})) }))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/items", post(add_item))
        .route("/api/v1/cart/items/:id", put(update_item).delete(remove_item))
        .route("/api/v1/cart/clear", delete(clear_cart))
        .route("/api/v1/cart/coupons", post(apply_coupon).delete(remove_coupon))
        .route("/api/v1/cart/coupons/:code/validate", get(validate_coupon))
        .route("/api/v1/coupons/public", get(list_public_coupons))
        .route("/api/v1/coupons/public/:code", get(public_coupon))
        .route("/api/v1/checkout/summary", get(checkout_summary))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/webhooks/payment", post(payment_webhook))
        .with_state(state)
}

async fn get_cart(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser) -> Result<Json<Cart>> {
    Ok(Json(s.carts.get_cart(user).await?))
}

async fn add_item(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser, Json(r): Json<AddItemRequest>) -> Result<(StatusCode, Json<Cart>)> {
    Ok((StatusCode::CREATED, Json(s.carts.add_item(user, r).await?)))
}

async fn update_item(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser, Path(id): Path<Uuid>, Json(r): Json<UpdateItemRequest>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.update_item(user, id, r).await?))
}

async fn remove_item(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser, Path(id): Path<Uuid>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.remove_item(user, id).await?))
}

async fn clear_cart(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser) -> Result<Json<Cart>> {
    Ok(Json(s.carts.clear(user).await?))
}

async fn apply_coupon(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser, Json(r): Json<ApplyCouponRequest>) -> Result<Json<Cart>> {
    Ok(Json(s.carts.apply_coupon(user, r).await?))
}

async fn remove_coupon(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser) -> Result<Json<Cart>> {
    Ok(Json(s.carts.remove_coupon(user).await?))
}

async fn validate_coupon(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser, Path(code): Path<String>) -> Result<Json<CouponCheck>> {
    Ok(Json(s.carts.validate_coupon(user, &code).await?))
}

async fn list_public_coupons(State(s): State<AppState>, Query(q): Query<PublicCouponQuery>) -> Result<Json<PublicCouponPage>> {
    Ok(Json(s.coupons.list(q).await?))
}

async fn public_coupon(State(s): State<AppState>, Path(code): Path<String>) -> Result<Json<PublicCoupon>> {
    Ok(Json(s.coupons.find(&code).await?))
}

async fn checkout_summary(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser) -> Result<Json<CheckoutSummary>> {
    Ok(Json(s.carts.summary(user).await?))
}

async fn checkout(State(s): State<AppState>, AuthenticatedUser(user): AuthenticatedUser, Json(r): Json<CheckoutRequest>) -> Result<(StatusCode, Json<CheckoutReceipt>)> {
    Ok((StatusCode::CREATED, Json(s.checkout.checkout(user, r).await?)))
}

async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<serde_json::Value>> {
    if let Some(secret) = s.webhook_secret.as_deref() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            tracing::warn!(target: "security", "payment webhook signature verification failed");
            return Err(BillingError::Unauthorized);
        }
    }
    let event: PaymentWebhook = serde_json::from_slice(&body).map_err(|e| BillingError::Validation(format!("invalid webhook data: {e}")))?;
    let outcome = s.webhooks.handle(event).await?;
    Ok(Json(json!({"success": true, "message": "Webhook processed", "result": outcome})))
}

/// Hex HMAC-SHA256 of the raw body, compared in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else { return false };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
