#![allow(dead_code)]

use opensase_billing::application::{AddItemRequest, AppState, ApplyCouponRequest, CheckoutRequest};
use opensase_billing::config::BillingConfig;
use opensase_billing::domain::aggregates::{Coupon, CouponType, Product};
use opensase_billing::infrastructure::{EventPublisher, MemoryStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

pub struct Harness {
    pub store: MemoryStore,
    pub state: AppState,
}

pub fn config() -> BillingConfig {
    BillingConfig::from_lookup(|name| match name {
        "DATABASE_URL" => Some("postgres://localhost/unused".to_string()),
        "PRICE_INTEGRITY_SECRET" => Some(SECRET.to_string()),
        "PAYMENT_WEBHOOK_SECRET" => Some("whsec_test".to_string()),
        _ => None,
    })
    .expect("test config")
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let state = AppState::new(Arc::new(store.clone()), &config(), EventPublisher::disabled()).expect("app state");
    Harness { store, state }
}

pub fn product(price: Decimal, stock: i32) -> Product {
    Product {
        id: Uuid::new_v4(), category_id: None, name: "Widget".into(), price, currency: "USD".into(),
        is_active: true, track_quantity: true, stock_quantity: stock, allow_backorder: false,
    }
}

pub fn coupon(code: &str, kind: CouponType, value: Decimal) -> Coupon {
    Coupon {
        id: Uuid::new_v4(), code: code.to_uppercase(), name: code.into(), description: String::new(),
        kind, value, min_order_amount: None, max_discount_amount: None, usage_limit: None, used_count: 0,
        user_usage_limit: None, starts_at: None, expires_at: None, is_active: true, is_public: true,
        applicable_product_ids: vec![], applicable_category_ids: vec![], excluded_product_ids: vec![], deleted_at: None,
    }
}

pub fn add(product_id: Uuid, quantity: i32) -> AddItemRequest { AddItemRequest { product_id, quantity } }

pub fn apply(code: &str) -> ApplyCouponRequest { ApplyCouponRequest { coupon_code: code.to_string() } }

pub fn pay_with(method: &str) -> CheckoutRequest { CheckoutRequest { payment_method: method.to_string(), notes: None } }
