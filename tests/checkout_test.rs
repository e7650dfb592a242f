mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{add, apply, coupon, harness, pay_with, product};
use opensase_billing::application::{CheckoutRequest, PaymentWebhook, WebhookOutcome};
use opensase_billing::domain::aggregates::{CartStatus, CouponType, InvoiceStatus, Service, ServiceStatus};
use opensase_billing::domain::services::CouponRejection;
use opensase_billing::infrastructure::{BillingStore, Fault, StoreError};
use opensase_billing::BillingError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn full_checkout_scenario() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(10.00), 5);
    h.store.insert_product(item.clone()).await;
    let cart = h.state.carts.add_item(user, add(item.id, 2)).await.unwrap();

    let request = CheckoutRequest { payment_method: "stripe".into(), notes: Some("leave at the door".into()) };
    let receipt = h.state.checkout.checkout(user, request).await.unwrap();
    assert_eq!(receipt.amount, dec!(21.60));
    assert_eq!(receipt.currency, "USD");
    assert!(receipt.invoice_number.starts_with("INV-"));
    assert!(receipt.payment_url.ends_with(&format!("checkout-{}", receipt.invoice_id)));

    assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 3);
    let invoices = h.store.invoices().await;
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice.id, receipt.invoice_id);
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!((invoice.subtotal, invoice.tax_amount, invoice.discount_amount, invoice.total), (dec!(20.00), dec!(1.60), dec!(0), dec!(21.60)));
    assert_eq!(invoice.items.len(), 1);
    assert_eq!(invoice.items[0].quantity, 2);
    assert_eq!(invoice.items[0].description, "Widget");
    assert_eq!(invoice.notes.as_deref(), Some("leave at the door"));
    assert_eq!(invoice.payment_method.as_deref(), Some("stripe"));
    assert!(invoice.due_date > Utc::now() + Duration::days(29));

    let carts = h.store.carts_for(user).await;
    assert_eq!(carts.len(), 1);
    assert_eq!(carts[0].id, cart.id);
    assert_eq!(carts[0].status, CartStatus::Completed);

    // the next cart access starts a new cart
    let next = h.state.carts.get_cart(user).await.unwrap();
    assert_ne!(next.id, cart.id);
}

#[tokio::test]
async fn back_to_back_checkouts_get_distinct_invoices() {
    let h = harness();
    let item = product(dec!(10.00), 100);
    h.store.insert_product(item.clone()).await;
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
    h.state.carts.add_item(first, add(item.id, 1)).await.unwrap();
    h.state.carts.add_item(second, add(item.id, 1)).await.unwrap();

    let a = h.state.checkout.checkout(first, pay_with("stripe")).await.unwrap();
    let b = h.state.checkout.checkout(second, pay_with("paypal")).await.unwrap();
    assert_ne!(a.invoice_number, b.invoice_number);
    assert_eq!(h.store.invoices().await.len(), 2);
    assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 98);
}

#[tokio::test]
async fn stale_cart_write_cannot_reopen_a_completed_cart() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(10.00), 5);
    h.store.insert_product(item.clone()).await;
    h.state.carts.add_item(user, add(item.id, 1)).await.unwrap();
    let stale = h.store.find_active_cart(user).await.unwrap().unwrap();

    h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap();
    assert_matches!(h.store.save_cart(&stale).await, Err(StoreError::Conflict(_)));

    let carts = h.store.carts_for(user).await;
    assert_eq!(carts.len(), 1);
    assert_eq!(carts[0].status, CartStatus::Completed);
    assert_matches!(h.state.checkout.checkout(user, pay_with("stripe")).await, Err(BillingError::NotFound(_)));
    assert_eq!(h.store.invoices().await.len(), 1);
    assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 4);
}

#[tokio::test]
async fn checkout_with_coupon_records_redemption() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(100.00), 5);
    let mut save = coupon("save10", CouponType::Percentage, dec!(10));
    save.max_discount_amount = Some(dec!(5));
    h.store.insert_product(item.clone()).await;
    h.store.insert_coupon(save.clone()).await;
    h.state.carts.add_item(user, add(item.id, 1)).await.unwrap();
    h.state.carts.apply_coupon(user, apply("SAVE10")).await.unwrap();

    let receipt = h.state.checkout.checkout(user, pay_with("paypal")).await.unwrap();
    assert_eq!(receipt.amount, dec!(103.00));
    assert!(receipt.payment_url.contains(&format!("invoice={}", receipt.invoice_id)));

    assert_eq!(h.store.coupon(save.id).await.unwrap().used_count, 1);
    let usages = h.store.coupon_usages().await;
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].invoice_id, receipt.invoice_id);
    assert_eq!(usages[0].user_id, user);
    assert_eq!(usages[0].discount_amount, dec!(5.00));
}

#[tokio::test]
async fn fixed_coupon_above_subtotal_is_frozen_into_invoice() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(5.00), 5);
    h.store.insert_product(item.clone()).await;
    h.store.insert_coupon(coupon("bigfixed", CouponType::Fixed, dec!(5.20))).await;
    h.state.carts.add_item(user, add(item.id, 1)).await.unwrap();
    let cart = h.state.carts.apply_coupon(user, apply("bigfixed")).await.unwrap();
    assert_eq!((cart.discount_amount, cart.total), (dec!(5.20), dec!(0.20)));

    let receipt = h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap();
    assert_eq!(receipt.amount, dec!(0.20));
    let invoice = &h.store.invoices().await[0];
    assert_eq!((invoice.subtotal, invoice.tax_amount, invoice.discount_amount, invoice.total), (dec!(5.00), dec!(0.40), dec!(5.20), dec!(0.20)));
    assert_eq!(h.store.coupon_usages().await[0].discount_amount, dec!(5.20));
}

#[tokio::test]
async fn per_user_limit_counts_the_ledger() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(30.00), 10);
    let mut once = coupon("once", CouponType::Fixed, dec!(5));
    once.user_usage_limit = Some(1);
    h.store.insert_product(item.clone()).await;
    h.store.insert_coupon(once.clone()).await;

    h.state.carts.add_item(user, add(item.id, 1)).await.unwrap();
    h.state.carts.apply_coupon(user, apply("once")).await.unwrap();
    h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap();

    h.state.carts.add_item(user, add(item.id, 1)).await.unwrap();
    assert_matches!(
        h.state.carts.apply_coupon(user, apply("once")).await,
        Err(BillingError::CouponInvalid(CouponRejection::UserUsageLimitReached))
    );
    // another user is unaffected
    let other = Uuid::new_v4();
    h.state.carts.add_item(other, add(item.id, 1)).await.unwrap();
    h.state.carts.apply_coupon(other, apply("once")).await.unwrap();
}

#[tokio::test]
async fn tampered_price_is_refused_without_writes() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(10.00), 5);
    h.store.insert_product(item.clone()).await;
    h.state.carts.add_item(user, add(item.id, 2)).await.unwrap();

    let mut cart = h.store.find_active_cart(user).await.unwrap().unwrap();
    cart.items[0].unit_price = dec!(0.01);
    cart.items[0].total_price = dec!(0.02);
    cart.subtotal = dec!(0.02);
    h.store.save_cart(&cart).await.unwrap();

    let err = h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap_err();
    assert_matches!(err, BillingError::IntegrityViolation { product_id, .. } if product_id == item.id);
    assert_eq!(err.to_string(), "cart integrity check failed");
    assert!(h.store.invoices().await.is_empty());
    assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 5);
    assert_eq!(h.store.carts_for(user).await[0].status, CartStatus::Active);
}

#[tokio::test]
async fn stale_totals_are_refused() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(10.00), 5);
    h.store.insert_product(item.clone()).await;
    h.state.carts.add_item(user, add(item.id, 2)).await.unwrap();

    let mut cart = h.store.find_active_cart(user).await.unwrap().unwrap();
    cart.subtotal = dec!(5.00);
    h.store.save_cart(&cart).await.unwrap();

    assert_matches!(
        h.state.checkout.checkout(user, pay_with("stripe")).await,
        Err(BillingError::TotalsMismatch { stored, .. }) if stored == dec!(5.00)
    );
    assert!(h.store.invoices().await.is_empty());
}

#[tokio::test]
async fn expired_coupon_fails_before_writes() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(20.00), 5);
    let mut fixed = coupon("fixed5", CouponType::Fixed, dec!(5));
    h.store.insert_product(item.clone()).await;
    h.store.insert_coupon(fixed.clone()).await;
    h.state.carts.add_item(user, add(item.id, 1)).await.unwrap();
    h.state.carts.apply_coupon(user, apply("fixed5")).await.unwrap();

    fixed.expires_at = Some(Utc::now() - Duration::hours(1));
    h.store.insert_coupon(fixed.clone()).await;

    assert_matches!(
        h.state.checkout.checkout(user, pay_with("stripe")).await,
        Err(BillingError::CouponInvalid(CouponRejection::Expired))
    );
    assert!(h.store.invoices().await.is_empty());
    assert!(h.store.coupon_usages().await.is_empty());
    assert_eq!(h.store.coupon(fixed.id).await.unwrap().used_count, 0);
    assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 5);
}

#[tokio::test]
async fn precheck_failures() {
    let h = harness();
    let user = Uuid::new_v4();
    assert_matches!(h.state.checkout.checkout(user, pay_with("stripe")).await, Err(BillingError::NotFound(_)));
    h.state.carts.get_cart(user).await.unwrap();
    assert_matches!(h.state.checkout.checkout(user, pay_with("stripe")).await, Err(BillingError::EmptyCart));
    assert_matches!(h.state.checkout.checkout(user, pay_with("cash")).await, Err(BillingError::Validation(_)));

    let mut item = product(dec!(10.00), 5);
    h.store.insert_product(item.clone()).await;
    h.state.carts.add_item(user, add(item.id, 2)).await.unwrap();

    item.stock_quantity = 1;
    h.store.insert_product(item.clone()).await;
    assert_matches!(
        h.state.checkout.checkout(user, pay_with("stripe")).await,
        Err(BillingError::InsufficientStock { available: 1, requested: 2, .. })
    );

    item.is_active = false;
    h.store.insert_product(item.clone()).await;
    assert_matches!(h.state.checkout.checkout(user, pay_with("stripe")).await, Err(BillingError::ProductUnavailable(_)));
    assert!(h.store.invoices().await.is_empty());
}

#[tokio::test]
async fn backordered_products_skip_the_stock_ledger() {
    let h = harness();
    let user = Uuid::new_v4();
    let mut item = product(dec!(10.00), 0);
    item.allow_backorder = true;
    h.store.insert_product(item.clone()).await;
    h.state.carts.add_item(user, add(item.id, 3)).await.unwrap();

    h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap();
    assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 0);
}

#[tokio::test]
async fn commit_faults_leave_nothing_behind() {
    for fault in [Fault::InsertInvoice, Fault::InsertCouponUsage, Fault::CompleteCart, Fault::Commit] {
        let h = harness();
        let user = Uuid::new_v4();
        let item = product(dec!(10.00), 5);
        let fixed = coupon("fixed5", CouponType::Fixed, dec!(5));
        h.store.insert_product(item.clone()).await;
        h.store.insert_coupon(fixed.clone()).await;
        h.state.carts.add_item(user, add(item.id, 2)).await.unwrap();
        h.state.carts.apply_coupon(user, apply("fixed5")).await.unwrap();

        h.store.inject_fault(Some(fault)).await;
        assert_matches!(h.state.checkout.checkout(user, pay_with("stripe")).await, Err(BillingError::CheckoutFailed), "{fault:?}");
        assert!(h.store.invoices().await.is_empty(), "{fault:?}");
        assert!(h.store.coupon_usages().await.is_empty(), "{fault:?}");
        assert_eq!(h.store.coupon(fixed.id).await.unwrap().used_count, 0, "{fault:?}");
        assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 5, "{fault:?}");
        assert_eq!(h.store.carts_for(user).await[0].status, CartStatus::Active, "{fault:?}");

        // safe to retry once the fault clears
        h.store.inject_fault(None).await;
        h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap();
        assert_eq!(h.store.product(item.id).await.unwrap().stock_quantity, 3);
    }
}

#[tokio::test]
async fn webhook_settles_invoice_and_activates_service() {
    let h = harness();
    let user = Uuid::new_v4();
    let item = product(dec!(10.00), 5);
    h.store.insert_product(item.clone()).await;
    h.state.carts.add_item(user, add(item.id, 2)).await.unwrap();
    let receipt = h.state.checkout.checkout(user, pay_with("stripe")).await.unwrap();

    let service = Service { id: Uuid::new_v4(), user_id: user, name: "Hosting".into(), status: ServiceStatus::Pending, activated_at: None };
    h.store.insert_service(service.clone()).await;
    h.store.link_service(receipt.invoice_id, service.id).await;

    let event = |status: &str, amount: Decimal| PaymentWebhook {
        payment_id: "pi_123".into(), invoice_id: receipt.invoice_id, amount, status: status.into(), payment_method: Some("stripe".into()),
    };

    assert_eq!(h.state.webhooks.handle(event("failed", dec!(21.60))).await.unwrap(), WebhookOutcome::Ignored);
    assert_matches!(h.state.webhooks.handle(event("completed", dec!(1.00))).await, Err(BillingError::Validation(_)));
    assert_eq!(h.store.find_invoice(receipt.invoice_id).await.unwrap().unwrap().status, InvoiceStatus::Pending);

    let outcome = h.state.webhooks.handle(event("completed", dec!(21.6))).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Paid { service_activated: true });
    let invoice = h.store.find_invoice(receipt.invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.payment_id.as_deref(), Some("pi_123"));
    assert!(invoice.paid_at.is_some());
    let service = h.store.service(service.id).await.unwrap();
    assert_eq!(service.status, ServiceStatus::Active);
    assert!(service.activated_at.is_some());

    assert_eq!(h.state.webhooks.handle(event("completed", dec!(21.60))).await.unwrap(), WebhookOutcome::AlreadyPaid);

    let mut unknown = event("completed", dec!(21.60));
    unknown.invoice_id = Uuid::new_v4();
    assert_matches!(h.state.webhooks.handle(unknown).await, Err(BillingError::NotFound("invoice")));
}
