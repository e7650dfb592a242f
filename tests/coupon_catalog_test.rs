mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{coupon, harness};
use opensase_billing::application::PublicCouponQuery;
use opensase_billing::domain::aggregates::CouponType;
use opensase_billing::BillingError;
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn seeded() -> common::Harness {
    let h = harness();
    let mut limited = coupon("spring10", CouponType::Percentage, dec!(10));
    limited.usage_limit = Some(100);
    limited.used_count = 7;
    limited.user_usage_limit = Some(1);
    limited.applicable_product_ids = vec![Uuid::new_v4()];
    h.store.insert_coupon(limited).await;
    h.store.insert_coupon(coupon("ship", CouponType::FreeShipping, dec!(0))).await;
    h.store.insert_coupon(coupon("take5", CouponType::Fixed, dec!(5))).await;

    let mut private = coupon("staff50", CouponType::Percentage, dec!(50));
    private.is_public = false;
    h.store.insert_coupon(private).await;
    let mut expired = coupon("winter", CouponType::Fixed, dec!(5));
    expired.expires_at = Some(Utc::now() - Duration::days(1));
    h.store.insert_coupon(expired).await;
    let mut upcoming = coupon("summer", CouponType::Fixed, dec!(5));
    upcoming.starts_at = Some(Utc::now() + Duration::days(1));
    h.store.insert_coupon(upcoming).await;
    let mut used_up = coupon("gone", CouponType::Fixed, dec!(5));
    used_up.usage_limit = Some(3);
    used_up.used_count = 3;
    h.store.insert_coupon(used_up).await;
    let mut disabled = coupon("off", CouponType::Fixed, dec!(5));
    disabled.is_active = false;
    h.store.insert_coupon(disabled).await;
    h
}

#[tokio::test]
async fn lists_only_discoverable_coupons() {
    let h = seeded().await;
    let page = h.state.coupons.list(PublicCouponQuery::default()).await.unwrap();
    let codes: Vec<&str> = page.data.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, ["SHIP", "SPRING10", "TAKE5"]);
    assert_eq!((page.meta.total, page.meta.page, page.meta.page_size), (3, 1, 10));
}

#[tokio::test]
async fn filters_by_type_and_pages() {
    let h = seeded().await;
    let fixed = PublicCouponQuery { kind: Some(CouponType::Fixed), ..Default::default() };
    let page = h.state.coupons.list(fixed).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].code, "TAKE5");
    assert_eq!(page.meta.total, 1);

    let second = PublicCouponQuery { kind: None, page: Some(2), page_size: Some(2) };
    let page = h.state.coupons.list(second).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].code, "TAKE5");
    assert_eq!(page.meta.total, 3);

    let past_the_end = PublicCouponQuery { kind: None, page: Some(9), page_size: Some(2) };
    assert!(h.state.coupons.list(past_the_end).await.unwrap().data.is_empty());
}

#[tokio::test]
async fn public_view_hides_limits_and_product_lists() {
    let h = seeded().await;
    let found = h.state.coupons.find("spring10").await.unwrap();
    assert_eq!(found.value, dec!(10));
    let json = serde_json::to_value(&found).unwrap();
    assert_eq!(json["type"], "percentage");
    for hidden in ["usage_limit", "used_count", "user_usage_limit", "applicable_product_ids", "applicable_category_ids", "excluded_product_ids", "is_public"] {
        assert!(json.get(hidden).is_none(), "{hidden} leaked");
    }
}

#[tokio::test]
async fn lookup_treats_hidden_coupons_as_absent() {
    let h = seeded().await;
    for code in ["staff50", "winter", "summer", "gone", "off", "nosuch"] {
        assert_matches!(h.state.coupons.find(code).await, Err(BillingError::NotFound("coupon")), "{code}");
    }
    assert_matches!(h.state.coupons.find("x").await, Err(BillingError::Validation(_)));
}
