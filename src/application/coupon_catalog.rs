//! Public coupon discovery.
//!
//! Read-only: shoppers can browse and look up coupons flagged `is_public`.
//! Usage limits, counters and product lists never leave the server.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, CouponType};
use crate::domain::value_objects::CouponCode;
use crate::infrastructure::BillingStore;
use crate::{BillingError, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicCoupon {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Coupon> for PublicCoupon {
    fn from(c: Coupon) -> Self {
        Self {
            id: c.id, code: c.code, name: c.name, description: c.description, kind: c.kind, value: c.value,
            min_order_amount: c.min_order_amount, max_discount_amount: c.max_discount_amount, expires_at: c.expires_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicCouponQuery {
    #[serde(rename = "type")]
    pub kind: Option<CouponType>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PublicCouponQuery {
    /// Out-of-range values fall back to the first page and the default size.
    fn paging(&self) -> (u32, u32) {
        let page = self.page.filter(|p| *p >= 1).unwrap_or(1);
        let page_size = self.page_size.filter(|s| (1..=MAX_PAGE_SIZE).contains(s)).unwrap_or(DEFAULT_PAGE_SIZE);
        (page, page_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicCouponPage {
    pub data: Vec<PublicCoupon>,
    pub meta: PageMeta,
}

#[derive(Clone)]
pub struct CouponCatalog {
    store: Arc<dyn BillingStore>,
}

impl CouponCatalog {
    pub fn new(store: Arc<dyn BillingStore>) -> Self { Self { store } }

    pub async fn list(&self, query: PublicCouponQuery) -> Result<PublicCouponPage> {
        let (page, page_size) = query.paging();
        let offset = i64::from(page - 1) * i64::from(page_size);
        let (coupons, total) = self.store.list_public_coupons(query.kind, Utc::now(), i64::from(page_size), offset).await?;
        Ok(PublicCouponPage {
            data: coupons.into_iter().map(PublicCoupon::from).collect(),
            meta: PageMeta { total, page, page_size },
        })
    }

    /// Private, inactive, out-of-window and used-up coupons all read as absent.
    pub async fn find(&self, code: &str) -> Result<PublicCoupon> {
        let code = CouponCode::new(code).map_err(|e| BillingError::Validation(e.to_string()))?;
        let now = Utc::now();
        self.store.find_coupon_by_code(&code).await?
            .filter(|c| c.is_discoverable(now))
            .map(PublicCoupon::from)
            .ok_or(BillingError::NotFound("coupon"))
    }
}
