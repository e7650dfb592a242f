//! Coupon Aggregate and usage ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponType {
    Percentage,
    Fixed,
    FreeShipping,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub user_usage_limit: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_public: bool,
    pub applicable_product_ids: Vec<Uuid>,
    pub applicable_category_ids: Vec<Uuid>,
    pub excluded_product_ids: Vec<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Coupon {
    pub fn has_allow_list(&self) -> bool {
        !self.applicable_product_ids.is_empty() || !self.applicable_category_ids.is_empty()
    }

    pub fn allows(&self, product_id: Uuid, category_id: Option<Uuid>) -> bool {
        self.applicable_product_ids.contains(&product_id)
            || category_id.is_some_and(|c| self.applicable_category_ids.contains(&c))
    }

    pub fn excludes(&self, product_id: Uuid) -> bool { self.excluded_product_ids.contains(&product_id) }

    pub fn is_exhausted(&self) -> bool { self.usage_limit.is_some_and(|limit| self.used_count >= limit) }

    /// Listed to shoppers: public, active, inside its window and not used up.
    pub fn is_discoverable(&self, now: DateTime<Utc>) -> bool {
        self.is_public
            && self.is_active
            && self.deleted_at.is_none()
            && self.starts_at.map_or(true, |at| at <= now)
            && self.expires_at.map_or(true, |at| at > now)
            && !self.is_exhausted()
    }
}

/// Append-only ledger row written once per redemption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub invoice_id: Uuid,
    pub discount_amount: Decimal,
    pub used_at: DateTime<Utc>,
}
