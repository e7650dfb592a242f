//! Invoice Aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::Cart;
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
}

/// Frozen financial record of a checkout. Amounts are copied from the cart
/// at commit time and never recomputed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub service_id: Option<Uuid>,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,
    pub payment_id: Option<String>,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub items: Vec<InvoiceItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// `INV-<unix seconds>-<8 random hex digits>`. The suffix comes from a v4 uuid;
/// the leading bits of the v7 ids used elsewhere are a timestamp.
fn invoice_number(now: DateTime<Utc>) -> String {
    format!("INV-{}-{:08X}", now.timestamp(), Uuid::new_v4().as_u128() as u32)
}

impl Invoice {
    /// Snapshots `cart` (whose totals must already be final) into a pending
    /// invoice.
    pub fn from_cart(cart: &Cart, payment_method: &str, notes: Option<String>, due_in: Duration, now: DateTime<Utc>) -> Self {
        let id = Uuid::now_v7();
        let items = cart.items.iter().map(|i| InvoiceItem {
            id: Uuid::now_v7(), invoice_id: id, description: i.description.clone(),
            quantity: i.quantity, unit_price: i.unit_price, total: i.total_price,
        }).collect();
        Self {
            id, user_id: cart.user_id, cart_id: cart.id, service_id: None,
            invoice_number: invoice_number(now),
            status: InvoiceStatus::Pending,
            subtotal: cart.subtotal, tax_amount: cart.tax_amount, discount_amount: cart.discount_amount, total: cart.total,
            currency: cart.currency.clone(), payment_method: Some(payment_method.to_string()), payment_id: None,
            due_date: now + due_in, paid_at: None, notes, items, created_at: now,
        }
    }

    pub fn amount_due(&self) -> Money { Money::new(self.total, &self.currency) }

    pub fn is_payable(&self) -> bool { matches!(self.status, InvoiceStatus::Pending | InvoiceStatus::Overdue) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Pending,
    Active,
    Suspended,
    Cancelled,
    Expired,
}

/// Provisioned service an invoice may pay for; only activation is handled here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: ServiceStatus,
    pub activated_at: Option<DateTime<Utc>>,
}
