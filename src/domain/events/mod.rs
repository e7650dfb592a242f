//! Domain events, emitted only after the owning transaction commits
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    CheckoutCompleted { invoice_id: Uuid, cart_id: Uuid, user_id: Uuid, total: Decimal, currency: String },
    CouponRedeemed { coupon_id: Uuid, user_id: Uuid, invoice_id: Uuid, discount_amount: Decimal },
    InvoicePaid { invoice_id: Uuid, payment_id: String, service_id: Option<Uuid> },
}

impl DomainEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted { .. } => "billing.checkout.completed",
            Self::CouponRedeemed { .. } => "billing.coupon.redeemed",
            Self::InvoicePaid { .. } => "billing.invoice.paid",
        }
    }
}
