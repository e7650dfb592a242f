//! Payment hand-off and settlement.
//!
//! Checkout ends with a redirect reference for the external processor; the
//! processor reports back through [`PaymentWebhookHandler`].

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::application::rollback;
use crate::domain::aggregates::{Invoice, InvoiceStatus};
use crate::domain::events::DomainEvent;
use crate::infrastructure::{BillingStore, EventPublisher, StoreTransaction};
use crate::{BillingError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentMethod {
    Stripe,
    Paypal,
}

pub(crate) fn validate_payment_method(value: &str) -> std::result::Result<(), ValidationError> {
    value.parse::<PaymentMethod>().map(|_| ()).map_err(|_| ValidationError::new("payment_method"))
}

/// Produces the reference the client is redirected to after checkout.
pub trait PaymentInitiator: Send + Sync {
    fn payment_url(&self, method: PaymentMethod, invoice: &Invoice) -> String;
}

/// Hosted-checkout links built from configured base URLs.
#[derive(Clone, Debug)]
pub struct HostedCheckoutLinks {
    pub stripe_base: String,
    pub paypal_base: String,
}

impl PaymentInitiator for HostedCheckoutLinks {
    fn payment_url(&self, method: PaymentMethod, invoice: &Invoice) -> String {
        match method {
            PaymentMethod::Stripe => format!("{}/checkout-{}", self.stripe_base.trim_end_matches('/'), invoice.id),
            PaymentMethod::Paypal => format!("{}?invoice={}", self.paypal_base, invoice.id),
        }
    }
}

/// Body posted by the payment processor.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PaymentWebhook {
    #[validate(length(min = 1, max = 255))]
    pub payment_id: String,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Status other than `completed`; nothing changed.
    Ignored,
    AlreadyPaid,
    Paid { service_activated: bool },
}

#[derive(Clone)]
pub struct PaymentWebhookHandler {
    store: Arc<dyn BillingStore>,
    events: EventPublisher,
}

impl PaymentWebhookHandler {
    pub fn new(store: Arc<dyn BillingStore>, events: EventPublisher) -> Self { Self { store, events } }

    pub async fn handle(&self, event: PaymentWebhook) -> Result<WebhookOutcome> {
        event.validate()?;
        if event.status != "completed" {
            tracing::info!(invoice_id = %event.invoice_id, status = %event.status, "ignoring payment webhook");
            return Ok(WebhookOutcome::Ignored);
        }
        let invoice = self.store.find_invoice(event.invoice_id).await?.ok_or(BillingError::NotFound("invoice"))?;
        if invoice.status == InvoiceStatus::Paid {
            return Ok(WebhookOutcome::AlreadyPaid);
        }
        if !invoice.is_payable() {
            return Err(BillingError::Validation(format!("invoice is {}", invoice.status)));
        }
        if event.amount != invoice.amount_due().amount() {
            tracing::warn!(invoice_id = %invoice.id, paid = %event.amount, due = %invoice.amount_due(), "payment amount mismatch");
            return Err(BillingError::Validation("payment amount does not match invoice total".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let outcome = match self.settle(tx.as_mut(), &invoice, &event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        if matches!(outcome, WebhookOutcome::Paid { .. }) {
            tracing::info!(invoice_id = %invoice.id, payment_id = %event.payment_id, "invoice paid");
            self.events.publish(DomainEvent::InvoicePaid {
                invoice_id: invoice.id, payment_id: event.payment_id.clone(), service_id: invoice.service_id,
            }).await;
        }
        Ok(outcome)
    }

    async fn settle(&self, tx: &mut dyn StoreTransaction, invoice: &Invoice, event: &PaymentWebhook) -> Result<WebhookOutcome> {
        let now = Utc::now();
        let method = event.payment_method.as_deref().or(invoice.payment_method.as_deref()).unwrap_or_default();
        if tx.mark_invoice_paid(invoice.id, &event.payment_id, method, now).await? == 0 {
            // settled by a concurrent delivery of the same webhook
            return Ok(WebhookOutcome::AlreadyPaid);
        }
        let service_activated = match invoice.service_id {
            Some(service_id) => tx.activate_service(service_id, now).await? > 0,
            None => false,
        };
        Ok(WebhookOutcome::Paid { service_activated })
    }
}
