//! Runtime configuration from the environment (optionally a `.env` file).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::services::PriceIntegrityGuard;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("PRICE_INTEGRITY_SECRET must be at least {0} bytes")]
    WeakSecret(usize),
}

#[derive(Clone)]
pub struct BillingConfig {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub price_integrity_secret: String,
    pub tax_rate: Decimal,
    pub free_shipping_discount: Decimal,
    pub default_currency: String,
    pub invoice_due_days: i64,
    pub cart_ttl_days: i64,
    pub payment_webhook_secret: Option<String>,
    pub stripe_checkout_url: String,
    pub paypal_checkout_url: String,
}

impl std::fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingConfig")
            .field("port", &self.port)
            .field("nats_url", &self.nats_url)
            .field("tax_rate", &self.tax_rate)
            .field("free_shipping_discount", &self.free_shipping_discount)
            .field("default_currency", &self.default_currency)
            .field("invoice_due_days", &self.invoice_due_days)
            .field("cart_ttl_days", &self.cart_ttl_days)
            .finish_non_exhaustive()
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| lookup(name).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(name));
        let secret = required("PRICE_INTEGRITY_SECRET")?;
        if secret.len() < PriceIntegrityGuard::MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret(PriceIntegrityGuard::MIN_SECRET_LEN));
        }
        let tax_rate: Decimal = parsed(&lookup, "TAX_RATE", dec!(0.08))?;
        if tax_rate < Decimal::ZERO || tax_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid { name: "TAX_RATE", value: tax_rate.to_string() });
        }
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parsed(&lookup, "PORT", 8083)?,
            nats_url: lookup("NATS_URL").filter(|v| !v.is_empty()),
            price_integrity_secret: secret,
            tax_rate,
            free_shipping_discount: parsed(&lookup, "FREE_SHIPPING_DISCOUNT", dec!(10.00))?,
            default_currency: lookup("DEFAULT_CURRENCY").unwrap_or_else(|| "USD".to_string()),
            invoice_due_days: parsed(&lookup, "INVOICE_DUE_DAYS", 30)?,
            cart_ttl_days: parsed(&lookup, "CART_TTL_DAYS", 30)?,
            payment_webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET").filter(|v| !v.is_empty()),
            stripe_checkout_url: lookup("STRIPE_CHECKOUT_URL").unwrap_or_else(|| "https://checkout.stripe.com/pay".to_string()),
            paypal_checkout_url: lookup("PAYPAL_CHECKOUT_URL").unwrap_or_else(|| "https://www.paypal.com/checkoutnow".to_string()),
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) if !value.is_empty() => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}
