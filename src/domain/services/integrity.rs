//! Price integrity tokens for cart lines.
//!
//! A token is `HMAC-SHA256(secret, "<product id>:<unit price>")`, hex encoded.
//! The secret never leaves the server, so a client that edits a stored unit
//! price cannot mint a matching token.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct PriceIntegrityGuard {
    mac: HmacSha256,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("price integrity secret must be at least {min} bytes, got {actual}")]
pub struct WeakSecret {
    pub min: usize,
    pub actual: usize,
}

impl PriceIntegrityGuard {
    pub const MIN_SECRET_LEN: usize = 32;

    pub fn new(secret: &[u8]) -> Result<Self, WeakSecret> {
        if secret.len() < Self::MIN_SECRET_LEN {
            return Err(WeakSecret { min: Self::MIN_SECRET_LEN, actual: secret.len() });
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| WeakSecret { min: Self::MIN_SECRET_LEN, actual: secret.len() })?;
        Ok(Self { mac })
    }

    pub fn bind(&self, product_id: Uuid, unit_price: Decimal) -> String {
        hex::encode(self.keyed(product_id, unit_price).finalize().into_bytes())
    }

    /// Constant-time check of `token` against the binding of `(product_id, unit_price)`.
    pub fn verify(&self, product_id: Uuid, unit_price: Decimal, token: &str) -> bool {
        let Ok(expected) = hex::decode(token) else { return false };
        self.keyed(product_id, unit_price).verify_slice(&expected).is_ok()
    }

    fn keyed(&self, product_id: Uuid, unit_price: Decimal) -> HmacSha256 {
        let mut mac = self.mac.clone();
        // normalize() so 10, 10.0 and 10.00 (NUMERIC round trips) bind identically
        mac.update(format!("{}:{}", product_id, unit_price.normalize()).as_bytes());
        mac
    }
}

impl fmt::Debug for PriceIntegrityGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceIntegrityGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sha2::Digest;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_bind_and_verify() {
        let guard = PriceIntegrityGuard::new(SECRET).unwrap();
        let product = Uuid::new_v4();
        let token = guard.bind(product, dec!(10.00));
        assert!(guard.verify(product, dec!(10.00), &token));
        assert!(guard.verify(product, dec!(10), &token));
        assert!(!guard.verify(product, dec!(9.99), &token));
        assert!(!guard.verify(Uuid::new_v4(), dec!(10.00), &token));
        assert!(!guard.verify(product, dec!(10.00), "not-hex"));
    }

    #[test]
    fn test_tokens_depend_on_secret() {
        let a = PriceIntegrityGuard::new(SECRET).unwrap();
        let b = PriceIntegrityGuard::new(b"another-secret-of-sufficient-size!!").unwrap();
        let product = Uuid::new_v4();
        assert!(!b.verify(product, dec!(5), &a.bind(product, dec!(5))));
    }

    #[test]
    fn test_unkeyed_hash_is_rejected() {
        let guard = PriceIntegrityGuard::new(SECRET).unwrap();
        let product = Uuid::new_v4();
        let forged = hex::encode(Sha256::digest(format!("{}:{}", product, dec!(0.01)).as_bytes()));
        assert!(!guard.verify(product, dec!(0.01), &forged));
    }

    #[test]
    fn test_short_secret_refused() {
        assert_eq!(PriceIntegrityGuard::new(b"short").unwrap_err(), WeakSecret { min: 32, actual: 5 });
    }
}
