//! Domain services: pricing, coupon and inventory rules
pub mod integrity;
pub mod stock;
pub mod coupon_validator;
pub mod totals;

pub use integrity::{PriceIntegrityGuard, WeakSecret};
pub use stock::{StockError, StockLedger};
pub use coupon_validator::{CouponContext, CouponLine, CouponRejection, CouponValidator};
pub use totals::{CartTotals, CartTotalsCalculator};
