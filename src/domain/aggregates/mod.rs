//! Aggregates module
pub mod product;
pub mod cart;
pub mod coupon;
pub mod invoice;

pub use product::Product;
pub use cart::{Cart, CartError, CartItem, CartStatus};
pub use coupon::{Coupon, CouponType, CouponUsage};
pub use invoice::{Invoice, InvoiceItem, InvoiceStatus, Service, ServiceStatus};
