//! In-process store.
//!
//! A transaction holds the store lock from `begin` until it is committed or
//! dropped and works on a staged copy of the state, so transactions are
//! serialised and a rollback is simply discarding the copy. Used by the test
//! suites and for running the service without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartStatus, Coupon, CouponType, CouponUsage, Invoice, InvoiceStatus, Product, Service, ServiceStatus};
use crate::domain::value_objects::CouponCode;
use crate::infrastructure::store::{BillingStore, StoreError, StoreTransaction};

/// Transaction step at which an injected fault fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    InsertInvoice,
    InsertCouponUsage,
    CompleteCart,
    Commit,
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    carts: HashMap<Uuid, Cart>,
    products: HashMap<Uuid, Product>,
    coupons: HashMap<Uuid, Coupon>,
    usages: Vec<CouponUsage>,
    invoices: HashMap<Uuid, Invoice>,
    services: HashMap<Uuid, Service>,
    fault: Option<Fault>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) { self.state.lock().await.products.insert(product.id, product); }
    pub async fn insert_coupon(&self, coupon: Coupon) { self.state.lock().await.coupons.insert(coupon.id, coupon); }
    pub async fn insert_service(&self, service: Service) { self.state.lock().await.services.insert(service.id, service); }

    /// Links an invoice to a provisioned service, as the provisioning flow does.
    pub async fn link_service(&self, invoice_id: Uuid, service_id: Uuid) {
        if let Some(invoice) = self.state.lock().await.invoices.get_mut(&invoice_id) {
            invoice.service_id = Some(service_id);
        }
    }

    pub async fn inject_fault(&self, fault: Option<Fault>) { self.state.lock().await.fault = fault; }

    pub async fn product(&self, id: Uuid) -> Option<Product> { self.state.lock().await.products.get(&id).cloned() }
    pub async fn coupon(&self, id: Uuid) -> Option<Coupon> { self.state.lock().await.coupons.get(&id).cloned() }
    pub async fn service(&self, id: Uuid) -> Option<Service> { self.state.lock().await.services.get(&id).cloned() }
    pub async fn coupon_usages(&self) -> Vec<CouponUsage> { self.state.lock().await.usages.clone() }
    pub async fn invoices(&self) -> Vec<Invoice> { self.state.lock().await.invoices.values().cloned().collect() }

    pub async fn carts_for(&self, user_id: Uuid) -> Vec<Cart> {
        self.state.lock().await.carts.values().filter(|c| c.user_id == user_id).cloned().collect()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn find_active_cart(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.carts.values().find(|c| c.user_id == user_id && c.status == CartStatus::Active).cloned())
    }

    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.carts.values().any(|c| c.user_id == cart.user_id && c.status == CartStatus::Active) {
            return Err(StoreError::Conflict(format!("user {} already has an active cart", cart.user_id)));
        }
        state.carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.carts.get_mut(&cart.id) {
            Some(stored) if stored.status == CartStatus::Active => {
                *stored = cart.clone();
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!("cart {} is no longer active", cart.id))),
        }
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn find_coupon(&self, id: Uuid) -> Result<Option<Coupon>, StoreError> {
        Ok(self.state.lock().await.coupons.get(&id).filter(|c| c.deleted_at.is_none()).cloned())
    }

    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.coupons.values().find(|c| c.code == code.as_str() && c.deleted_at.is_none()).cloned())
    }

    async fn list_public_coupons(&self, kind: Option<CouponType>, now: DateTime<Utc>, limit: i64, offset: i64) -> Result<(Vec<Coupon>, i64), StoreError> {
        let state = self.state.lock().await;
        let mut found: Vec<&Coupon> = state.coupons.values()
            .filter(|c| c.is_discoverable(now) && kind.map_or(true, |k| c.kind == k))
            .collect();
        found.sort_by(|a, b| a.code.cmp(&b.code));
        let total = found.len() as i64;
        let page = found.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).cloned().collect();
        Ok((page, total))
    }

    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(count_usages(&state, coupon_id, user_id))
    }

    async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }
}

fn count_usages(state: &MemoryState, coupon_id: Uuid, user_id: Uuid) -> i64 {
    state.usages.iter().filter(|u| u.coupon_id == coupon_id && u.user_id == user_id).count() as i64
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryTransaction {
    fn trip(&self, step: Fault) -> Result<(), StoreError> {
        if self.staged.fault == Some(step) {
            return Err(StoreError::Fault(match step {
                Fault::InsertInvoice => "insert invoice",
                Fault::InsertCouponUsage => "insert coupon usage",
                Fault::CompleteCart => "complete cart",
                Fault::Commit => "commit",
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.trip(Fault::InsertInvoice)?;
        if self.staged.invoices.values().any(|i| i.invoice_number == invoice.invoice_number) {
            return Err(StoreError::Conflict(format!("invoice number {} already used", invoice.invoice_number)));
        }
        self.staged.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<u64, StoreError> {
        match self.staged.products.get_mut(&product_id) {
            Some(p) if p.stock_quantity >= quantity => {
                p.stock_quantity -= quantity;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn stock_level(&mut self, product_id: Uuid) -> Result<Option<i32>, StoreError> {
        Ok(self.staged.products.get(&product_id).map(|p| p.stock_quantity))
    }

    async fn increment_coupon_usage(&mut self, coupon_id: Uuid) -> Result<u64, StoreError> {
        match self.staged.coupons.get_mut(&coupon_id) {
            Some(c) if c.deleted_at.is_none() && !c.is_exhausted() => {
                c.used_count += 1;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn count_coupon_usages(&mut self, coupon_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(count_usages(&self.staged, coupon_id, user_id))
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<(), StoreError> {
        self.trip(Fault::InsertCouponUsage)?;
        self.staged.usages.push(usage.clone());
        Ok(())
    }

    async fn complete_cart(&mut self, cart: &Cart) -> Result<u64, StoreError> {
        self.trip(Fault::CompleteCart)?;
        match self.staged.carts.get_mut(&cart.id) {
            Some(stored) if stored.status == CartStatus::Active => {
                let mut completed = cart.clone();
                completed.status = CartStatus::Completed;
                *stored = completed;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_invoice_paid(&mut self, invoice_id: Uuid, payment_id: &str, payment_method: &str, paid_at: DateTime<Utc>) -> Result<u64, StoreError> {
        match self.staged.invoices.get_mut(&invoice_id) {
            Some(invoice) if invoice.is_payable() => {
                invoice.status = InvoiceStatus::Paid;
                invoice.payment_id = Some(payment_id.to_string());
                invoice.payment_method = Some(payment_method.to_string());
                invoice.paid_at = Some(paid_at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn activate_service(&mut self, service_id: Uuid, activated_at: DateTime<Utc>) -> Result<u64, StoreError> {
        match self.staged.services.get_mut(&service_id) {
            Some(service) if service.status == ServiceStatus::Pending => {
                service.status = ServiceStatus::Active;
                service.activated_at = Some(activated_at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.trip(Fault::Commit)?;
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
