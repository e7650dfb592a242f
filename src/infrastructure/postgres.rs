//! Postgres store (sqlx).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartItem, CartStatus, Coupon, CouponType, CouponUsage, Invoice, InvoiceItem, InvoiceStatus, Product};
use crate::domain::value_objects::CouponCode;
use crate::infrastructure::store::{BillingStore, StoreError, StoreTransaction};

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: Uuid, user_id: Uuid, status: String, subtotal: Decimal, tax_amount: Decimal, discount_amount: Decimal, total: Decimal,
    currency: String, coupon_id: Option<Uuid>, coupon_code: Option<String>, expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct CartItemRow {
    id: Uuid, cart_id: Uuid, product_id: Uuid, description: String, quantity: i32, unit_price: Decimal, total_price: Decimal,
    price_hash: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid, category_id: Option<Uuid>, name: String, price: Decimal, currency: String, is_active: bool,
    track_quantity: bool, stock_quantity: i32, allow_backorder: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct CouponRow {
    id: Uuid, code: String, name: String, description: String, kind: String, value: Decimal,
    min_order_amount: Option<Decimal>, max_discount_amount: Option<Decimal>, usage_limit: Option<i32>, used_count: i32,
    user_usage_limit: Option<i32>, starts_at: Option<DateTime<Utc>>, expires_at: Option<DateTime<Utc>>, is_active: bool, is_public: bool,
    applicable_product_ids: Vec<Uuid>, applicable_category_ids: Vec<Uuid>, excluded_product_ids: Vec<Uuid>, deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid, user_id: Uuid, cart_id: Uuid, service_id: Option<Uuid>, invoice_number: String, status: String,
    subtotal: Decimal, tax_amount: Decimal, discount_amount: Decimal, total: Decimal, currency: String,
    payment_method: Option<String>, payment_id: Option<String>, due_date: DateTime<Utc>, paid_at: Option<DateTime<Utc>>,
    notes: Option<String>, created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceItemRow { id: Uuid, invoice_id: Uuid, description: String, quantity: i32, unit_price: Decimal, total: Decimal }

fn parse<T: FromStr>(column: &str, value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|_| StoreError::Corrupt(format!("{column} = {value:?}")))
}

impl CartRow {
    fn into_cart(self, items: Vec<CartItemRow>) -> Result<Cart, StoreError> {
        Ok(Cart {
            id: self.id, user_id: self.user_id, status: parse::<CartStatus>("carts.status", &self.status)?,
            subtotal: self.subtotal, tax_amount: self.tax_amount, discount_amount: self.discount_amount, total: self.total,
            currency: self.currency, coupon_id: self.coupon_id, coupon_code: self.coupon_code, expires_at: self.expires_at,
            items: items.into_iter().map(|i| CartItem {
                id: i.id, cart_id: i.cart_id, product_id: i.product_id, description: i.description, quantity: i.quantity,
                unit_price: i.unit_price, total_price: i.total_price, price_hash: i.price_hash, created_at: i.created_at, updated_at: i.updated_at,
            }).collect(),
            created_at: self.created_at, updated_at: self.updated_at,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product {
            id: r.id, category_id: r.category_id, name: r.name, price: r.price, currency: r.currency, is_active: r.is_active,
            track_quantity: r.track_quantity, stock_quantity: r.stock_quantity, allow_backorder: r.allow_backorder,
        }
    }
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;
    fn try_from(r: CouponRow) -> Result<Self, StoreError> {
        Ok(Coupon {
            id: r.id, code: r.code, name: r.name, description: r.description, kind: parse::<CouponType>("coupons.type", &r.kind)?,
            value: r.value, min_order_amount: r.min_order_amount, max_discount_amount: r.max_discount_amount,
            usage_limit: r.usage_limit, used_count: r.used_count, user_usage_limit: r.user_usage_limit,
            starts_at: r.starts_at, expires_at: r.expires_at, is_active: r.is_active, is_public: r.is_public,
            applicable_product_ids: r.applicable_product_ids, applicable_category_ids: r.applicable_category_ids,
            excluded_product_ids: r.excluded_product_ids, deleted_at: r.deleted_at,
        })
    }
}

const COUPON_COLUMNS: &str = "id, code, name, description, type AS kind, value, min_order_amount, max_discount_amount, usage_limit, used_count, \
    user_usage_limit, starts_at, expires_at, is_active, is_public, applicable_product_ids, applicable_category_ids, excluded_product_ids, deleted_at";

/// `$1` is the current time, `$2` an optional coupon type.
const PUBLIC_COUPONS: &str = "is_public AND is_active AND deleted_at IS NULL \
    AND (starts_at IS NULL OR starts_at <= $1) AND (expires_at IS NULL OR expires_at > $1) \
    AND (usage_limit IS NULL OR used_count < usage_limit) AND ($2::text IS NULL OR type = $2)";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn find_active_cart(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        let Some(row) = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE user_id = $1 AND status = 'active'")
            .bind(user_id).fetch_optional(&self.pool).await? else { return Ok(None) };
        let items = sqlx::query_as::<_, CartItemRow>("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at, id")
            .bind(row.id).fetch_all(&self.pool).await?;
        row.into_cart(items).map(Some)
    }

    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO carts (id, user_id, status, subtotal, tax_amount, discount_amount, total, currency, coupon_id, coupon_code, expires_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)")
            .bind(cart.id).bind(cart.user_id).bind(cart.status.as_ref()).bind(cart.subtotal).bind(cart.tax_amount).bind(cart.discount_amount)
            .bind(cart.total).bind(&cart.currency).bind(cart.coupon_id).bind(&cart.coupon_code).bind(cart.expires_at).bind(cart.created_at).bind(cart.updated_at)
            .execute(&self.pool).await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Conflict(format!("user {} already has an active cart", cart.user_id))),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE carts SET status = $2, subtotal = $3, tax_amount = $4, discount_amount = $5, total = $6, coupon_id = $7, coupon_code = $8, expires_at = $9, updated_at = $10 WHERE id = $1 AND status = 'active'")
            .bind(cart.id).bind(cart.status.as_ref()).bind(cart.subtotal).bind(cart.tax_amount).bind(cart.discount_amount).bind(cart.total)
            .bind(cart.coupon_id).bind(&cart.coupon_code).bind(cart.expires_at).bind(cart.updated_at)
            .execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!("cart {} is no longer active", cart.id)));
        }
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart.id).execute(&mut *tx).await?;
        for item in &cart.items {
            sqlx::query("INSERT INTO cart_items (id, cart_id, product_id, description, quantity, unit_price, total_price, price_hash, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
                .bind(item.id).bind(cart.id).bind(item.product_id).bind(&item.description).bind(item.quantity).bind(item.unit_price)
                .bind(item.total_price).bind(&item.price_hash).bind(item.created_at).bind(item.updated_at)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, category_id, name, price, currency, is_active, track_quantity, stock_quantity, allow_backorder FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Product::from))
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, category_id, name, price, currency, is_active, track_quantity, stock_quantity, allow_backorder FROM products WHERE id = ANY($1)")
            .bind(ids).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn find_coupon(&self, id: Uuid) -> Result<Option<Coupon>, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1 AND deleted_at IS NULL"))
            .bind(id).fetch_optional(&self.pool).await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1 AND deleted_at IS NULL"))
            .bind(code.as_str()).fetch_optional(&self.pool).await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn list_public_coupons(&self, kind: Option<CouponType>, now: DateTime<Utc>, limit: i64, offset: i64) -> Result<(Vec<Coupon>, i64), StoreError> {
        let kind = kind.map(|k| k.to_string());
        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM coupons WHERE {PUBLIC_COUPONS}"))
            .bind(now).bind(&kind).fetch_one(&self.pool).await?;
        let rows = sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE {PUBLIC_COUPONS} ORDER BY code LIMIT $3 OFFSET $4"))
            .bind(now).bind(&kind).bind(limit).bind(offset).fetch_all(&self.pool).await?;
        let coupons = rows.into_iter().map(Coupon::try_from).collect::<Result<Vec<_>, _>>()?;
        Ok((coupons, total))
    }

    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id).bind(user_id).fetch_one(&self.pool).await?)
    }

    async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let Some(r) = sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await? else { return Ok(None) };
        let items = sqlx::query_as::<_, InvoiceItemRow>("SELECT id, invoice_id, description, quantity, unit_price, total FROM invoice_items WHERE invoice_id = $1 ORDER BY id")
            .bind(id).fetch_all(&self.pool).await?;
        Ok(Some(Invoice {
            id: r.id, user_id: r.user_id, cart_id: r.cart_id, service_id: r.service_id, invoice_number: r.invoice_number,
            status: parse::<InvoiceStatus>("invoices.status", &r.status)?, subtotal: r.subtotal, tax_amount: r.tax_amount,
            discount_amount: r.discount_amount, total: r.total, currency: r.currency, payment_method: r.payment_method,
            payment_id: r.payment_id, due_date: r.due_date, paid_at: r.paid_at, notes: r.notes,
            items: items.into_iter().map(|i| InvoiceItem {
                id: i.id, invoice_id: i.invoice_id, description: i.description, quantity: i.quantity, unit_price: i.unit_price, total: i.total,
            }).collect(),
            created_at: r.created_at,
        }))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(PgTransaction { tx: self.pool.begin().await? }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO invoices (id, user_id, cart_id, service_id, invoice_number, status, subtotal, tax_amount, discount_amount, total, currency, payment_method, payment_id, due_date, paid_at, notes, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)")
            .bind(invoice.id).bind(invoice.user_id).bind(invoice.cart_id).bind(invoice.service_id).bind(&invoice.invoice_number)
            .bind(invoice.status.as_ref()).bind(invoice.subtotal).bind(invoice.tax_amount).bind(invoice.discount_amount).bind(invoice.total)
            .bind(&invoice.currency).bind(&invoice.payment_method).bind(&invoice.payment_id).bind(invoice.due_date).bind(invoice.paid_at)
            .bind(&invoice.notes).bind(invoice.created_at)
            .execute(&mut *self.tx).await?;
        for item in &invoice.items {
            sqlx::query("INSERT INTO invoice_items (id, invoice_id, description, quantity, unit_price, total) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(item.id).bind(invoice.id).bind(&item.description).bind(item.quantity).bind(item.unit_price).bind(item.total)
                .execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE products SET stock_quantity = stock_quantity - $2 WHERE id = $1 AND stock_quantity >= $2")
            .bind(product_id).bind(quantity).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn stock_level(&mut self, product_id: Uuid) -> Result<Option<i32>, StoreError> {
        Ok(sqlx::query_scalar::<_, i32>("SELECT stock_quantity FROM products WHERE id = $1")
            .bind(product_id).fetch_optional(&mut *self.tx).await?)
    }

    async fn increment_coupon_usage(&mut self, coupon_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE coupons SET used_count = used_count + 1 WHERE id = $1 AND deleted_at IS NULL AND (usage_limit IS NULL OR used_count < usage_limit)")
            .bind(coupon_id).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn count_coupon_usages(&mut self, coupon_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id).bind(user_id).fetch_one(&mut *self.tx).await?)
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO coupon_usages (id, coupon_id, user_id, cart_id, invoice_id, discount_amount, used_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(usage.id).bind(usage.coupon_id).bind(usage.user_id).bind(usage.cart_id).bind(usage.invoice_id)
            .bind(usage.discount_amount).bind(usage.used_at)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn complete_cart(&mut self, cart: &Cart) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE carts SET status = 'completed', subtotal = $2, tax_amount = $3, discount_amount = $4, total = $5, updated_at = $6 WHERE id = $1 AND status = 'active'")
            .bind(cart.id).bind(cart.subtotal).bind(cart.tax_amount).bind(cart.discount_amount).bind(cart.total).bind(cart.updated_at)
            .execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn mark_invoice_paid(&mut self, invoice_id: Uuid, payment_id: &str, payment_method: &str, paid_at: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE invoices SET status = 'paid', payment_id = $2, payment_method = $3, paid_at = $4 WHERE id = $1 AND status IN ('pending', 'overdue')")
            .bind(invoice_id).bind(payment_id).bind(payment_method).bind(paid_at)
            .execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn activate_service(&mut self, service_id: Uuid, activated_at: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE services SET status = 'active', activated_at = $2 WHERE id = $1 AND status = 'pending'")
            .bind(service_id).bind(activated_at).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
