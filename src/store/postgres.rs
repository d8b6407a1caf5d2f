//! PostgreSQL store

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    like_pattern, CartRepository, Catalog, DiscountFilter, DiscountRepository, OrderFilter, OrderRepository, Page,
    Pagination, PaymentRepository, ORDER_CHANGED,
};
use crate::domain::aggregates::payment::MethodBreakdown;
use crate::domain::aggregates::{
    BillingAddress, Cart, CartItem, CustomerSnapshot, Discount, DiscountUsage, Order, OrderItem, OrderStats, Payment,
    PaymentMirror, PaymentStats, PaymentStatus, Product, ProductStatus, ProductVariant, ShippingAddress,
};
use crate::domain::value_objects::{OrderNumber, PaymentMetadata, Timeframe};
use crate::{EcommerceError, Result};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_items(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items: Vec<OrderItemRow> = sqlx::query_as("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item.into());
        }
        rows.into_iter()
            .map(|row| {
                let items = by_order.remove(&row.id).unwrap_or_default();
                row.into_order(items)
            })
            .collect()
    }

    async fn load_cart(&self, row: CartRow) -> Result<Cart> {
        let items: Vec<CartItemRow> =
            sqlx::query_as("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at DESC, id DESC")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;
        Ok(row.into_cart(items.into_iter().map(Into::into).collect()))
    }
}

// ── Rows ──

fn parse<T: FromStr>(value: &str, column: &str) -> Result<T> {
    value.parse().map_err(|_| EcommerceError::StorageError(format!("invalid {column} value '{value}'")))
}

/// Unique violations become conflicts; everything else stays a storage error.
fn unique_conflict(e: sqlx::Error, message: String) -> EcommerceError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => EcommerceError::Conflict(message),
        _ => e.into(),
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    sku: String,
    price: Decimal,
    compare_price: Option<Decimal>,
    status: String,
    track_quantity: bool,
    quantity: i32,
    category_id: Option<Uuid>,
    image_url: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProductRow> for Product {
    type Error = EcommerceError;
    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Product {
            status: parse::<ProductStatus>(&r.status, "product status")?,
            id: r.id, name: r.name, sku: r.sku, price: r.price, compare_price: r.compare_price,
            track_quantity: r.track_quantity, quantity: r.quantity, category_id: r.category_id,
            image_url: r.image_url, deleted_at: r.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
    sku: Option<String>,
    price: Decimal,
    compare_price: Option<Decimal>,
    track_quantity: bool,
    quantity: i32,
}

impl From<VariantRow> for ProductVariant {
    fn from(r: VariantRow) -> Self {
        ProductVariant {
            id: r.id, product_id: r.product_id, name: r.name, sku: r.sku, price: r.price,
            compare_price: r.compare_price, track_quantity: r.track_quantity, quantity: r.quantity,
        }
    }
}

#[derive(FromRow)]
struct CartRow {
    id: Uuid,
    user_id: Uuid,
    items_count: i32,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartRow {
    fn into_cart(self, items: Vec<CartItem>) -> Cart {
        Cart {
            id: self.id, user_id: self.user_id, items_count: self.items_count, total_amount: self.total_amount,
            items, created_at: self.created_at, updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct CartItemRow {
    id: Uuid,
    cart_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
    price: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CartItemRow> for CartItem {
    fn from(r: CartItemRow) -> Self {
        CartItem {
            id: r.id, cart_id: r.cart_id, product_id: r.product_id, variant_id: r.variant_id,
            quantity: r.quantity, price: r.price, created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct DiscountRow {
    id: Uuid,
    code: String,
    name: String,
    description: Option<String>,
    #[sqlx(rename = "type")]
    discount_type: String,
    value: Decimal,
    usage_limit: Option<i32>,
    used_count: i32,
    min_order_amount: Option<Decimal>,
    max_discount_amount: Option<Decimal>,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    applies_to_all_products: bool,
    product_ids: Vec<Uuid>,
    category_ids: Vec<Uuid>,
    once_per_customer: bool,
    customer_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DiscountRow> for Discount {
    type Error = EcommerceError;
    fn try_from(r: DiscountRow) -> Result<Self> {
        Ok(Discount {
            discount_type: parse(&r.discount_type, "discount type")?,
            id: r.id, code: r.code, name: r.name, description: r.description, value: r.value,
            usage_limit: r.usage_limit, used_count: r.used_count, min_order_amount: r.min_order_amount,
            max_discount_amount: r.max_discount_amount, starts_at: r.starts_at, expires_at: r.expires_at,
            is_active: r.is_active, applies_to_all_products: r.applies_to_all_products, product_ids: r.product_ids,
            category_ids: r.category_ids, once_per_customer: r.once_per_customer, customer_ids: r.customer_ids,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UsageRow {
    id: Uuid,
    discount_id: Uuid,
    user_id: Uuid,
    order_id: Option<Uuid>,
    product_id: Option<Uuid>,
    used_at: DateTime<Utc>,
}

impl From<UsageRow> for DiscountUsage {
    fn from(r: UsageRow) -> Self {
        DiscountUsage {
            id: r.id, discount_id: r.discount_id, user_id: r.user_id, order_id: r.order_id,
            product_id: r.product_id, used_at: r.used_at,
        }
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    shipping_amount: Decimal,
    total_amount: Decimal,
    status: String,
    payment_status: String,
    payment_method: String,
    customer_email: String,
    customer_first_name: String,
    customer_last_name: String,
    customer_phone: Option<String>,
    shipping_address: Json<ShippingAddress>,
    billing_address: Json<BillingAddress>,
    discount_id: Option<Uuid>,
    discount_code: Option<String>,
    customer_note: Option<String>,
    internal_note: Option<String>,
    transaction_id: Option<String>,
    tracking_number: Option<String>,
    carrier: Option<String>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            status: parse(&self.status, "order status")?,
            payment_status: parse(&self.payment_status, "payment status")?,
            payment_method: parse(&self.payment_method, "payment method")?,
            customer: CustomerSnapshot {
                email: self.customer_email,
                first_name: self.customer_first_name,
                last_name: self.customer_last_name,
                phone: self.customer_phone,
            },
            shipping: self.shipping_address.0,
            billing: self.billing_address.0,
            id: self.id, order_number: self.order_number, user_id: self.user_id, subtotal: self.subtotal,
            discount_amount: self.discount_amount, tax_amount: self.tax_amount, shipping_amount: self.shipping_amount,
            total_amount: self.total_amount, discount_id: self.discount_id, discount_code: self.discount_code,
            customer_note: self.customer_note, internal_note: self.internal_note, transaction_id: self.transaction_id,
            tracking_number: self.tracking_number, carrier: self.carrier, shipped_at: self.shipped_at,
            delivered_at: self.delivered_at, cancelled_at: self.cancelled_at, refunded_at: self.refunded_at,
            created_at: self.created_at, updated_at: self.updated_at, items,
        })
    }
}

#[derive(FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    product_name: String,
    product_sku: String,
    variant_name: Option<String>,
    product_image: Option<String>,
    price: Decimal,
    compare_price: Option<Decimal>,
    quantity: i32,
    total: Decimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            id: r.id, order_id: r.order_id, product_id: r.product_id, variant_id: r.variant_id,
            product_name: r.product_name, product_sku: r.product_sku, variant_name: r.variant_name,
            product_image: r.product_image, price: r.price, compare_price: r.compare_price,
            quantity: r.quantity, total: r.total,
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    amount: Decimal,
    currency: String,
    payment_method: String,
    processor: String,
    status: String,
    transaction_id: Option<String>,
    payment_intent_id: Option<String>,
    failure_reason: Option<String>,
    metadata: Json<PaymentMetadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = EcommerceError;
    fn try_from(r: PaymentRow) -> Result<Self> {
        Ok(Payment {
            payment_method: parse(&r.payment_method, "payment method")?,
            status: parse(&r.status, "payment status")?,
            id: r.id, order_id: r.order_id, amount: r.amount, currency: r.currency, processor: r.processor,
            transaction_id: r.transaction_id, payment_intent_id: r.payment_intent_id,
            failure_reason: r.failure_reason, metadata: r.metadata.0, created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

// ── Shared statements ──

/// Locks the discount row, re-checks redeemability, records the usage and
/// bumps the counter. Must run inside a transaction.
async fn redeem(conn: &mut PgConnection, usage: &DiscountUsage) -> Result<Discount> {
    let row: Option<DiscountRow> = sqlx::query_as("SELECT * FROM discounts WHERE id = $1 FOR UPDATE")
        .bind(usage.discount_id)
        .fetch_optional(&mut *conn)
        .await?;
    let discount = Discount::try_from(row.ok_or_else(|| EcommerceError::not_found("Discount"))?)?;
    let (prior,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM discount_usages WHERE discount_id = $1 AND user_id = $2)")
            .bind(usage.discount_id)
            .bind(usage.user_id)
            .fetch_one(&mut *conn)
            .await?;
    discount.check_redeemable(usage.user_id, prior, Utc::now())?;

    sqlx::query(
        "INSERT INTO discount_usages (id, discount_id, user_id, order_id, product_id, used_at) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(usage.id)
    .bind(usage.discount_id)
    .bind(usage.user_id)
    .bind(usage.order_id)
    .bind(usage.product_id)
    .bind(usage.used_at)
    .execute(&mut *conn)
    .await?;

    let row: DiscountRow =
        sqlx::query_as("UPDATE discounts SET used_count = used_count + 1, updated_at = NOW() WHERE id = $1 RETURNING *")
            .bind(usage.discount_id)
            .fetch_one(&mut *conn)
            .await?;
    row.try_into()
}

async fn update_order(conn: &mut PgConnection, order: &Order, seen: DateTime<Utc>) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET
            status = $2, payment_status = $3, internal_note = $4, transaction_id = $5,
            tracking_number = $6, carrier = $7, shipped_at = $8, delivered_at = $9,
            cancelled_at = $10, refunded_at = $11, updated_at = $12
        WHERE id = $1 AND updated_at = $13
        "#,
    )
    .bind(order.id)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(&order.internal_note)
    .bind(&order.transaction_id)
    .bind(&order.tracking_number)
    .bind(&order.carrier)
    .bind(order.shipped_at)
    .bind(order.delivered_at)
    .bind(order.cancelled_at)
    .bind(order.refunded_at)
    .bind(order.updated_at)
    .bind(seen)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(order.id)
            .fetch_one(&mut *conn)
            .await?;
        return Err(if exists { EcommerceError::conflict(ORDER_CHANGED) } else { EcommerceError::not_found("Order") });
    }
    Ok(())
}

/// Column-level counterpart of [`Order::apply_payment`].
async fn apply_payment_mirror(conn: &mut PgConnection, order_id: Uuid, mirror: &PaymentMirror) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders SET
            payment_status = $2,
            transaction_id = COALESCE($3, transaction_id),
            status = CASE WHEN $2 = 'COMPLETED' AND status = 'PENDING' THEN 'CONFIRMED' ELSE status END,
            refunded_at = CASE WHEN $2 = 'REFUNDED' THEN COALESCE(refunded_at, $4) ELSE refunded_at END,
            updated_at = $4
        WHERE id = $1 AND NOT ($5 AND payment_status IN ('COMPLETED', 'REFUNDED'))
        "#,
    )
    .bind(order_id)
    .bind(mirror.status.as_str())
    .bind(&mirror.transaction_id)
    .bind(Utc::now())
    .bind(mirror.unless_settled)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_payment_row(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, order_id, amount, currency, payment_method, processor, status,
            transaction_id, payment_intent_id, failure_reason, metadata, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.payment_method.as_str())
    .bind(&payment.processor)
    .bind(payment.status.as_str())
    .bind(&payment.transaction_id)
    .bind(&payment.payment_intent_id)
    .bind(&payment.failure_reason)
    .bind(Json(&payment.metadata))
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| unique_conflict(e, "Payment reference already recorded".to_string()))?;
    Ok(())
}

/// Returns `false` when the stored status is no longer `expected`.
async fn update_payment_row(conn: &mut PgConnection, payment: &Payment, expected: PaymentStatus) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments SET
            status = $2, transaction_id = $3, failure_reason = $4, metadata = $5, updated_at = $6
        WHERE id = $1 AND status = $7
        "#,
    )
    .bind(payment.id)
    .bind(payment.status.as_str())
    .bind(&payment.transaction_id)
    .bind(&payment.failure_reason)
    .bind(Json(&payment.metadata))
    .bind(payment.updated_at)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payments WHERE id = $1)")
            .bind(payment.id)
            .fetch_one(&mut *conn)
            .await?;
        if !exists {
            return Err(EcommerceError::not_found("Payment"));
        }
        return Ok(false);
    }
    Ok(true)
}

const DISCOUNT_FILTER: &str = r#"
    WHERE ($1::bool IS NULL OR is_active = $1)
      AND ($2::text IS NULL OR type = $2)
      AND ($3::text IS NULL OR code ILIKE $3 OR name ILIKE $3)
"#;

const ORDER_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR user_id = $1)
      AND ($2::text IS NULL OR status = $2)
      AND ($3::text IS NULL OR payment_status = $3)
      AND ($4::text IS NULL OR payment_method = $4)
      AND ($5::timestamptz IS NULL OR created_at >= $5)
      AND ($6::timestamptz IS NULL OR created_at <= $6)
      AND ($7::text IS NULL OR order_number ILIKE $7 OR customer_email ILIKE $7
           OR customer_first_name ILIKE $7 OR customer_last_name ILIKE $7)
"#;

// ── Repositories ──

#[async_trait]
impl Catalog for PgStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Product::try_from).transpose()
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>> {
        let row: Option<VariantRow> = sqlx::query_as("SELECT * FROM product_variants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn find_cart(&self, user_id: Uuid) -> Result<Option<Cart>> {
        let row: Option<CartRow> = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.load_cart(row).await?)),
            None => Ok(None),
        }
    }

    async fn create_cart(&self, user_id: Uuid) -> Result<Cart> {
        sqlx::query(
            "INSERT INTO carts (id, user_id, created_at, updated_at) VALUES ($1, $2, NOW(), NOW()) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        self.find_cart(user_id).await?.ok_or_else(|| EcommerceError::not_found("Cart"))
    }

    async fn find_cart_item(&self, item_id: Uuid) -> Result<Option<CartItem>> {
        let row: Option<CartItemRow> = sqlx::query_as("SELECT * FROM cart_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_cart_item(&self, item: &CartItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (id, cart_id, product_id, variant_id, quantity, price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(item.id)
        .bind(item.cart_id)
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(item.quantity)
        .bind(item.price)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, "Item is already in the cart".to_string()))?;
        Ok(())
    }

    async fn update_cart_item(&self, item: &CartItem) -> Result<()> {
        let result = sqlx::query("UPDATE cart_items SET quantity = $2, price = $3, updated_at = $4 WHERE id = $1")
            .bind(item.id)
            .bind(item.quantity)
            .bind(item.price)
            .bind(item.updated_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EcommerceError::not_found("Cart item"));
        }
        Ok(())
    }

    async fn delete_cart_item(&self, item_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1").bind(item_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn clear_cart_items(&self, cart_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn refresh_cart_totals(&self, cart_id: Uuid) -> Result<Cart> {
        let row: Option<CartRow> = sqlx::query_as(
            r#"
            UPDATE carts SET
                items_count = COALESCE((SELECT SUM(quantity) FROM cart_items WHERE cart_id = $1), 0)::int,
                total_amount = COALESCE((SELECT SUM(price * quantity) FROM cart_items WHERE cart_id = $1), 0),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(cart_id)
        .fetch_optional(&self.pool)
        .await?;
        self.load_cart(row.ok_or_else(|| EcommerceError::not_found("Cart"))?).await
    }
}

#[async_trait]
impl DiscountRepository for PgStore {
    async fn insert_discount(&self, d: &Discount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discounts (
                id, code, name, description, type, value, usage_limit, used_count,
                min_order_amount, max_discount_amount, starts_at, expires_at, is_active,
                applies_to_all_products, product_ids, category_ids, once_per_customer,
                customer_ids, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(d.id)
        .bind(&d.code)
        .bind(&d.name)
        .bind(&d.description)
        .bind(d.discount_type.as_str())
        .bind(d.value)
        .bind(d.usage_limit)
        .bind(d.used_count)
        .bind(d.min_order_amount)
        .bind(d.max_discount_amount)
        .bind(d.starts_at)
        .bind(d.expires_at)
        .bind(d.is_active)
        .bind(d.applies_to_all_products)
        .bind(&d.product_ids)
        .bind(&d.category_ids)
        .bind(d.once_per_customer)
        .bind(&d.customer_ids)
        .bind(d.created_at)
        .bind(d.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, format!("Discount code '{}' already exists", d.code)))?;
        Ok(())
    }

    async fn update_discount(&self, d: &Discount) -> Result<()> {
        // used_count is owned by redemption and is never written here
        let result = sqlx::query(
            r#"
            UPDATE discounts SET
                code = $2, name = $3, description = $4, type = $5, value = $6, usage_limit = $7,
                min_order_amount = $8, max_discount_amount = $9, starts_at = $10, expires_at = $11,
                is_active = $12, applies_to_all_products = $13, product_ids = $14, category_ids = $15,
                once_per_customer = $16, customer_ids = $17, updated_at = $18
            WHERE id = $1
            "#,
        )
        .bind(d.id)
        .bind(&d.code)
        .bind(&d.name)
        .bind(&d.description)
        .bind(d.discount_type.as_str())
        .bind(d.value)
        .bind(d.usage_limit)
        .bind(d.min_order_amount)
        .bind(d.max_discount_amount)
        .bind(d.starts_at)
        .bind(d.expires_at)
        .bind(d.is_active)
        .bind(d.applies_to_all_products)
        .bind(&d.product_ids)
        .bind(&d.category_ids)
        .bind(d.once_per_customer)
        .bind(&d.customer_ids)
        .bind(d.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, format!("Discount code '{}' already exists", d.code)))?;
        if result.rows_affected() == 0 {
            return Err(EcommerceError::not_found("Discount"));
        }
        Ok(())
    }

    async fn find_discount(&self, id: Uuid) -> Result<Option<Discount>> {
        let row: Option<DiscountRow> = sqlx::query_as("SELECT * FROM discounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Discount::try_from).transpose()
    }

    async fn find_discount_by_code(&self, code: &str) -> Result<Option<Discount>> {
        let row: Option<DiscountRow> = sqlx::query_as("SELECT * FROM discounts WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Discount::try_from).transpose()
    }

    async fn list_discounts(&self, filter: &DiscountFilter) -> Result<Page<Discount>> {
        let discount_type = filter.discount_type.map(|t| t.as_str());
        let search = filter.search.as_deref().map(like_pattern);

        let select = format!("SELECT * FROM discounts {DISCOUNT_FILTER} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5");
        let rows: Vec<DiscountRow> = sqlx::query_as(&select)
            .bind(filter.is_active)
            .bind(discount_type)
            .bind(&search)
            .bind(i64::from(filter.page.limit))
            .bind(filter.page.offset())
            .fetch_all(&self.pool)
            .await?;

        let count = format!("SELECT COUNT(*) FROM discounts {DISCOUNT_FILTER}");
        let (total,): (i64,) = sqlx::query_as(&count)
            .bind(filter.is_active)
            .bind(discount_type)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        let data = rows.into_iter().map(Discount::try_from).collect::<Result<Vec<_>>>()?;
        Ok(Page { data, pagination: Pagination::new(filter.page, total) })
    }

    async fn live_discounts(&self, now: DateTime<Utc>) -> Result<Vec<Discount>> {
        let rows: Vec<DiscountRow> = sqlx::query_as(
            r#"
            SELECT * FROM discounts
            WHERE is_active
              AND (starts_at IS NULL OR starts_at <= $1)
              AND (expires_at IS NULL OR expires_at >= $1)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Discount::try_from).collect()
    }

    async fn has_discount_usage(&self, discount_id: Uuid, user_id: Uuid) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM discount_usages WHERE discount_id = $1 AND user_id = $2)")
                .bind(discount_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn recent_discount_usages(&self, discount_id: Uuid, limit: i64) -> Result<Vec<DiscountUsage>> {
        let rows: Vec<UsageRow> =
            sqlx::query_as("SELECT * FROM discount_usages WHERE discount_id = $1 ORDER BY used_at DESC LIMIT $2")
                .bind(discount_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn apply_discount_usage(&self, usage: &DiscountUsage) -> Result<Discount> {
        let mut tx = self.pool.begin().await?;
        let discount = redeem(&mut *tx, usage).await?;
        tx.commit().await?;
        Ok(discount)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert_order(&self, mut order: Order, usage: Option<&DiscountUsage>) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let (sequence,): (i64,) = sqlx::query_as("SELECT nextval('order_number_seq')").fetch_one(&mut *tx).await?;
        order.order_number = OrderNumber::new(sequence).to_string();

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id, subtotal, discount_amount, tax_amount, shipping_amount,
                total_amount, status, payment_status, payment_method, customer_email,
                customer_first_name, customer_last_name, customer_phone, shipping_address,
                billing_address, discount_id, discount_code, customer_note, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(order.subtotal)
        .bind(order.discount_amount)
        .bind(order.tax_amount)
        .bind(order.shipping_amount)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(&order.customer.email)
        .bind(&order.customer.first_name)
        .bind(&order.customer.last_name)
        .bind(&order.customer.phone)
        .bind(Json(&order.shipping))
        .bind(Json(&order.billing))
        .bind(order.discount_id)
        .bind(&order.discount_code)
        .bind(&order.customer_note)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in &mut order.items {
            item.order_id = order.id;
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, variant_id, product_name, product_sku, variant_name,
                    product_image, price, compare_price, quantity, total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.variant_id)
            .bind(&item.product_name)
            .bind(&item.product_sku)
            .bind(&item.variant_name)
            .bind(&item.product_image)
            .bind(item.price)
            .bind(item.compare_price)
            .bind(item.quantity)
            .bind(item.total)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(usage) = usage {
            redeem(&mut *tx, usage).await?;
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(self.attach_items(row.into_iter().collect()).await?.pop())
    }

    async fn find_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(self.attach_items(row.into_iter().collect()).await?.pop())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        let status = filter.status.map(|s| s.as_str());
        let payment_status = filter.payment_status.map(|s| s.as_str());
        let payment_method = filter.payment_method.map(|m| m.as_str());
        let search = filter.search.as_deref().map(like_pattern);

        let select = format!("SELECT * FROM orders {ORDER_FILTER} ORDER BY created_at DESC, id DESC LIMIT $8 OFFSET $9");
        let rows: Vec<OrderRow> = sqlx::query_as(&select)
            .bind(filter.user_id)
            .bind(status)
            .bind(payment_status)
            .bind(payment_method)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(&search)
            .bind(i64::from(filter.page.limit))
            .bind(filter.page.offset())
            .fetch_all(&self.pool)
            .await?;

        let count = format!("SELECT COUNT(*) FROM orders {ORDER_FILTER}");
        let (total,): (i64,) = sqlx::query_as(&count)
            .bind(filter.user_id)
            .bind(status)
            .bind(payment_status)
            .bind(payment_method)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page { data: self.attach_items(rows).await?, pagination: Pagination::new(filter.page, total) })
    }

    async fn save_order(&self, order: &Order, seen: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update_order(&mut *conn, order, seen).await
    }

    async fn order_stats(&self, timeframe: Timeframe, since: DateTime<Utc>) -> Result<OrderStats> {
        let (total_orders, total_revenue, average): (i64, Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status <> 'CANCELLED'),
                COALESCE(SUM(total_amount) FILTER (WHERE status <> 'CANCELLED' AND payment_status = 'COMPLETED'), 0),
                COALESCE(AVG(total_amount) FILTER (WHERE status <> 'CANCELLED' AND payment_status = 'COMPLETED'), 0)
            FROM orders
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders WHERE created_at >= $1 GROUP BY status")
                .bind(since)
                .fetch_all(&self.pool)
                .await?;
        let mut status_breakdown = BTreeMap::new();
        for (status, count) in counts {
            status_breakdown.insert(parse(&status, "order status")?, count);
        }

        Ok(OrderStats { timeframe, total_orders, total_revenue, average_order_value: average.round_dp(2), status_breakdown })
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert_payment(&self, payment: &Payment, mirror: Option<&PaymentMirror>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_payment_row(&mut *tx, payment).await?;
        if let Some(mirror) = mirror {
            apply_payment_mirror(&mut *tx, payment.order_id, mirror).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_payment(&self, payment: &Payment, expected: PaymentStatus, mirror: Option<&PaymentMirror>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !update_payment_row(&mut *tx, payment, expected).await? {
            return Ok(false);
        }
        if let Some(mirror) = mirror {
            apply_payment_mirror(&mut *tx, payment.order_id, mirror).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as("SELECT * FROM payments WHERE payment_intent_id = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn order_payments(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let rows: Vec<PaymentRow> =
            sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at DESC, id DESC")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn payment_stats(&self, timeframe: Timeframe, since: DateTime<Utc>) -> Result<PaymentStats> {
        let (successful, failed, revenue): (i64, i64, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'COMPLETED'),
                COUNT(*) FILTER (WHERE status = 'FAILED'),
                COALESCE(SUM(amount) FILTER (WHERE status = 'COMPLETED'), 0)
            FROM payments
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let methods: Vec<(String, i64, Decimal)> = sqlx::query_as(
            r#"
            SELECT payment_method, COUNT(*), COALESCE(SUM(amount), 0)
            FROM payments
            WHERE created_at >= $1 AND status = 'COMPLETED'
            GROUP BY payment_method
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = PaymentStats::empty(timeframe);
        stats.total_revenue = revenue;
        stats.successful_payments = successful;
        stats.failed_payments = failed;
        stats.success_rate = PaymentStats::rate(successful, failed);
        for (method, count, amount) in methods {
            stats.payment_methods.insert(parse(&method, "payment method")?, MethodBreakdown { count, amount });
        }
        Ok(stats)
    }
}
