//! Persistence seams
//!
//! Services depend on these traits only. [`PgStore`] is the production
//! implementation; [`MemoryStore`] backs development without a database and
//! the test suites.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, CartItem, Discount, DiscountType, DiscountUsage, Order, OrderStats, OrderStatus, Payment, PaymentMethod,
    PaymentMirror, PaymentStats, PaymentStatus, Product, ProductVariant,
};
use crate::domain::value_objects::Timeframe;
use crate::Result;

const ORDER_CHANGED: &str = "Order was changed by another request, retry";

/// Read access to the catalog owned by another service.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    /// The user's cart with its items, newest first.
    async fn find_cart(&self, user_id: Uuid) -> Result<Option<Cart>>;
    /// Returns the existing cart when one was created concurrently.
    async fn create_cart(&self, user_id: Uuid) -> Result<Cart>;
    async fn find_cart_item(&self, item_id: Uuid) -> Result<Option<CartItem>>;
    async fn insert_cart_item(&self, item: &CartItem) -> Result<()>;
    async fn update_cart_item(&self, item: &CartItem) -> Result<()>;
    async fn delete_cart_item(&self, item_id: Uuid) -> Result<()>;
    async fn clear_cart_items(&self, cart_id: Uuid) -> Result<()>;
    /// Recomputes `items_count` and `total_amount` from the stored items and
    /// returns the refreshed cart.
    async fn refresh_cart_totals(&self, cart_id: Uuid) -> Result<Cart>;
}

#[async_trait]
pub trait DiscountRepository: Send + Sync {
    /// Conflict when the code is already taken.
    async fn insert_discount(&self, discount: &Discount) -> Result<()>;
    async fn update_discount(&self, discount: &Discount) -> Result<()>;
    async fn find_discount(&self, id: Uuid) -> Result<Option<Discount>>;
    async fn find_discount_by_code(&self, code: &str) -> Result<Option<Discount>>;
    async fn list_discounts(&self, filter: &DiscountFilter) -> Result<Page<Discount>>;
    async fn live_discounts(&self, now: DateTime<Utc>) -> Result<Vec<Discount>>;
    async fn has_discount_usage(&self, discount_id: Uuid, user_id: Uuid) -> Result<bool>;
    async fn recent_discount_usages(&self, discount_id: Uuid, limit: i64) -> Result<Vec<DiscountUsage>>;
    /// Re-checks redeemability under a lock on the discount, records the usage
    /// and increments `used_count`, all or nothing.
    async fn apply_discount_usage(&self, usage: &DiscountUsage) -> Result<Discount>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Assigns the next order number and persists the order with its items.
    /// When `usage` is given the discount is redeemed in the same transaction.
    async fn insert_order(&self, order: Order, usage: Option<&DiscountUsage>) -> Result<Order>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_order_by_number(&self, order_number: &str) -> Result<Option<Order>>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<Order>>;
    /// Persists the mutable fields of an order read when its `updated_at` was
    /// `seen`. Fails with Conflict when another write landed in between. Line
    /// items never change.
    async fn save_order(&self, order: &Order, seen: DateTime<Utc>) -> Result<()>;
    async fn order_stats(&self, timeframe: Timeframe, since: DateTime<Utc>) -> Result<OrderStats>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts the payment and applies `mirror` to its order in one transaction.
    async fn insert_payment(&self, payment: &Payment, mirror: Option<&PaymentMirror>) -> Result<()>;
    /// Saves the payment if its stored status is still `expected`, applying
    /// `mirror` to its order in the same transaction. Returns `false` and
    /// writes nothing when the payment moved on in the meantime.
    async fn save_payment(&self, payment: &Payment, expected: PaymentStatus, mirror: Option<&PaymentMirror>) -> Result<bool>;
    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    /// Newest first
    async fn order_payments(&self, order_id: Uuid) -> Result<Vec<Payment>>;
    async fn payment_stats(&self, timeframe: Timeframe, since: DateTime<Utc>) -> Result<PaymentStats>;
}

/// Everything the services need from storage.
pub trait Store: Catalog + CartRepository + DiscountRepository + OrderRepository + PaymentRepository {}

impl<T> Store for T where T: Catalog + CartRepository + DiscountRepository + OrderRepository + PaymentRepository {}

// =============================================================================
// Filters and pagination
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest { pub page: u32, pub limit: u32 }

impl PageRequest {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), limit: limit.unwrap_or(10).clamp(1, Self::MAX_LIMIT) }
    }

    pub fn offset(&self) -> i64 { (i64::from(self.page) - 1) * i64::from(self.limit) }
}

impl Default for PageRequest {
    fn default() -> Self { Self::new(None, None) }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total: i64) -> Self {
        let limit = i64::from(request.limit);
        let total_pages = (total + limit - 1) / limit;
        Self {
            page: request.page,
            limit: request.limit,
            total,
            total_pages,
            has_next: i64::from(request.page) < total_pages,
            has_prev: request.page > 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Slices an already filtered and ordered collection.
    pub fn from_sorted(items: Vec<T>, request: PageRequest) -> Self {
        let total = items.len() as i64;
        let data = items.into_iter().skip(request.offset() as usize).take(request.limit as usize).collect();
        Self { data, pagination: Pagination::new(request, total) }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub page: PageRequest,
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Case-insensitive match on order number, customer email and names
    pub search: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.map_or(true, |u| order.user_id == u)
            && self.status.map_or(true, |s| order.status == s)
            && self.payment_status.map_or(true, |s| order.payment_status == s)
            && self.payment_method.map_or(true, |m| order.payment_method == m)
            && self.created_from.map_or(true, |from| order.created_at >= from)
            && self.created_to.map_or(true, |to| order.created_at <= to)
            && self.search.as_deref().map_or(true, |term| {
                let term = term.to_lowercase();
                [&order.order_number, &order.customer.email, &order.customer.first_name, &order.customer.last_name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&term))
            })
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiscountFilter {
    pub page: PageRequest,
    pub is_active: Option<bool>,
    pub discount_type: Option<DiscountType>,
    /// Case-insensitive match on code and name
    pub search: Option<String>,
}

impl DiscountFilter {
    pub fn matches(&self, discount: &Discount) -> bool {
        self.is_active.map_or(true, |a| discount.is_active == a)
            && self.discount_type.map_or(true, |t| discount.discount_type == t)
            && self.search.as_deref().map_or(true, |term| {
                let term = term.to_lowercase();
                discount.code.to_lowercase().contains(&term) || discount.name.to_lowercase().contains(&term)
            })
    }
}

/// `%term%` pattern for ILIKE, with the wildcard characters escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_metadata() {
        let p = Pagination::new(PageRequest::new(Some(2), Some(10)), 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next && p.has_prev);
        let last = Pagination::new(PageRequest::new(Some(3), Some(10)), 25);
        assert!(!last.has_next);
        assert_eq!(Pagination::new(PageRequest::default(), 0).total_pages, 0);
    }

    #[test]
    fn test_page_request_bounds() {
        let r = PageRequest::new(Some(0), Some(1000));
        assert_eq!((r.page, r.limit), (1, PageRequest::MAX_LIMIT));
        assert_eq!(PageRequest::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn test_page_from_sorted() {
        let page = Page::from_sorted((1..=7).collect::<Vec<_>>(), PageRequest::new(Some(2), Some(3)));
        assert_eq!(page.data, vec![4, 5, 6]);
        assert_eq!(page.pagination.total, 7);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
