//! In-memory store
//!
//! Implements every repository over plain collections behind one async mutex,
//! so each call is atomic. Used when no database is configured in development
//! and by the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CartRepository, Catalog, DiscountFilter, DiscountRepository, OrderFilter, OrderRepository, Page, PaymentRepository,
    ORDER_CHANGED,
};
use crate::domain::aggregates::{
    Cart, CartItem, CartTotals, Discount, DiscountUsage, Order, OrderStats, Payment, PaymentMirror, PaymentStats,
    PaymentStatus, Product, ProductVariant,
};
use crate::domain::value_objects::{OrderNumber, Timeframe};
use crate::{EcommerceError, Result};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    variants: HashMap<Uuid, ProductVariant>,
    /// Keyed by cart id; `items` is left empty and filled on read
    carts: HashMap<Uuid, Cart>,
    cart_items: HashMap<Uuid, CartItem>,
    discounts: HashMap<Uuid, Discount>,
    usages: Vec<DiscountUsage>,
    orders: HashMap<Uuid, Order>,
    order_sequence: i64,
    payments: HashMap<Uuid, Payment>,
}

impl State {
    fn cart_with_items(&self, mut cart: Cart) -> Cart {
        let mut items: Vec<CartItem> = self.cart_items.values().filter(|i| i.cart_id == cart.id).cloned().collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        cart.items = items;
        cart
    }

    fn code_taken(&self, code: &str, except: Option<Uuid>) -> bool {
        self.discounts.values().any(|d| d.code == code && Some(d.id) != except)
    }

    fn redeem(&mut self, usage: &DiscountUsage) -> Result<Discount> {
        let prior = self.usages.iter().any(|u| u.discount_id == usage.discount_id && u.user_id == usage.user_id);
        let discount = self.discounts.get_mut(&usage.discount_id).ok_or_else(|| EcommerceError::not_found("Discount"))?;
        discount.check_redeemable(usage.user_id, prior, Utc::now())?;
        discount.used_count += 1;
        discount.updated_at = Utc::now();
        let discount = discount.clone();
        self.usages.push(usage.clone());
        Ok(discount)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a catalog product.
    pub async fn put_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Seeds a catalog variant.
    pub async fn put_variant(&self, variant: ProductVariant) {
        self.state.lock().await.variants.insert(variant.id, variant);
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn variant(&self, id: Uuid) -> Result<Option<ProductVariant>> {
        Ok(self.state.lock().await.variants.get(&id).cloned())
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn find_cart(&self, user_id: Uuid) -> Result<Option<Cart>> {
        let state = self.state.lock().await;
        let cart = state.carts.values().find(|c| c.user_id == user_id).cloned();
        Ok(cart.map(|c| state.cart_with_items(c)))
    }

    async fn create_cart(&self, user_id: Uuid) -> Result<Cart> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.carts.values().find(|c| c.user_id == user_id).cloned() {
            return Ok(state.cart_with_items(existing));
        }
        let cart = Cart::new(user_id);
        state.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn find_cart_item(&self, item_id: Uuid) -> Result<Option<CartItem>> {
        Ok(self.state.lock().await.cart_items.get(&item_id).cloned())
    }

    async fn insert_cart_item(&self, item: &CartItem) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.cart_items.values().any(|i| i.cart_id == item.cart_id && i.matches(item.product_id, item.variant_id)) {
            return Err(EcommerceError::conflict("Item is already in the cart"));
        }
        state.cart_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_cart_item(&self, item: &CartItem) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.cart_items.get_mut(&item.id).ok_or_else(|| EcommerceError::not_found("Cart item"))?;
        stored.quantity = item.quantity;
        stored.price = item.price;
        stored.updated_at = item.updated_at;
        Ok(())
    }

    async fn delete_cart_item(&self, item_id: Uuid) -> Result<()> {
        self.state.lock().await.cart_items.remove(&item_id);
        Ok(())
    }

    async fn clear_cart_items(&self, cart_id: Uuid) -> Result<()> {
        self.state.lock().await.cart_items.retain(|_, i| i.cart_id != cart_id);
        Ok(())
    }

    async fn refresh_cart_totals(&self, cart_id: Uuid) -> Result<Cart> {
        let mut state = self.state.lock().await;
        let items: Vec<CartItem> = state.cart_items.values().filter(|i| i.cart_id == cart_id).cloned().collect();
        let totals = CartTotals::from_items(&items);
        let cart = state.carts.get_mut(&cart_id).ok_or_else(|| EcommerceError::not_found("Cart"))?;
        cart.items_count = totals.items_count;
        cart.total_amount = totals.total_amount;
        cart.updated_at = Utc::now();
        let cart = cart.clone();
        Ok(state.cart_with_items(cart))
    }
}

#[async_trait]
impl DiscountRepository for MemoryStore {
    async fn insert_discount(&self, discount: &Discount) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.code_taken(&discount.code, None) {
            return Err(EcommerceError::conflict(format!("Discount code '{}' already exists", discount.code)));
        }
        state.discounts.insert(discount.id, discount.clone());
        Ok(())
    }

    async fn update_discount(&self, discount: &Discount) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.code_taken(&discount.code, Some(discount.id)) {
            return Err(EcommerceError::conflict(format!("Discount code '{}' already exists", discount.code)));
        }
        let stored = state.discounts.get_mut(&discount.id).ok_or_else(|| EcommerceError::not_found("Discount"))?;
        // the usage counter is owned by redemption, never by edits
        let used_count = stored.used_count;
        *stored = Discount { used_count, ..discount.clone() };
        Ok(())
    }

    async fn find_discount(&self, id: Uuid) -> Result<Option<Discount>> {
        Ok(self.state.lock().await.discounts.get(&id).cloned())
    }

    async fn find_discount_by_code(&self, code: &str) -> Result<Option<Discount>> {
        Ok(self.state.lock().await.discounts.values().find(|d| d.code == code).cloned())
    }

    async fn list_discounts(&self, filter: &DiscountFilter) -> Result<Page<Discount>> {
        let state = self.state.lock().await;
        let mut matched: Vec<Discount> = state.discounts.values().filter(|d| filter.matches(d)).cloned().collect();
        matched.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(Page::from_sorted(matched, filter.page))
    }

    async fn live_discounts(&self, now: DateTime<Utc>) -> Result<Vec<Discount>> {
        let state = self.state.lock().await;
        let mut live: Vec<Discount> = state.discounts.values().filter(|d| d.is_live(now)).cloned().collect();
        live.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(live)
    }

    async fn has_discount_usage(&self, discount_id: Uuid, user_id: Uuid) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.usages.iter().any(|u| u.discount_id == discount_id && u.user_id == user_id))
    }

    async fn recent_discount_usages(&self, discount_id: Uuid, limit: i64) -> Result<Vec<DiscountUsage>> {
        let state = self.state.lock().await;
        let mut usages: Vec<DiscountUsage> = state.usages.iter().filter(|u| u.discount_id == discount_id).cloned().collect();
        usages.sort_by(|a, b| b.used_at.cmp(&a.used_at));
        usages.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(usages)
    }

    async fn apply_discount_usage(&self, usage: &DiscountUsage) -> Result<Discount> {
        self.state.lock().await.redeem(usage)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, mut order: Order, usage: Option<&DiscountUsage>) -> Result<Order> {
        let mut state = self.state.lock().await;
        if let Some(usage) = usage {
            state.redeem(usage)?;
        }
        state.order_sequence += 1;
        order.order_number = OrderNumber::new(state.order_sequence).to_string();
        for item in &mut order.items {
            item.order_id = order.id;
        }
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.values().find(|o| o.order_number == order_number).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        let state = self.state.lock().await;
        let mut matched: Vec<Order> = state.orders.values().filter(|o| filter.matches(o)).cloned().collect();
        matched.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(Page::from_sorted(matched, filter.page))
    }

    async fn save_order(&self, order: &Order, seen: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.orders.get_mut(&order.id).ok_or_else(|| EcommerceError::not_found("Order"))?;
        if stored.updated_at != seen {
            return Err(EcommerceError::conflict(ORDER_CHANGED));
        }
        *stored = order.clone();
        Ok(())
    }

    async fn order_stats(&self, timeframe: Timeframe, since: DateTime<Utc>) -> Result<OrderStats> {
        let state = self.state.lock().await;
        Ok(OrderStats::from_orders(timeframe, state.orders.values().filter(|o| o.created_at >= since)))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment, mirror: Option<&PaymentMirror>) -> Result<()> {
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&payment.order_id).ok_or_else(|| EcommerceError::not_found("Order"))?;
        if let Some(mirror) = mirror {
            order.apply_payment(mirror, Utc::now());
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn save_payment(&self, payment: &Payment, expected: PaymentStatus, mirror: Option<&PaymentMirror>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let stored = state.payments.get(&payment.id).ok_or_else(|| EcommerceError::not_found("Payment"))?;
        if stored.status != expected {
            return Ok(false);
        }
        if let Some(mirror) = mirror {
            let order = state.orders.get_mut(&payment.order_id).ok_or_else(|| EcommerceError::not_found("Order"))?;
            order.apply_payment(mirror, Utc::now());
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(true)
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.values().find(|p| p.payment_intent_id.as_deref() == Some(reference)).cloned())
    }

    async fn order_payments(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state.payments.values().filter(|p| p.order_id == order_id).cloned().collect();
        payments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(payments)
    }

    async fn payment_stats(&self, timeframe: Timeframe, since: DateTime<Utc>) -> Result<PaymentStats> {
        let state = self.state.lock().await;
        Ok(PaymentStats::from_payments(timeframe, state.payments.values().filter(|p| p.created_at >= since)))
    }
}
