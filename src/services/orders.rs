//! Order lifecycle service

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{non_negative, CartService, DiscountService};
use crate::domain::aggregates::{
    BillingAddress, CustomerSnapshot, DiscountContext, DiscountUsage, NewOrder, Order, OrderDetails, OrderItem,
    OrderStats, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::domain::events::{DiscountEvent, DomainEvent};
use crate::domain::value_objects::{DiscountCode, OrderNumber, Timeframe};
use crate::publisher::EventPublisher;
use crate::store::{OrderFilter, Page, PageRequest, Store};
use crate::{EcommerceError, Result};

// =============================================================================
// Requests
// =============================================================================

/// Client-supplied line snapshot.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    #[validate(length(min = 1, max = 100))]
    pub product_sku: String,
    pub variant_name: Option<String>,
    pub product_image: Option<String>,
    #[validate(custom = "non_negative")]
    pub price: Decimal,
    #[validate(custom = "non_negative")]
    pub compare_price: Option<Decimal>,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Customer, address and charge fields shared by direct orders and checkout.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailsInput {
    /// Falls back to the account email
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub customer_first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub customer_last_name: String,
    pub customer_phone: Option<String>,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub billing_address: BillingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    #[validate(custom = "non_negative")]
    pub tax_amount: Decimal,
    #[serde(default)]
    #[validate(custom = "non_negative")]
    pub shipping_amount: Decimal,
    /// Ignored when `discount_code` is given
    #[serde(default)]
    #[validate(custom = "non_negative")]
    pub discount_amount: Decimal,
    pub discount_code: Option<String>,
    #[validate(length(max = 1000))]
    pub customer_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate]
    pub items: Vec<OrderLineInput>,
    #[serde(flatten)]
    #[validate]
    pub details: OrderDetailsInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    pub internal_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShippingRequest {
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: String,
    #[validate(length(min = 1, max = 100))]
    pub carrier: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

/// Query string of the admin order listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

impl From<OrderQuery> for OrderFilter {
    fn from(q: OrderQuery) -> Self {
        Self {
            page: PageRequest::new(q.page, q.limit),
            user_id: q.user_id,
            status: q.status,
            payment_status: q.payment_status,
            payment_method: q.payment_method,
            created_from: q.date_from,
            created_to: q.date_to,
            search: q.search.filter(|s| !s.trim().is_empty()),
        }
    }
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    discounts: DiscountService,
    carts: CartService,
    events: EventPublisher,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, discounts: DiscountService, carts: CartService, events: EventPublisher) -> Self {
        Self { store, discounts, carts, events }
    }

    /// Places an order from a client-supplied line snapshot.
    pub async fn create_order(&self, user_id: Uuid, account_email: Option<&str>, input: CreateOrderRequest) -> Result<OrderDetails> {
        input.validate()?;
        let order_id = Uuid::now_v7();
        let items = input
            .items
            .into_iter()
            .map(|line| -> Result<OrderItem> {
                Ok(OrderItem {
                    id: Uuid::now_v7(),
                    order_id,
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    product_name: line.product_name,
                    product_sku: line.product_sku,
                    variant_name: line.variant_name,
                    product_image: line.product_image,
                    total: OrderItem::line_total(line.price, line.quantity)?,
                    price: line.price,
                    compare_price: line.compare_price,
                    quantity: line.quantity,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.place(order_id, user_id, account_email, input.details, items).await
    }

    /// Turns the user's cart into an order priced from the live catalog, then
    /// empties the cart.
    pub async fn checkout(&self, user_id: Uuid, account_email: Option<&str>, input: OrderDetailsInput) -> Result<OrderDetails> {
        input.validate()?;
        let review = self.carts.validate_for_checkout(user_id).await?;
        if !review.is_valid {
            return Err(EcommerceError::bad_request(review.errors.join("; ")));
        }

        let order_id = Uuid::now_v7();
        let mut items = Vec::with_capacity(review.updated_cart.items.len());
        for line in &review.updated_cart.items {
            let (product, variant) = self.carts.load_sellable(line.product_id, line.variant_id).await?;
            items.push(OrderItem {
                id: Uuid::now_v7(),
                order_id,
                product_id: product.id,
                variant_id: variant.as_ref().map(|v| v.id),
                product_sku: variant.as_ref().and_then(|v| v.sku.clone()).unwrap_or_else(|| product.sku.clone()),
                variant_name: variant.as_ref().map(|v| v.name.clone()),
                product_image: product.image_url.clone(),
                compare_price: variant.as_ref().map_or(product.compare_price, |v| v.compare_price),
                product_name: product.name,
                price: line.price,
                quantity: line.quantity,
                total: OrderItem::line_total(line.price, line.quantity)?,
            });
        }

        let details = self.place(order_id, user_id, account_email, input, items).await?;
        if let Err(e) = self.carts.clear(user_id).await {
            tracing::warn!(%user_id, order_id = %details.order.id, error = %e, "order placed but cart not cleared");
        }
        Ok(details)
    }

    async fn place(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        account_email: Option<&str>,
        input: OrderDetailsInput,
        items: Vec<OrderItem>,
    ) -> Result<OrderDetails> {
        let email = input
            .customer_email
            .or_else(|| account_email.map(str::to_owned))
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| EcommerceError::bad_request("Customer email is required"))?;

        let mut new = NewOrder {
            user_id,
            payment_method: input.payment_method,
            customer: CustomerSnapshot {
                email,
                first_name: input.customer_first_name,
                last_name: input.customer_last_name,
                phone: input.customer_phone,
            },
            shipping: input.shipping_address,
            billing: input.billing_address,
            tax_amount: input.tax_amount,
            shipping_amount: input.shipping_amount,
            discount_amount: input.discount_amount,
            discount_id: None,
            discount_code: None,
            customer_note: input.customer_note,
        };
        // builds the order once to reject bad input before any discount lookup
        let draft = Order::create(order_id, new.clone(), items.clone())?;

        let mut usage = None;
        if let Some(code) = input.discount_code.filter(|c| !c.trim().is_empty()) {
            let ctx = DiscountContext {
                user_id,
                customer_id: None,
                order_amount: draft.subtotal,
                product_ids: items.iter().map(|i| i.product_id).collect(),
                category_ids: self.category_ids(&items).await?,
            };
            let (discount, amount) = self.discounts.price(&code, &ctx).await?;
            new.discount_amount = amount;
            if discount.is_free_shipping() {
                new.shipping_amount = Decimal::ZERO;
            }
            new.discount_id = Some(discount.id);
            new.discount_code = Some(DiscountCode::new(code)?.into_inner());
            usage = Some(DiscountUsage::new(discount.id, user_id, Some(order_id), None));
        }

        let order = Order::create(order_id, new, items)?;
        let order = self.store.insert_order(order, usage.as_ref()).await?;
        tracing::info!(order_id = %order.id, order_number = %order.order_number, %user_id, total = %order.total_amount, "order created");

        self.events.publish(DomainEvent::order_created(&order)).await;
        if let Some(usage) = usage {
            self.events
                .publish(DomainEvent::Discount(DiscountEvent::Applied { discount_id: usage.discount_id, user_id, order_id: Some(order.id) }))
                .await;
        }
        self.details(order).await
    }

    async fn category_ids(&self, items: &[OrderItem]) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for item in items {
            if let Some(category) = self.store.product(item.product_id).await?.and_then(|p| p.category_id) {
                if !ids.contains(&category) {
                    ids.push(category);
                }
            }
        }
        Ok(ids)
    }

    /// Looks an order up by id or by its `ORD-` number. With `owner` set, other
    /// users' orders are reported as missing.
    pub async fn get(&self, identifier: &str, owner: Option<Uuid>) -> Result<OrderDetails> {
        let order = match Uuid::parse_str(identifier) {
            Ok(id) => self.store.find_order(id).await?,
            Err(_) => match OrderNumber::parse(identifier) {
                Some(number) => self.store.find_order_by_number(&number.to_string()).await?,
                None => None,
            },
        };
        let order = order
            .filter(|o| owner.map_or(true, |u| o.user_id == u))
            .ok_or_else(|| EcommerceError::not_found("Order"))?;
        self.details(order).await
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        self.store.list_orders(filter).await
    }

    pub async fn my_orders(&self, user_id: Uuid, page: PageRequest) -> Result<Page<Order>> {
        self.store.list_orders(&OrderFilter { page, user_id: Some(user_id), ..Default::default() }).await
    }

    pub async fn update_status(&self, id: Uuid, input: UpdateOrderStatusRequest) -> Result<OrderDetails> {
        if input.status == OrderStatus::Cancelled {
            return self.cancel(id, input.internal_note.as_deref(), None).await;
        }
        let mut order = self.find(id).await?;
        let (from, seen) = (order.status, order.updated_at);
        order.transition_to(input.status, Utc::now())?;
        if let Some(note) = input.internal_note {
            order.internal_note = Some(note);
        }
        self.store.save_order(&order, seen).await?;
        tracing::info!(order_id = %id, %from, to = %order.status, "order status changed");
        self.details(order).await
    }

    pub async fn update_payment_status(&self, id: Uuid, input: UpdatePaymentStatusRequest) -> Result<OrderDetails> {
        let mut order = self.find(id).await?;
        let seen = order.updated_at;
        order.set_payment_status(input.payment_status, input.transaction_id, Utc::now());
        self.store.save_order(&order, seen).await?;
        tracing::info!(order_id = %id, payment_status = %order.payment_status, status = %order.status, "order payment status changed");
        self.details(order).await
    }

    pub async fn update_shipping(&self, id: Uuid, input: UpdateShippingRequest) -> Result<OrderDetails> {
        input.validate()?;
        let mut order = self.find(id).await?;
        let seen = order.updated_at;
        order.ship(input.tracking_number, input.carrier, Utc::now())?;
        self.store.save_order(&order, seen).await?;
        tracing::info!(order_id = %id, carrier = ?order.carrier, "order shipped");
        self.details(order).await
    }

    pub async fn mark_delivered(&self, id: Uuid) -> Result<OrderDetails> {
        let mut order = self.find(id).await?;
        let seen = order.updated_at;
        order.transition_to(OrderStatus::Delivered, Utc::now())?;
        self.store.save_order(&order, seen).await?;
        tracing::info!(order_id = %id, "order delivered");
        self.details(order).await
    }

    /// Cancels a PENDING or CONFIRMED order. A completed payment row raises a
    /// refund request for the finance flow, whatever the order-level payment
    /// status says; the cancellation stands either way.
    pub async fn cancel(&self, id: Uuid, reason: Option<&str>, owner: Option<Uuid>) -> Result<OrderDetails> {
        let mut order = self
            .store
            .find_order(id)
            .await?
            .filter(|o| owner.map_or(true, |u| o.user_id == u))
            .ok_or_else(|| EcommerceError::not_found("Order"))?;
        let seen = order.updated_at;
        order.cancel(reason, Utc::now())?;
        self.store.save_order(&order, seen).await?;
        tracing::info!(order_id = %id, order_number = %order.order_number, reason = ?reason, "order cancelled");

        self.events.publish(DomainEvent::order_cancelled(&order, reason.map(str::to_owned))).await;
        let payments = self.store.order_payments(id).await?;
        if payments.iter().any(|p| p.status == PaymentStatus::Completed) {
            tracing::info!(order_id = %id, amount = %order.total_amount, "refund requested for cancelled order");
            self.events.publish(DomainEvent::refund_requested(&order)).await;
        }
        self.details(order).await
    }

    pub async fn stats(&self, timeframe: Timeframe) -> Result<OrderStats> {
        self.store.order_stats(timeframe, timeframe.start(Utc::now())).await
    }

    pub(crate) async fn find(&self, id: Uuid) -> Result<Order> {
        self.store.find_order(id).await?.ok_or_else(|| EcommerceError::not_found("Order"))
    }

    pub(crate) async fn details(&self, order: Order) -> Result<OrderDetails> {
        let payments = self.store.order_payments(order.id).await?;
        let discount = match order.discount_id {
            Some(id) => self.store.find_discount(id).await?,
            None => None,
        };
        Ok(OrderDetails { order, payments, discount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::domain::aggregates::{DiscountType, Payment};
    use crate::domain::events::OrderEvent;
    use crate::services::cart::tests::product;
    use crate::services::cart::AddToCartRequest;
    use crate::services::discount::CreateDiscountRequest;
    use crate::store::{MemoryStore, OrderRepository, PaymentRepository};

    struct Fixture {
        store: Arc<MemoryStore>,
        carts: CartService,
        discounts: DiscountService,
        orders: OrderService,
        events: Arc<Mutex<Vec<DomainEvent>>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let (publisher, events) = EventPublisher::recording();
        let discounts = DiscountService::new(store.clone(), publisher.clone());
        let carts = CartService::new(store.clone());
        let orders = OrderService::new(store.clone(), discounts.clone(), carts.clone(), publisher);
        Fixture { store, carts, discounts, orders, events }
    }

    fn refund_requests(events: &Mutex<Vec<DomainEvent>>) -> usize {
        events.lock().unwrap().iter().filter(|e| matches!(e, DomainEvent::Order(OrderEvent::RefundRequested { .. }))).count()
    }

    fn line(price: Decimal, quantity: i32) -> OrderLineInput {
        OrderLineInput {
            product_id: Uuid::now_v7(), variant_id: None, product_name: "Widget".into(), product_sku: "W-001".into(),
            variant_name: None, product_image: None, price, compare_price: None, quantity,
        }
    }

    fn details(method: PaymentMethod) -> OrderDetailsInput {
        OrderDetailsInput {
            customer_email: Some("ada@example.com".into()),
            customer_first_name: "Ada".into(),
            customer_last_name: "Lovelace".into(),
            customer_phone: None,
            shipping_address: ShippingAddress {
                first_name: "Ada".into(), last_name: "Lovelace".into(), address_line1: "1 Analytical Way".into(),
                city: "Lagos".into(), state: "LA".into(), postal_code: "100001".into(), country: "NG".into(),
                ..Default::default()
            },
            billing_address: BillingAddress::default(),
            payment_method: method,
            tax_amount: Decimal::new(150, 2),
            shipping_amount: Decimal::new(500, 2),
            discount_amount: Decimal::new(200, 2),
            discount_code: None,
            customer_note: None,
        }
    }

    fn request(method: PaymentMethod) -> CreateOrderRequest {
        CreateOrderRequest { items: vec![line(Decimal::new(1000, 2), 2), line(Decimal::new(550, 2), 1)], details: details(method) }
    }

    async fn stored_orders(store: &MemoryStore) -> i64 {
        store.list_orders(&OrderFilter::default()).await.unwrap().pagination.total
    }

    #[tokio::test]
    async fn test_create_order_totals_and_number() {
        let f = fixture();
        let user = Uuid::now_v7();
        let created = f.orders.create_order(user, None, request(PaymentMethod::Paystack)).await.unwrap();
        let order = &created.order;
        assert_eq!(order.subtotal, Decimal::new(2550, 2));
        assert_eq!(order.total_amount, Decimal::new(3000, 2));
        assert_eq!((order.status, order.payment_status), (OrderStatus::Pending, PaymentStatus::Pending));
        assert_eq!(order.order_number, "ORD-0001");
        assert!(created.payments.is_empty());

        let second = f.orders.create_order(user, None, request(PaymentMethod::Paystack)).await.unwrap();
        assert_eq!(second.order.order_number, "ORD-0002");
        let found = f.orders.get("ORD-0002", Some(user)).await.unwrap();
        assert_eq!(found.order.id, second.order.id);
        assert!(f.orders.get("ORD-0002", Some(Uuid::now_v7())).await.is_err());
    }

    #[tokio::test]
    async fn test_card_without_billing_persists_nothing() {
        let f = fixture();
        let err = f.orders.create_order(Uuid::now_v7(), None, request(PaymentMethod::CreditCard)).await.unwrap_err();
        assert!(matches!(err, EcommerceError::BadRequest(_)));
        assert_eq!(stored_orders(&f.store).await, 0);

        let mut req = request(PaymentMethod::DebitCard);
        req.details.billing_address = BillingAddress {
            address_line1: Some("1 Analytical Way".into()), city: Some("Lagos".into()), ..Default::default()
        };
        assert!(f.orders.create_order(Uuid::now_v7(), None, req).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_falls_back_to_account() {
        let f = fixture();
        let mut req = request(PaymentMethod::BankTransfer);
        req.details.customer_email = None;
        assert!(matches!(f.orders.create_order(Uuid::now_v7(), None, req.clone()).await, Err(EcommerceError::BadRequest(_))));
        let created = f.orders.create_order(Uuid::now_v7(), Some("me@example.com"), req).await.unwrap();
        assert_eq!(created.order.customer.email, "me@example.com");
    }

    #[tokio::test]
    async fn test_discount_code_is_authoritative() {
        let f = fixture();
        f.discounts
            .create(CreateDiscountRequest {
                code: "SAVE10".into(), name: "Ten off".into(), description: None, discount_type: DiscountType::Percentage,
                value: Decimal::new(10, 0), usage_limit: Some(1), min_order_amount: None,
                max_discount_amount: Some(Decimal::new(15, 0)), starts_at: None, expires_at: None, is_active: None,
                applies_to_all_products: None, product_ids: vec![], category_ids: vec![], once_per_customer: None,
                customer_ids: vec![],
            })
            .await
            .unwrap();

        let mut req = request(PaymentMethod::Paystack);
        req.items = vec![line(Decimal::new(200, 0), 1)];
        req.details.discount_code = Some("save10".into());
        req.details.discount_amount = Decimal::new(99, 0);
        let created = f.orders.create_order(Uuid::now_v7(), None, req.clone()).await.unwrap();
        assert_eq!(created.order.discount_amount, Decimal::new(15, 0));
        assert_eq!(created.order.discount_code.as_deref(), Some("SAVE10"));
        assert_eq!(created.discount.as_ref().map(|d| d.used_count), Some(1));

        // limit of one is now spent
        let err = f.orders.create_order(Uuid::now_v7(), None, req).await.unwrap_err();
        assert!(matches!(err, EcommerceError::BadRequest(ref m) if m == "Discount usage limit reached"));
        assert_eq!(stored_orders(&f.store).await, 1);
    }

    #[tokio::test]
    async fn test_cancellation_rules() {
        let f = fixture();
        let user = Uuid::now_v7();
        let id = f.orders.create_order(user, None, request(PaymentMethod::Paystack)).await.unwrap().order.id;

        assert!(matches!(f.orders.cancel(id, None, Some(Uuid::now_v7())).await, Err(EcommerceError::NotFound(_))));
        let cancelled = f.orders.cancel(id, Some("changed mind"), Some(user)).await.unwrap().order;
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.internal_note.as_deref(), Some("Cancelled: changed mind"));
        let stamp = cancelled.cancelled_at;
        assert!(stamp.is_some());

        assert!(matches!(f.orders.cancel(id, None, None).await, Err(EcommerceError::Conflict(_))));
        assert_eq!(f.orders.find(id).await.unwrap().cancelled_at, stamp);
        assert!(matches!(f.orders.cancel(Uuid::now_v7(), None, None).await, Err(EcommerceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_refund_follows_payment_rows_not_order_flag() {
        let f = fixture();
        let paid = f.orders.create_order(Uuid::now_v7(), None, request(PaymentMethod::BankTransfer)).await.unwrap().order;
        let mut payment = Payment::new(paid.id, paid.total_amount, "NGN".into(), paid.payment_method, "manual");
        payment.status = PaymentStatus::Completed;
        f.store.insert_payment(&payment, None).await.unwrap();
        // admin override hides the completed payment at order level
        let hidden = UpdatePaymentStatusRequest { payment_status: PaymentStatus::Pending, transaction_id: None };
        f.orders.update_payment_status(paid.id, hidden).await.unwrap();
        f.orders.cancel(paid.id, None, None).await.unwrap();
        assert_eq!(refund_requests(&f.events), 1);

        // and an order flagged COMPLETED without a completed payment asks for nothing
        let unpaid = f.orders.create_order(Uuid::now_v7(), None, request(PaymentMethod::BankTransfer)).await.unwrap().order;
        let flagged = UpdatePaymentStatusRequest { payment_status: PaymentStatus::Completed, transaction_id: None };
        f.orders.update_payment_status(unpaid.id, flagged).await.unwrap();
        f.orders.cancel(unpaid.id, None, None).await.unwrap();
        assert_eq!(refund_requests(&f.events), 1);
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected_without_panic() {
        let f = fixture();
        let mut req = request(PaymentMethod::Paystack);
        req.items = vec![line(Decimal::MAX, 2)];
        let err = f.orders.create_order(Uuid::now_v7(), None, req).await.unwrap_err();
        assert!(matches!(err, EcommerceError::BadRequest(ref m) if m == "Order amount is too large"));

        let mut req = request(PaymentMethod::Paystack);
        req.items = vec![line(Decimal::MAX, 1), line(Decimal::MAX, 1)];
        assert!(matches!(f.orders.create_order(Uuid::now_v7(), None, req).await, Err(EcommerceError::BadRequest(_))));
        assert_eq!(stored_orders(&f.store).await, 0);
    }

    #[tokio::test]
    async fn test_shipping_workflow() {
        let f = fixture();
        let id = f.orders.create_order(Uuid::now_v7(), None, request(PaymentMethod::CashOnDelivery)).await.unwrap().order.id;
        let paid = UpdatePaymentStatusRequest { payment_status: PaymentStatus::Completed, transaction_id: Some("T-1".into()) };
        let order = f.orders.update_payment_status(id, paid).await.unwrap().order;
        assert_eq!(order.status, OrderStatus::Confirmed);

        let shipping = UpdateShippingRequest { tracking_number: "TRK1".into(), carrier: "DHL".into() };
        let order = f.orders.update_shipping(id, shipping).await.unwrap().order;
        assert_eq!(order.status, OrderStatus::Shipped);
        assert!(order.shipped_at.is_some());

        let order = f.orders.mark_delivered(id).await.unwrap().order;
        assert_eq!(order.status, OrderStatus::Delivered);
        let cancel = UpdateOrderStatusRequest { status: OrderStatus::Cancelled, internal_note: None };
        assert!(matches!(f.orders.update_status(id, cancel).await, Err(EcommerceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_checkout_from_cart() {
        let f = fixture();
        let user = Uuid::now_v7();
        let p = product(Decimal::new(1000, 2), 10);
        f.store.put_product(p.clone()).await;
        f.carts.add_item(user, &AddToCartRequest { product_id: p.id, variant_id: None, quantity: 2 }).await.unwrap();

        let placed = f.orders.checkout(user, None, details(PaymentMethod::Paystack)).await.unwrap().order;
        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].product_sku, p.sku);
        assert_eq!(placed.subtotal, Decimal::new(2000, 2));
        assert_eq!(f.carts.count(user).await.unwrap(), 0);

        assert!(matches!(f.orders.checkout(user, None, details(PaymentMethod::Paystack)).await, Err(EcommerceError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_my_orders_and_stats() {
        let f = fixture();
        let user = Uuid::now_v7();
        for _ in 0..3 {
            f.orders.create_order(user, None, request(PaymentMethod::Paystack)).await.unwrap();
        }
        f.orders.create_order(Uuid::now_v7(), None, request(PaymentMethod::Paystack)).await.unwrap();
        let page = f.orders.my_orders(user, PageRequest::new(Some(1), Some(2))).await.unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.pagination.total, 3);
        assert!(page.pagination.has_next);

        let stats = f.orders.stats(Timeframe::Day).await.unwrap();
        assert_eq!(stats.total_orders, 4);
        assert_eq!(stats.total_revenue, Decimal::ZERO);
    }
}
