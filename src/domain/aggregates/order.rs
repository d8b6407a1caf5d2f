//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::discount::Discount;
use super::payment::Payment;
use crate::domain::value_objects::Timeframe;
use crate::EcommerceError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Confirmed, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Processing, Completed, Failed, Refunded }

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod { CreditCard, DebitCard, BankTransfer, Paystack, CashOnDelivery }

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Self::Pending, Self::Confirmed, Self::Shipped, Self::Delivered, Self::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    pub fn is_cancellable(&self) -> bool { matches!(self, Self::Pending | Self::Confirmed) }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() { return false; }
        next != Self::Cancelled || self.is_cancellable()
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "CREDIT_CARD",
            Self::DebitCard => "DEBIT_CARD",
            Self::BankTransfer => "BANK_TRANSFER",
            Self::Paystack => "PAYSTACK",
            Self::CashOnDelivery => "CASH_ON_DELIVERY",
        }
    }

    pub fn requires_billing_address(&self) -> bool { matches!(self, Self::CreditCard | Self::DebitCard) }
}

macro_rules! impl_status_text {
    ($ty:ty, $label:literal, [$($variant:ident),+]) => {
        impl FromStr for $ty {
            type Err = EcommerceError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(if s == <$ty>::$variant.as_str() { return Ok(<$ty>::$variant); })+
                Err(EcommerceError::validation(format!(concat!("unknown ", $label, " '{}'"), s)))
            }
        }
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }
    };
}

impl_status_text!(OrderStatus, "order status", [Pending, Confirmed, Shipped, Delivered, Cancelled]);
impl_status_text!(PaymentStatus, "payment status", [Pending, Processing, Completed, Failed, Refunded]);
impl_status_text!(PaymentMethod, "payment method", [CreditCard, DebitCard, BankTransfer, Paystack, CashOnDelivery]);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSnapshot { pub email: String, pub first_name: String, pub last_name: String, pub phone: Option<String> }

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub first_name: String, pub last_name: String, pub company: Option<String>,
    pub address_line1: String, pub address_line2: Option<String>, pub city: String,
    pub state: String, pub postal_code: String, pub country: String, pub phone: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingAddress {
    pub first_name: Option<String>, pub last_name: Option<String>, pub company: Option<String>,
    pub address_line1: Option<String>, pub address_line2: Option<String>, pub city: Option<String>,
    pub state: Option<String>, pub postal_code: Option<String>, pub country: Option<String>,
}

impl BillingAddress {
    fn is_usable(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.address_line1) && present(&self.city)
    }
}

/// Line snapshot taken at order time. Later catalog edits never touch it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub product_sku: String,
    pub variant_name: Option<String>,
    pub product_image: Option<String>,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub quantity: i32,
    pub total: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub customer: CustomerSnapshot,
    pub shipping: ShippingAddress,
    pub billing: BillingAddress,
    pub discount_id: Option<Uuid>,
    pub discount_code: Option<String>,
    pub customer_note: Option<String>,
    pub internal_note: Option<String>,
    pub transaction_id: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

/// Monetary breakdown of a new order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderTotals { pub subtotal: Decimal, pub discount: Decimal, pub tax: Decimal, pub shipping: Decimal, pub total: Decimal }

impl OrderTotals {
    /// Fails with BadRequest when an amount leaves the representable range.
    pub fn compute(items: &[OrderItem], tax: Decimal, shipping: Decimal, discount: Decimal) -> Result<Self, EcommerceError> {
        let mut subtotal = Decimal::ZERO;
        for item in items {
            subtotal = subtotal.checked_add(OrderItem::line_total(item.price, item.quantity)?).ok_or_else(too_large)?;
        }
        let total = subtotal
            .checked_add(tax)
            .and_then(|t| t.checked_add(shipping))
            .and_then(|t| t.checked_sub(discount))
            .ok_or_else(too_large)?;
        Ok(Self { subtotal, discount, tax, shipping, total })
    }
}

fn too_large() -> EcommerceError { EcommerceError::bad_request("Order amount is too large") }

impl OrderItem {
    pub fn line_total(price: Decimal, quantity: i32) -> Result<Decimal, EcommerceError> {
        price.checked_mul(Decimal::from(quantity)).ok_or_else(too_large)
    }
}

/// A payment-driven change to an order's payment status. Stores apply it to
/// the order as currently stored, leaving every other field alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentMirror {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    /// Skip orders whose payment is already COMPLETED or REFUNDED
    pub unless_settled: bool,
}

impl PaymentMirror {
    pub fn new(status: PaymentStatus, transaction_id: Option<String>) -> Self {
        Self { status, transaction_id, unless_settled: false }
    }

    pub fn unless_settled(mut self) -> Self {
        self.unless_settled = true;
        self
    }
}

/// Fields of a new order other than its line snapshot.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub payment_method: PaymentMethod,
    pub customer: CustomerSnapshot,
    pub shipping: ShippingAddress,
    pub billing: BillingAddress,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub discount_id: Option<Uuid>,
    pub discount_code: Option<String>,
    pub customer_note: Option<String>,
}

impl Order {
    /// Builds a PENDING/PENDING order. The order number is assigned by the
    /// store when the order is persisted.
    pub fn create(id: Uuid, input: NewOrder, items: Vec<OrderItem>) -> Result<Self, EcommerceError> {
        if items.is_empty() { return Err(EcommerceError::bad_request("Order must contain at least one item")); }
        if input.payment_method.requires_billing_address() && !input.billing.is_usable() {
            return Err(EcommerceError::bad_request("Billing address is required for this payment method"));
        }
        let totals = OrderTotals::compute(&items, input.tax_amount, input.shipping_amount, input.discount_amount)?;
        let now = Utc::now();
        Ok(Self {
            id, order_number: String::new(), user_id: input.user_id,
            subtotal: totals.subtotal, discount_amount: totals.discount, tax_amount: totals.tax,
            shipping_amount: totals.shipping, total_amount: totals.total,
            status: OrderStatus::Pending, payment_status: PaymentStatus::Pending, payment_method: input.payment_method,
            customer: input.customer, shipping: input.shipping, billing: input.billing,
            discount_id: input.discount_id, discount_code: input.discount_code,
            customer_note: input.customer_note, internal_note: None, transaction_id: None,
            tracking_number: None, carrier: None, shipped_at: None, delivered_at: None, cancelled_at: None,
            refunded_at: None, created_at: now, updated_at: now, items,
        })
    }

    /// Moves the order along the status state machine, stamping the
    /// transition time on first entry into SHIPPED, DELIVERED or CANCELLED.
    pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), EcommerceError> {
        if !self.status.can_transition_to(next) {
            if next == OrderStatus::Cancelled {
                return Err(EcommerceError::conflict("Order cannot be cancelled at this stage"));
            }
            return Err(EcommerceError::conflict(format!("Cannot move a {} order to {next}", self.status)));
        }
        let stamp = match next {
            OrderStatus::Shipped => Some(&mut self.shipped_at),
            OrderStatus::Delivered => Some(&mut self.delivered_at),
            OrderStatus::Cancelled => Some(&mut self.cancelled_at),
            OrderStatus::Pending | OrderStatus::Confirmed => None,
        };
        if let Some(slot) = stamp { slot.get_or_insert(now); }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<&str>, now: DateTime<Utc>) -> Result<(), EcommerceError> {
        self.transition_to(OrderStatus::Cancelled, now)?;
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            self.internal_note = Some(format!("Cancelled: {reason}"));
        }
        Ok(())
    }

    pub fn ship(&mut self, tracking_number: String, carrier: String, now: DateTime<Utc>) -> Result<(), EcommerceError> {
        self.transition_to(OrderStatus::Shipped, now)?;
        self.tracking_number = Some(tracking_number);
        self.carrier = Some(carrier);
        Ok(())
    }

    /// Records a payment status change. Completion confirms a pending order.
    pub fn set_payment_status(&mut self, status: PaymentStatus, transaction_id: Option<String>, now: DateTime<Utc>) {
        self.payment_status = status;
        if transaction_id.is_some() { self.transaction_id = transaction_id; }
        if status == PaymentStatus::Completed && self.status == OrderStatus::Pending {
            self.status = OrderStatus::Confirmed;
        }
        if status == PaymentStatus::Refunded { self.refunded_at.get_or_insert(now); }
        self.touch(now);
    }

    /// Applies a payment-driven status change. Returns `false` when the
    /// mirror leaves the order untouched.
    pub fn apply_payment(&mut self, mirror: &PaymentMirror, now: DateTime<Utc>) -> bool {
        if mirror.unless_settled && matches!(self.payment_status, PaymentStatus::Completed | PaymentStatus::Refunded) {
            return false;
        }
        self.set_payment_status(mirror.status, mirror.transaction_id.clone(), now);
        true
    }

    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}

/// An order with its payment attempts and applied discount.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub payments: Vec<Payment>,
    pub discount: Option<Discount>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub timeframe: Timeframe,
    /// Orders in the window that were not cancelled
    pub total_orders: i64,
    /// Sum over non-cancelled orders with a completed payment
    pub total_revenue: Decimal,
    pub average_order_value: Decimal,
    /// Every order in the window, cancelled included
    pub status_breakdown: BTreeMap<OrderStatus, i64>,
}

impl OrderStats {
    pub fn from_orders<'a>(timeframe: Timeframe, orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut stats = Self {
            timeframe, total_orders: 0, total_revenue: Decimal::ZERO, average_order_value: Decimal::ZERO,
            status_breakdown: BTreeMap::new(),
        };
        let mut paid = 0i64;
        for order in orders {
            *stats.status_breakdown.entry(order.status).or_default() += 1;
            if order.status == OrderStatus::Cancelled { continue; }
            stats.total_orders += 1;
            if order.payment_status == PaymentStatus::Completed {
                paid += 1;
                stats.total_revenue += order.total_amount;
            }
        }
        if paid > 0 { stats.average_order_value = (stats.total_revenue / Decimal::from(paid)).round_dp(2); }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: Decimal, quantity: i32) -> OrderItem {
        OrderItem {
            id: Uuid::now_v7(), order_id: Uuid::nil(), product_id: Uuid::now_v7(), variant_id: None,
            product_name: "Widget".into(), product_sku: "W001".into(), variant_name: None, product_image: None,
            price, compare_price: None, quantity, total: price * Decimal::from(quantity),
        }
    }

    fn new_order(method: PaymentMethod) -> NewOrder {
        NewOrder {
            user_id: Uuid::now_v7(), payment_method: method, customer: CustomerSnapshot::default(),
            shipping: ShippingAddress::default(), billing: BillingAddress::default(),
            tax_amount: Decimal::new(150, 2), shipping_amount: Decimal::new(500, 2), discount_amount: Decimal::new(200, 2),
            discount_id: None, discount_code: None, customer_note: None,
        }
    }

    #[test]
    fn test_order_totals() {
        let order = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::new(10, 0), 2), item(Decimal::new(5, 0), 1)]).unwrap();
        assert_eq!(order.subtotal, Decimal::new(25, 0));
        assert_eq!(order.total_amount, order.subtotal + order.tax_amount + order.shipping_amount - order.discount_amount);
        assert_eq!(order.total_amount, Decimal::new(2950, 2));
        assert_eq!((order.status, order.payment_status), (OrderStatus::Pending, PaymentStatus::Pending));
    }

    #[test]
    fn test_oversized_amounts_are_rejected() {
        let err = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::MAX, 1), item(Decimal::MAX, 1)]).unwrap_err();
        assert!(matches!(err, EcommerceError::BadRequest(ref m) if m == "Order amount is too large"));
        assert!(OrderItem::line_total(Decimal::MAX, 2).is_err());
        assert_eq!(OrderItem::line_total(Decimal::new(250, 2), 3).unwrap(), Decimal::new(750, 2));
    }

    #[test]
    fn test_payment_mirror_respects_settled_orders() {
        let mut order = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::ONE, 1)]).unwrap();
        let now = Utc::now();
        assert!(order.apply_payment(&PaymentMirror::new(PaymentStatus::Completed, Some("tx-1".into())), now));
        assert_eq!(order.status, OrderStatus::Confirmed);

        let late = PaymentMirror::new(PaymentStatus::Processing, None).unless_settled();
        assert!(!order.apply_payment(&late, now));
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert!(order.apply_payment(&PaymentMirror::new(PaymentStatus::Refunded, None), now));
        assert!(order.refunded_at.is_some());
    }

    #[test]
    fn test_card_payment_requires_billing() {
        let err = Order::create(Uuid::now_v7(), new_order(PaymentMethod::CreditCard), vec![item(Decimal::ONE, 1)]).unwrap_err();
        assert!(matches!(err, EcommerceError::BadRequest(_)));

        let mut input = new_order(PaymentMethod::DebitCard);
        input.billing.address_line1 = Some("1 Marina".into());
        input.billing.city = Some("Lagos".into());
        assert!(Order::create(Uuid::now_v7(), input, vec![item(Decimal::ONE, 1)]).is_ok());
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::ONE, 1)]).unwrap();
        let now = Utc::now();
        order.set_payment_status(PaymentStatus::Completed, Some("tx-1".into()), now);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.transaction_id.as_deref(), Some("tx-1"));
        order.ship("TRK1".into(), "DHL".into(), now).unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.shipped_at, Some(now));
        order.transition_to(OrderStatus::Delivered, now).unwrap();
        assert!(order.delivered_at.is_some());
        // delivered is terminal for status, but payment may still be refunded
        assert!(matches!(order.transition_to(OrderStatus::Shipped, now), Err(EcommerceError::Conflict(_))));
        order.set_payment_status(PaymentStatus::Refunded, None, now);
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert!(order.refunded_at.is_some());
    }

    #[test]
    fn test_cancellation_rules() {
        for status in OrderStatus::ALL {
            let mut order = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::ONE, 1)]).unwrap();
            order.status = status;
            let result = order.cancel(Some("changed mind"), Utc::now());
            if status.is_cancellable() {
                assert!(result.is_ok());
                assert!(order.cancelled_at.is_some());
                assert_eq!(order.internal_note.as_deref(), Some("Cancelled: changed mind"));
            } else {
                assert!(matches!(result, Err(EcommerceError::Conflict(_))));
                assert!(order.cancelled_at.is_none());
            }
        }
    }

    #[test]
    fn test_stamp_is_kept_on_repeat() {
        let mut order = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::ONE, 1)]).unwrap();
        let first = Utc::now();
        order.transition_to(OrderStatus::Shipped, first).unwrap();
        order.transition_to(OrderStatus::Shipped, first + chrono::Duration::hours(1)).unwrap();
        assert_eq!(order.shipped_at, Some(first));
    }

    #[test]
    fn test_stats_exclude_cancelled_revenue() {
        let mk = |status, payment_status, total: i64| {
            let mut o = Order::create(Uuid::now_v7(), new_order(PaymentMethod::BankTransfer), vec![item(Decimal::ONE, 1)]).unwrap();
            o.status = status;
            o.payment_status = payment_status;
            o.total_amount = Decimal::new(total, 0);
            o
        };
        let orders = vec![
            mk(OrderStatus::Confirmed, PaymentStatus::Completed, 100),
            mk(OrderStatus::Delivered, PaymentStatus::Completed, 50),
            mk(OrderStatus::Pending, PaymentStatus::Pending, 70),
            mk(OrderStatus::Cancelled, PaymentStatus::Completed, 999),
        ];
        let stats = OrderStats::from_orders(Timeframe::Month, &orders);
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.total_revenue, Decimal::new(150, 0));
        assert_eq!(stats.average_order_value, Decimal::new(75, 0));
        assert_eq!(stats.status_breakdown[&OrderStatus::Cancelled], 1);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("CONFIRMED".parse::<OrderStatus>().unwrap(), OrderStatus::Confirmed);
        assert!("PROCESSING".parse::<OrderStatus>().is_err());
        assert_eq!("REFUNDED".parse::<PaymentStatus>().unwrap(), PaymentStatus::Refunded);
        assert_eq!(PaymentMethod::CashOnDelivery.to_string(), "CASH_ON_DELIVERY");
    }
}
