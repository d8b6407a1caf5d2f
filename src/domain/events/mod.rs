//! Domain events
//!
//! Published on the message bus after the state change they describe has been
//! committed. Consumers must tolerate duplicates.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Order, Payment};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
    Discount(DiscountEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: String, user_id: Uuid, total: Decimal },
    Cancelled { order_id: Uuid, order_number: String, reason: Option<String> },
    /// A cancelled order had a completed payment that must be returned
    RefundRequested { order_id: Uuid, order_number: String, amount: Decimal },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    Completed { payment_id: Uuid, order_id: Uuid, amount: Decimal, transaction_id: Option<String> },
    Refunded { payment_id: Uuid, order_id: Uuid, amount: Decimal },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscountEvent {
    Applied { discount_id: Uuid, user_id: Uuid, order_id: Option<Uuid> },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Created { .. }) => "storefront.order.created",
            Self::Order(OrderEvent::Cancelled { .. }) => "storefront.order.cancelled",
            Self::Order(OrderEvent::RefundRequested { .. }) => "storefront.order.refund_requested",
            Self::Payment(PaymentEvent::Completed { .. }) => "storefront.payment.completed",
            Self::Payment(PaymentEvent::Refunded { .. }) => "storefront.payment.refunded",
            Self::Discount(DiscountEvent::Applied { .. }) => "storefront.discount.applied",
        }
    }

    pub fn order_created(order: &Order) -> Self {
        Self::Order(OrderEvent::Created {
            order_id: order.id, order_number: order.order_number.clone(), user_id: order.user_id, total: order.total_amount,
        })
    }

    pub fn order_cancelled(order: &Order, reason: Option<String>) -> Self {
        Self::Order(OrderEvent::Cancelled { order_id: order.id, order_number: order.order_number.clone(), reason })
    }

    pub fn refund_requested(order: &Order) -> Self {
        Self::Order(OrderEvent::RefundRequested { order_id: order.id, order_number: order.order_number.clone(), amount: order.total_amount })
    }

    pub fn payment_completed(payment: &Payment) -> Self {
        Self::Payment(PaymentEvent::Completed {
            payment_id: payment.id, order_id: payment.order_id, amount: payment.amount, transaction_id: payment.transaction_id.clone(),
        })
    }

    pub fn payment_refunded(payment: &Payment) -> Self {
        Self::Payment(PaymentEvent::Refunded { payment_id: payment.id, order_id: payment.order_id, amount: payment.amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_shape() {
        let event = DomainEvent::Discount(DiscountEvent::Applied { discount_id: Uuid::nil(), user_id: Uuid::nil(), order_id: None });
        assert_eq!(event.subject(), "storefront.discount.applied");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "discount");
        assert_eq!(json["event"], "applied");
    }
}
