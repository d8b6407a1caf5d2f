//! Payment coordinator service
//!
//! Opens gateway transactions, reconciles verification results and keeps the
//! order's payment status in step with its payments.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use super::{non_negative, OrderService};
use crate::config::PaymentConfig;
use crate::domain::aggregates::{
    Payment, PaymentInitialization, PaymentMethod, PaymentMirror, PaymentStats, PaymentStatus, VerificationOutcome,
};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{PaymentMetadata, Timeframe};
use crate::gateway::{InitializeTransaction, PaymentGateway, TransactionMetadata};
use crate::publisher::EventPublisher;
use crate::store::Store;
use crate::{EcommerceError, Result};

const GATEWAY_PROCESSOR: &str = "paystack";
const MANUAL_PROCESSOR: &str = "manual";
const PAYMENT_CHANGED: &str = "Payment was changed by another request, retry";

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitializePaymentRequest {
    /// Defaults to the order's customer email
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ManualPaymentRequest {
    #[validate(custom = "non_negative")]
    pub amount: Option<Decimal>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
    pub transaction_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPaymentStatusRequest {
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    events: EventPublisher,
    config: PaymentConfig,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        events: EventPublisher,
        config: PaymentConfig,
    ) -> Self {
        Self { store, gateway, orders, events, config }
    }

    /// Opens a gateway transaction for the order total. Nothing is written
    /// when the gateway call fails. With `owner` set, other users' orders are
    /// reported as missing.
    pub async fn initialize(
        &self,
        order_id: Uuid,
        owner: Option<Uuid>,
        input: &InitializePaymentRequest,
    ) -> Result<PaymentInitialization> {
        input.validate()?;
        let order = self.orders.find(order_id).await?;
        if owner.is_some_and(|u| order.user_id != u) {
            return Err(EcommerceError::not_found("Order"));
        }
        if order.payment_status == PaymentStatus::Completed {
            return Err(EcommerceError::bad_request("Order has already been paid"));
        }

        let request = InitializeTransaction {
            amount: order.total_amount,
            email: input.email.clone().unwrap_or_else(|| order.customer.email.clone()),
            currency: self.config.currency.clone(),
            metadata: TransactionMetadata { order_id: order.id, order_number: order.order_number.clone() },
        };
        let authorization = self.gateway.initialize_transaction(&request).await?;

        let mut payment = Payment::new(order.id, order.total_amount, request.currency, order.payment_method, GATEWAY_PROCESSOR);
        payment.payment_intent_id = Some(authorization.reference.clone());
        if let Some(code) = &authorization.access_code {
            payment.metadata.insert("access_code", code.as_str());
        }
        // the order may have changed during the gateway call; only its payment status is touched
        let mirror = PaymentMirror::new(PaymentStatus::Processing, None).unless_settled();
        self.store.insert_payment(&payment, Some(&mirror)).await?;
        tracing::info!(payment_id = %payment.id, order_id = %order.id, reference = %authorization.reference, amount = %payment.amount, "payment initialized");

        Ok(PaymentInitialization {
            payment_id: payment.id,
            authorization_url: authorization.authorization_url,
            reference: authorization.reference,
            amount: payment.amount,
        })
    }

    /// Reconciles a payment with the gateway's view of it. Safe to call any
    /// number of times, concurrently included; only the call that moves the
    /// payment applies side effects.
    pub async fn verify(&self, reference: &str) -> Result<VerificationOutcome> {
        let mut payment = self
            .store
            .find_payment_by_reference(reference)
            .await?
            .ok_or_else(|| EcommerceError::not_found("Payment"))?;
        let verification = self.gateway.verify_transaction(reference).await?;

        let seen = payment.status;
        if !payment.reconcile(&verification, Utc::now()) {
            tracing::debug!(payment_id = %payment.id, status = %payment.status, "verification unchanged");
            return Ok(VerificationOutcome { payment, verification });
        }

        let mirror = (payment.status == PaymentStatus::Completed)
            .then(|| PaymentMirror::new(PaymentStatus::Completed, payment.transaction_id.clone()).unless_settled());
        if !self.store.save_payment(&payment, seen, mirror.as_ref()).await? {
            tracing::debug!(payment_id = %payment.id, "payment verified concurrently");
            let payment = self.find(payment.id).await?;
            return Ok(VerificationOutcome { payment, verification });
        }
        tracing::info!(payment_id = %payment.id, order_id = %payment.order_id, status = %payment.status, "payment verified");

        if payment.status == PaymentStatus::Completed {
            self.events.publish(DomainEvent::payment_completed(&payment)).await;
        }
        Ok(VerificationOutcome { payment, verification })
    }

    /// Records a payment taken outside the gateway, e.g. a bank transfer.
    pub async fn create_manual_payment(&self, order_id: Uuid, input: ManualPaymentRequest) -> Result<Payment> {
        input.validate()?;
        let order = self.orders.find(order_id).await?;
        if order.payment_status == PaymentStatus::Completed {
            return Err(EcommerceError::bad_request("Order has already been paid"));
        }

        let mut payment = Payment::new(
            order.id,
            input.amount.unwrap_or(order.total_amount),
            input.currency.unwrap_or_else(|| self.config.currency.clone()),
            input.payment_method.unwrap_or(order.payment_method),
            MANUAL_PROCESSOR,
        );
        payment.status = input.status.unwrap_or_default();
        payment.transaction_id = input.transaction_id;
        payment.metadata = PaymentMetadata::from_client(input.metadata)?;

        let mirror = PaymentMirror::new(payment.status, payment.transaction_id.clone());
        self.store.insert_payment(&payment, Some(&mirror)).await?;
        tracing::info!(payment_id = %payment.id, %order_id, status = %payment.status, amount = %payment.amount, "manual payment recorded");

        if payment.status == PaymentStatus::Completed {
            self.events.publish(DomainEvent::payment_completed(&payment)).await;
        }
        Ok(payment)
    }

    pub async fn update_status(&self, id: Uuid, input: SetPaymentStatusRequest) -> Result<Payment> {
        let mut payment = self.find(id).await?;
        let seen = payment.status;
        payment.set_status(input.status, input.failure_reason, Utc::now());

        let mirror = matches!(input.status, PaymentStatus::Completed | PaymentStatus::Failed)
            .then(|| PaymentMirror::new(input.status, payment.transaction_id.clone()));
        if !self.store.save_payment(&payment, seen, mirror.as_ref()).await? {
            return Err(EcommerceError::conflict(PAYMENT_CHANGED));
        }
        tracing::info!(payment_id = %id, status = %payment.status, "payment status changed");

        if payment.status == PaymentStatus::Completed {
            self.events.publish(DomainEvent::payment_completed(&payment)).await;
        }
        Ok(payment)
    }

    /// Marks a completed payment as refunded. Money movement happens outside
    /// this service.
    pub async fn refund(&self, id: Uuid, reason: Option<&str>) -> Result<Payment> {
        let mut payment = self.find(id).await?;
        payment.refund(reason, Utc::now())?;

        let mirror = PaymentMirror::new(PaymentStatus::Refunded, None);
        if !self.store.save_payment(&payment, PaymentStatus::Completed, Some(&mirror)).await? {
            return Err(EcommerceError::conflict(PAYMENT_CHANGED));
        }
        tracing::info!(payment_id = %id, order_id = %payment.order_id, amount = %payment.amount, "payment refunded");

        self.events.publish(DomainEvent::payment_refunded(&payment)).await;
        Ok(payment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Payment> {
        self.find(id).await
    }

    pub async fn order_payments(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        self.orders.find(order_id).await?;
        self.store.order_payments(order_id).await
    }

    pub async fn stats(&self, timeframe: Timeframe) -> Result<PaymentStats> {
        self.store.payment_stats(timeframe, timeframe.start(Utc::now())).await
    }

    async fn find(&self, id: Uuid) -> Result<Payment> {
        self.store.find_payment(id).await?.ok_or_else(|| EcommerceError::not_found("Payment"))
    }
}
