//! Payment Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::order::{PaymentMethod, PaymentStatus};
use crate::domain::value_objects::{PaymentMetadata, Timeframe};

/// One payment attempt against an order. Payments are never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub processor: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    /// Gateway reference used to look the attempt up on verification
    pub payment_intent_id: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: PaymentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Gateway verdict on a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus { Success, Failed, Pending }

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Success => "success", Self::Failed => "failed", Self::Pending => "pending" }
    }

    /// Any status other than `success` or `failed` is still in flight.
    pub fn from_gateway(raw: &str) -> Self {
        match raw {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Sanitized result of a gateway verification call. Only these fields are
/// kept; the raw gateway payload is dropped at the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub status: GatewayStatus,
    pub transaction_id: Option<String>,
    pub gateway_response: Option<String>,
}

impl Payment {
    pub fn new(order_id: Uuid, amount: Decimal, currency: String, payment_method: PaymentMethod, processor: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id, amount, currency, payment_method, processor: processor.into(),
            status: PaymentStatus::Pending, transaction_id: None, payment_intent_id: None, failure_reason: None,
            metadata: PaymentMetadata::new(), created_at: now, updated_at: now,
        }
    }

    /// Settled payments are never downgraded by a later gateway observation.
    pub fn is_settled(&self) -> bool { matches!(self.status, PaymentStatus::Completed | PaymentStatus::Refunded) }

    /// Applies a gateway observation. Returns `false` when nothing changed,
    /// in which case the caller must not write.
    pub fn reconcile(&mut self, verification: &Verification, now: DateTime<Utc>) -> bool {
        let observed = match verification.status {
            GatewayStatus::Success => PaymentStatus::Completed,
            GatewayStatus::Failed => PaymentStatus::Failed,
            GatewayStatus::Pending => PaymentStatus::Pending,
        };
        if self.is_settled() { return false; }
        let transaction_id = verification.transaction_id.clone().or_else(|| self.transaction_id.clone());
        if observed == self.status && transaction_id == self.transaction_id { return false; }

        self.status = observed;
        self.transaction_id = transaction_id;
        if observed == PaymentStatus::Failed {
            self.failure_reason = Some(verification.gateway_response.clone().unwrap_or_else(|| "Payment failed".to_string()));
        }
        self.metadata.insert("gateway_status", verification.status.as_str());
        if let Some(response) = &verification.gateway_response {
            self.metadata.insert("gateway_response", response.as_str());
        }
        self.metadata.insert("verified_at", now.to_rfc3339());
        self.updated_at = now;
        true
    }

    /// Admin override. COMPLETED and FAILED are the states mirrored onto the order.
    pub fn set_status(&mut self, status: PaymentStatus, failure_reason: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        if failure_reason.is_some() { self.failure_reason = failure_reason; }
        self.updated_at = now;
    }

    pub fn refund(&mut self, reason: Option<&str>, now: DateTime<Utc>) -> Result<(), crate::EcommerceError> {
        if self.status != PaymentStatus::Completed {
            return Err(crate::EcommerceError::bad_request("Only completed payments can be refunded"));
        }
        self.status = PaymentStatus::Refunded;
        self.failure_reason = Some("Payment refunded".to_string());
        self.metadata.insert("refund_reason", reason.unwrap_or("Refund requested"));
        self.metadata.insert("refunded_at", now.to_rfc3339());
        self.updated_at = now;
        Ok(())
    }
}

/// Returned to the storefront after a gateway transaction is opened.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitialization {
    pub payment_id: Uuid,
    pub authorization_url: String,
    pub reference: String,
    pub amount: Decimal,
}

/// A payment after verification, with the gateway's view that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub payment: Payment,
    pub verification: Verification,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodBreakdown { pub count: i64, pub amount: Decimal }

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub timeframe: Timeframe,
    pub total_revenue: Decimal,
    pub successful_payments: i64,
    pub failed_payments: i64,
    /// completed / (completed + failed); 0 when there were no attempts
    pub success_rate: f64,
    /// Completed payments per method
    pub payment_methods: BTreeMap<PaymentMethod, MethodBreakdown>,
}

impl PaymentStats {
    pub fn from_payments<'a>(timeframe: Timeframe, payments: impl IntoIterator<Item = &'a Payment>) -> Self {
        let mut stats = Self::empty(timeframe);
        for payment in payments {
            match payment.status {
                PaymentStatus::Completed => {
                    stats.successful_payments += 1;
                    stats.total_revenue += payment.amount;
                    let entry = stats.payment_methods.entry(payment.payment_method).or_default();
                    entry.count += 1;
                    entry.amount += payment.amount;
                }
                PaymentStatus::Failed => stats.failed_payments += 1,
                _ => {}
            }
        }
        stats.success_rate = Self::rate(stats.successful_payments, stats.failed_payments);
        stats
    }

    pub fn empty(timeframe: Timeframe) -> Self {
        Self {
            timeframe, total_revenue: Decimal::ZERO, successful_payments: 0, failed_payments: 0,
            success_rate: 0.0, payment_methods: BTreeMap::new(),
        }
    }

    pub fn rate(completed: i64, failed: i64) -> f64 {
        let attempts = completed + failed;
        if attempts == 0 { 0.0 } else { completed as f64 / attempts as f64 }
    }
}
