//! Payment gateway seam
//!
//! The payment coordinator talks to the processor only through
//! [`PaymentGateway`]. Implementations return sanitized results; raw processor
//! payloads never cross this boundary.

mod paystack;

pub use paystack::PaystackGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Verification;
use crate::Result;

/// Request to open a gateway transaction for an order.
#[derive(Clone, Debug)]
pub struct InitializeTransaction {
    /// Major currency units; the client converts to minor units
    pub amount: Decimal,
    pub email: String,
    pub currency: String,
    pub metadata: TransactionMetadata,
}

/// Order identification echoed back by the processor.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    pub order_id: Uuid,
    pub order_number: String,
}

/// Where to send the shopper to complete payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(&self, request: &InitializeTransaction) -> Result<Authorization>;

    async fn verify_transaction(&self, reference: &str) -> Result<Verification>;
}
