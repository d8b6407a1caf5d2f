//! Paystack REST client (no SDK dependency)

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::{Authorization, InitializeTransaction, PaymentGateway, TransactionMetadata};
use crate::config::GatewayConfig;
use crate::domain::aggregates::{GatewayStatus, Verification};
use crate::{EcommerceError, Result};

pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Serialize)]
struct InitializeBody<'a> {
    /// Minor units (kobo)
    amount: i64,
    email: &'a str,
    currency: &'a str,
    metadata: &'a TransactionMetadata,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    id: Option<serde_json::Value>,
    gateway_response: Option<String>,
}

impl PaystackGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| external(format!("failed to build gateway client: {e}"), false))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<T> {
        let response = request.bearer_auth(&self.secret_key).send().await.map_err(transport_error)?;
        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(transport_error)?;
        if !status.is_success() || !envelope.status {
            tracing::warn!(operation, http_status = %status, message = %envelope.message, "gateway rejected request");
            return Err(external(format!("Payment gateway rejected {operation} (HTTP {})", status.as_u16()), status.is_server_error()));
        }
        envelope.data.ok_or_else(|| external(format!("Payment gateway returned no data for {operation}"), false))
    }
}

/// Converts a major-unit amount to the gateway's integer minor units.
pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| EcommerceError::validation("Amount is out of range for the payment gateway"))
}

fn external(message: String, retryable: bool) -> EcommerceError {
    EcommerceError::ExternalService { message, retryable }
}

fn transport_error(e: reqwest::Error) -> EcommerceError {
    if e.is_timeout() {
        external("Payment gateway timed out".to_string(), true)
    } else if e.is_decode() {
        external("Payment gateway returned an unreadable response".to_string(), false)
    } else {
        external("Payment gateway is unreachable".to_string(), e.is_connect())
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_transaction(&self, request: &InitializeTransaction) -> Result<Authorization> {
        let body = InitializeBody {
            amount: to_minor_units(request.amount)?,
            email: &request.email,
            currency: &request.currency,
            metadata: &request.metadata,
        };
        let url = format!("{}/transaction/initialize", self.base_url);
        let data: InitializeData = self.send(self.client.post(url).json(&body), "initialize").await?;
        tracing::info!(reference = %data.reference, order_id = %request.metadata.order_id, "gateway transaction initialized");
        Ok(Authorization { authorization_url: data.authorization_url, access_code: data.access_code, reference: data.reference })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<Verification> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let data: VerifyData = self.send(self.client.get(url), "verify").await?;
        let transaction_id = data.id.and_then(|id| match id {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Ok(Verification { status: GatewayStatus::from_gateway(&data.status), transaction_id, gateway_response: data.gateway_response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(Decimal::new(1050, 2)).unwrap(), 1050);
        assert_eq!(to_minor_units(Decimal::new(200, 0)).unwrap(), 20000);
        assert_eq!(to_minor_units(Decimal::new(12345, 3)).unwrap(), 1235);
    }

    #[test]
    fn test_verify_payload_parsing() {
        let raw = r#"{"status":true,"message":"ok","data":{"status":"success","id":4099260516,"gateway_response":"Approved","customer":{"email":"a@b.c"}}}"#;
        let envelope: Envelope<VerifyData> = serde_json::from_str(raw).unwrap();
        let data = envelope.data.unwrap();
        assert_eq!(GatewayStatus::from_gateway(&data.status), GatewayStatus::Success);
        assert_eq!(data.gateway_response.as_deref(), Some("Approved"));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let config = GatewayConfig {
            base_url: "https://api.paystack.co/".into(),
            secret_key: "sk_test".into(),
            timeout: std::time::Duration::from_secs(1),
        };
        assert_eq!(PaystackGateway::new(&config).unwrap().base_url, "https://api.paystack.co");
    }
}
