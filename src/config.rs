//! Service configuration

use std::time::Duration;

use anyhow::Context;

/// Service configuration, read once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL. When unset in development the in-memory
    /// store is used instead.
    pub database_url: Option<String>,
    /// HTTP port
    pub port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    /// Optional NATS URL for domain event publication
    pub nats_url: Option<String>,
    pub gateway: GatewayConfig,
    pub payments: PaymentConfig,
}

/// Payment gateway client settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    /// Upper bound on a single gateway round-trip
    pub timeout: Duration,
}

/// Settings the payment coordinator applies to new payments.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Currency recorded on gateway and manual payments
    pub currency: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self { currency: "NGN".to_string() }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if database_url.is_none() && environment != "development" {
            anyhow::bail!("DATABASE_URL must be set in {environment} environment");
        }

        let secret_key = match std::env::var("PAYSTACK_SECRET_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ if environment == "development" => "sk_test_dev-not-for-production".to_string(),
            _ => anyhow::bail!("PAYSTACK_SECRET_KEY must be set in {environment} environment"),
        };

        let timeout_secs: u64 = match std::env::var("GATEWAY_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().context("GATEWAY_TIMEOUT_SECS must be an integer")?,
            Err(_) => 20,
        };

        Ok(Self {
            database_url,
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8083),
            environment,
            nats_url: std::env::var("NATS_URL").ok().filter(|s| !s.is_empty()),
            gateway: GatewayConfig {
                base_url: std::env::var("PAYSTACK_BASE_URL")
                    .unwrap_or_else(|_| "https://api.paystack.co".into()),
                secret_key,
                timeout: Duration::from_secs(timeout_secs),
            },
            payments: PaymentConfig {
                currency: std::env::var("CURRENCY").unwrap_or_else(|_| "NGN".into()),
            },
        })
    }
}
