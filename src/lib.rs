//! Storefront commerce service
//!
//! Order-and-payment backend for an HTTP/JSON storefront.
//!
//! ## Features
//! - Shopping cart with price snapshots and derived totals
//! - Discount codes with usage ledger and eligibility rules
//! - Order snapshots and the order/payment status state machine
//! - Payment gateway initialization, verification and reconciliation

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod publisher;
pub mod services;
pub mod store;

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient permissions")]
    Forbidden,

    /// Payment gateway or message bus failure. The message never carries the
    /// raw upstream payload.
    #[error("External service error: {message}")]
    ExternalService { message: String, retryable: bool },

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl EcommerceError {
    pub fn not_found(entity: &str) -> Self {
        Self::NotFound(entity.to_string())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable kind reported to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::StorageError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for EcommerceError {
    fn from(e: serde_json::Error) -> Self {
        Self::StorageError(format!("serialization: {e}"))
    }
}

impl From<validator::ValidationErrors> for EcommerceError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
