//! HTTP mapping of [`EcommerceError`]

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::EcommerceError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl EcommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ExternalService { retryable: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExternalService { retryable: false, .. } => StatusCode::BAD_GATEWAY,
            Self::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::StorageError(detail) => {
                tracing::error!(error = %detail, "storage failure");
                "Internal server error".to_string()
            }
            Self::ExternalService { message, .. } => message.clone(),
            other => other.to_string(),
        };
        (self.status_code(), Json(ErrorBody { error: self.kind(), message })).into_response()
    }
}

impl From<JsonRejection> for EcommerceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// `Json` whose rejections use the service's error body.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(EcommerceError))]
pub struct ApiJson<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(EcommerceError::not_found("Order").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(EcommerceError::validation("bad").status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let timeout = EcommerceError::ExternalService { message: "timed out".into(), retryable: true };
        assert_eq!(timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let rejected = EcommerceError::ExternalService { message: "declined".into(), retryable: false };
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_storage_errors_are_masked() {
        let response = EcommerceError::StorageError("relation \"orders\" does not exist".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
