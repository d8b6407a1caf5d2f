//! HTTP/JSON surface

mod auth;
mod cart;
mod discounts;
mod error;
mod orders;
mod payments;

pub use auth::{AdminUser, CurrentUser, USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
pub use error::{ApiJson, ErrorBody};

use axum::{routing::get, Json, Router};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::domain::value_objects::Timeframe;
use crate::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub timeframe: Option<Timeframe>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront"})) }))
        .merge(cart::routes())
        .merge(orders::routes())
        .merge(payments::routes())
        .merge(discounts::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
