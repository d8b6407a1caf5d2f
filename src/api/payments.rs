//! Payment routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use super::{AdminUser, ApiJson, AppState, CurrentUser, StatsQuery};
use crate::domain::aggregates::{Payment, PaymentInitialization, PaymentStats, VerificationOutcome};
use crate::services::payments::{InitializePaymentRequest, ManualPaymentRequest, RefundRequest, SetPaymentStatusRequest};
use crate::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payment/orders/:order_id/initialize", post(initialize))
        .route("/payment/orders/:order_id/manual", post(manual))
        .route("/payment/orders/:order_id", get(order_payments))
        .route("/payment/verify/:reference", post(verify))
        .route("/payment/stats", get(stats))
        .route("/payment/:id", get(get_one))
        .route("/payment/:id/status", put(update_status))
        .route("/payment/:id/refund", post(refund))
}

async fn initialize(
    State(s): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<Uuid>,
    body: Option<ApiJson<InitializePaymentRequest>>,
) -> Result<Json<PaymentInitialization>> {
    let owner = (!user.is_admin()).then_some(user.id);
    let mut req = body.map(|ApiJson(b)| b).unwrap_or_default();
    if req.email.is_none() {
        req.email = user.email;
    }
    Ok(Json(s.services.payments.initialize(order_id, owner, &req).await?))
}

async fn verify(
    State(s): State<AppState>,
    _user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<VerificationOutcome>> {
    Ok(Json(s.services.payments.verify(&reference).await?))
}

async fn manual(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<ManualPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>)> {
    let payment = s.services.payments.create_manual_payment(order_id, req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn order_payments(State(s): State<AppState>, _admin: AdminUser, Path(order_id): Path<Uuid>) -> Result<Json<Vec<Payment>>> {
    Ok(Json(s.services.payments.order_payments(order_id).await?))
}

async fn stats(State(s): State<AppState>, _admin: AdminUser, Query(q): Query<StatsQuery>) -> Result<Json<PaymentStats>> {
    Ok(Json(s.services.payments.stats(q.timeframe.unwrap_or_default()).await?))
}

async fn get_one(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<Uuid>) -> Result<Json<Payment>> {
    Ok(Json(s.services.payments.get(id).await?))
}

async fn update_status(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<SetPaymentStatusRequest>,
) -> Result<Json<Payment>> {
    Ok(Json(s.services.payments.update_status(id, req).await?))
}

async fn refund(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    body: Option<ApiJson<RefundRequest>>,
) -> Result<Json<Payment>> {
    let reason = body.and_then(|ApiJson(b)| b.reason);
    Ok(Json(s.services.payments.refund(id, reason.as_deref()).await?))
}
