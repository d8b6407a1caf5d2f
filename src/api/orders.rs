//! Order routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AdminUser, ApiJson, AppState, CurrentUser, StatsQuery};
use crate::domain::aggregates::{Order, OrderDetails, OrderStats};
use crate::services::orders::{
    CancelOrderRequest, CreateOrderRequest, OrderDetailsInput, OrderQuery, UpdateOrderStatusRequest,
    UpdatePaymentStatusRequest, UpdateShippingRequest,
};
use crate::store::{Page, PageRequest};
use crate::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create).get(list))
        .route("/orders/checkout", post(checkout))
        .route("/orders/my", get(my_orders))
        .route("/orders/stats", get(stats))
        .route("/orders/my/:id/cancel", patch(cancel_mine))
        .route("/orders/:id", get(get_one))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/payment-status", patch(update_payment_status))
        .route("/orders/:id/shipping", patch(update_shipping))
        .route("/orders/:id/deliver", patch(deliver))
        .route("/orders/:id/cancel", patch(cancel))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

async fn create(
    State(s): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetails>)> {
    let order = s.services.orders.create_order(user.id, user.email.as_deref(), req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn checkout(
    State(s): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<OrderDetailsInput>,
) -> Result<(StatusCode, Json<OrderDetails>)> {
    let order = s.services.orders.checkout(user.id, user.email.as_deref(), req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list(State(s): State<AppState>, _admin: AdminUser, Query(q): Query<OrderQuery>) -> Result<Json<Page<Order>>> {
    Ok(Json(s.services.orders.list(&q.into()).await?))
}

async fn my_orders(State(s): State<AppState>, user: CurrentUser, Query(q): Query<PageQuery>) -> Result<Json<Page<Order>>> {
    Ok(Json(s.services.orders.my_orders(user.id, PageRequest::new(q.page, q.limit)).await?))
}

async fn stats(State(s): State<AppState>, _admin: AdminUser, Query(q): Query<StatsQuery>) -> Result<Json<OrderStats>> {
    Ok(Json(s.services.orders.stats(q.timeframe.unwrap_or_default()).await?))
}

/// Admins see every order, shoppers only their own.
async fn get_one(State(s): State<AppState>, user: CurrentUser, Path(identifier): Path<String>) -> Result<Json<OrderDetails>> {
    let owner = (!user.is_admin()).then_some(user.id);
    Ok(Json(s.services.orders.get(&identifier, owner).await?))
}

async fn update_status(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateOrderStatusRequest>,
) -> Result<Json<OrderDetails>> {
    Ok(Json(s.services.orders.update_status(id, req).await?))
}

async fn update_payment_status(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdatePaymentStatusRequest>,
) -> Result<Json<OrderDetails>> {
    Ok(Json(s.services.orders.update_payment_status(id, req).await?))
}

async fn update_shipping(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateShippingRequest>,
) -> Result<Json<OrderDetails>> {
    Ok(Json(s.services.orders.update_shipping(id, req).await?))
}

async fn deliver(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<Uuid>) -> Result<Json<OrderDetails>> {
    Ok(Json(s.services.orders.mark_delivered(id).await?))
}

async fn cancel(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    body: Option<ApiJson<CancelOrderRequest>>,
) -> Result<Json<OrderDetails>> {
    let reason = body.and_then(|ApiJson(b)| b.reason);
    Ok(Json(s.services.orders.cancel(id, reason.as_deref(), None).await?))
}

async fn cancel_mine(
    State(s): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    body: Option<ApiJson<CancelOrderRequest>>,
) -> Result<Json<OrderDetails>> {
    let reason = body.and_then(|ApiJson(b)| b.reason);
    Ok(Json(s.services.orders.cancel(id, reason.as_deref(), Some(user.id)).await?))
}
