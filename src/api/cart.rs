//! Cart routes

use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiJson, AppState, CurrentUser};
use crate::domain::aggregates::{Cart, CartSummary, CartValidation};
use crate::services::cart::{AddToCartRequest, MergeCartRequest, UpdateCartItemRequest};
use crate::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/summary", get(summary))
        .route("/cart/count", get(count))
        .route("/cart/validate", get(validate))
        .route("/cart/merge", post(merge))
        .route("/cart/items", post(add_item))
        .route("/cart/items/:item_id", put(update_item))
        .route("/cart/items/:item_id", delete(remove_item))
}

async fn get_cart(State(s): State<AppState>, user: CurrentUser) -> Result<Json<Cart>> {
    Ok(Json(s.services.carts.get_or_create(user.id).await?))
}

async fn summary(State(s): State<AppState>, user: CurrentUser) -> Result<Json<CartSummary>> {
    Ok(Json(s.services.carts.summary(user.id).await?))
}

async fn count(State(s): State<AppState>, user: CurrentUser) -> Result<Json<Value>> {
    let count = s.services.carts.count(user.id).await?;
    Ok(Json(json!({ "count": count })))
}

async fn validate(State(s): State<AppState>, user: CurrentUser) -> Result<Json<CartValidation>> {
    Ok(Json(s.services.carts.validate_for_checkout(user.id).await?))
}

async fn add_item(State(s): State<AppState>, user: CurrentUser, ApiJson(req): ApiJson<AddToCartRequest>) -> Result<Json<Cart>> {
    Ok(Json(s.services.carts.add_item(user.id, &req).await?))
}

async fn update_item(
    State(s): State<AppState>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateCartItemRequest>,
) -> Result<Json<Cart>> {
    Ok(Json(s.services.carts.update_item(user.id, item_id, req.quantity).await?))
}

async fn remove_item(State(s): State<AppState>, user: CurrentUser, Path(item_id): Path<Uuid>) -> Result<Json<Cart>> {
    Ok(Json(s.services.carts.remove_item(user.id, item_id).await?))
}

async fn clear_cart(State(s): State<AppState>, user: CurrentUser) -> Result<Json<Cart>> {
    Ok(Json(s.services.carts.clear(user.id).await?))
}

async fn merge(State(s): State<AppState>, user: CurrentUser, ApiJson(req): ApiJson<MergeCartRequest>) -> Result<Json<Cart>> {
    Ok(Json(s.services.carts.merge(user.id, &req.items).await?))
}
