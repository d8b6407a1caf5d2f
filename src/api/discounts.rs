//! Discount routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AdminUser, ApiJson, AppState, CurrentUser};
use crate::domain::aggregates::{Discount, DiscountType, DiscountValidation};
use crate::services::discount::{
    ApplyDiscountRequest, CreateDiscountRequest, DiscountDetails, UpdateDiscountRequest, ValidateDiscountRequest,
};
use crate::store::{DiscountFilter, Page, PageRequest};
use crate::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/discount", post(create).get(list))
        .route("/discount/validate", post(validate))
        .route("/discount/apply", post(apply))
        .route("/discount/active", get(active))
        .route("/discount/code/:code", get(by_code))
        .route("/discount/:id", get(get_one).put(update).delete(remove))
        .route("/discount/:id/deactivate", put(deactivate))
        .route("/discount/:id/reactivate", put(reactivate))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub is_active: Option<bool>,
    #[serde(rename = "type")]
    pub discount_type: Option<DiscountType>,
    pub search: Option<String>,
}

impl From<DiscountQuery> for DiscountFilter {
    fn from(q: DiscountQuery) -> Self {
        Self {
            page: PageRequest::new(q.page, q.limit),
            is_active: q.is_active,
            discount_type: q.discount_type,
            search: q.search.filter(|s| !s.trim().is_empty()),
        }
    }
}

async fn validate(
    State(s): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<ValidateDiscountRequest>,
) -> Result<Json<DiscountValidation>> {
    Ok(Json(s.services.discounts.validate(user.id, &req).await?))
}

async fn apply(State(s): State<AppState>, user: CurrentUser, ApiJson(req): ApiJson<ApplyDiscountRequest>) -> Result<Json<Discount>> {
    Ok(Json(s.services.discounts.apply(user.id, &req).await?))
}

async fn active(State(s): State<AppState>) -> Result<Json<Vec<Discount>>> {
    Ok(Json(s.services.discounts.active().await?))
}

async fn by_code(State(s): State<AppState>, Path(code): Path<String>) -> Result<Json<Discount>> {
    Ok(Json(s.services.discounts.get_by_code(&code).await?))
}

async fn create(
    State(s): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(req): ApiJson<CreateDiscountRequest>,
) -> Result<(StatusCode, Json<Discount>)> {
    let discount = s.services.discounts.create(req).await?;
    tracing::info!(admin_id = %admin.id, discount_id = %discount.id, "discount created via api");
    Ok((StatusCode::CREATED, Json(discount)))
}

async fn list(State(s): State<AppState>, _admin: AdminUser, Query(q): Query<DiscountQuery>) -> Result<Json<Page<Discount>>> {
    Ok(Json(s.services.discounts.list(&q.into()).await?))
}

async fn get_one(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<Uuid>) -> Result<Json<DiscountDetails>> {
    Ok(Json(s.services.discounts.get(id).await?))
}

async fn update(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateDiscountRequest>,
) -> Result<Json<Discount>> {
    Ok(Json(s.services.discounts.update(id, req).await?))
}

async fn deactivate(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<Uuid>) -> Result<Json<Discount>> {
    Ok(Json(s.services.discounts.deactivate(id).await?))
}

async fn reactivate(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<Uuid>) -> Result<Json<Discount>> {
    Ok(Json(s.services.discounts.reactivate(id).await?))
}

async fn remove(State(s): State<AppState>, _admin: AdminUser, Path(id): Path<Uuid>) -> Result<StatusCode> {
    s.services.discounts.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
