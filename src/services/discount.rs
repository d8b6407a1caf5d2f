//! Discount engine service
//!
//! Validation is read-only and reports rule failures in the result body.
//! Application is the only place usage is recorded, and it is atomic in the
//! store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{non_negative, nullable};
use crate::domain::aggregates::{
    Discount, DiscountContext, DiscountRejection, DiscountType, DiscountUsage, DiscountValidation,
};
use crate::domain::events::{DiscountEvent, DomainEvent};
use crate::domain::value_objects::DiscountCode;
use crate::publisher::EventPublisher;
use crate::store::{DiscountFilter, Page, Store};
use crate::{EcommerceError, Result};

const RECENT_USAGES: i64 = 10;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValidateDiscountRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    #[validate(custom = "non_negative")]
    pub order_amount: Decimal,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDiscountRequest {
    pub discount_id: Uuid,
    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiscountRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    #[validate(custom = "non_negative")]
    pub value: Decimal,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[validate(custom = "non_negative")]
    pub min_order_amount: Option<Decimal>,
    #[validate(custom = "non_negative")]
    pub max_discount_amount: Option<Decimal>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub applies_to_all_products: Option<bool>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    pub once_per_customer: Option<bool>,
    #[serde(default)]
    pub customer_ids: Vec<Uuid>,
}

/// Partial update. Absent fields keep their stored value; `null` clears the
/// nullable ones.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDiscountRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(rename = "type")]
    pub discount_type: Option<DiscountType>,
    #[validate(custom = "non_negative")]
    pub value: Option<Decimal>,
    /// `null` clears the limit. Bounds below are rechecked on the merged discount.
    #[serde(default, deserialize_with = "nullable")]
    pub usage_limit: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub min_order_amount: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub max_discount_amount: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub starts_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
    pub applies_to_all_products: Option<bool>,
    pub product_ids: Option<Vec<Uuid>>,
    pub category_ids: Option<Vec<Uuid>>,
    pub once_per_customer: Option<bool>,
    pub customer_ids: Option<Vec<Uuid>>,
}

/// A discount with its most recent redemptions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountDetails {
    #[serde(flatten)]
    pub discount: Discount,
    pub recent_usages: Vec<DiscountUsage>,
}

#[derive(Clone)]
pub struct DiscountService {
    store: Arc<dyn Store>,
    events: EventPublisher,
}

impl DiscountService {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    /// Evaluates a code against an order context. Rule failures are reported
    /// in the result, not as errors.
    pub async fn validate(&self, user_id: Uuid, input: &ValidateDiscountRequest) -> Result<DiscountValidation> {
        input.validate()?;
        let ctx = DiscountContext {
            user_id,
            customer_id: input.customer_id,
            order_amount: input.order_amount,
            product_ids: input.product_ids.clone(),
            category_ids: input.category_ids.clone(),
        };
        match self.evaluate(&input.code, &ctx).await? {
            Ok(discount) => Ok(DiscountValidation::accepted(discount, ctx.order_amount)),
            Err(reason) => {
                tracing::debug!(code = %input.code, %user_id, %reason, "discount rejected");
                Ok(DiscountValidation::rejected(reason))
            }
        }
    }

    /// Like [`validate`](Self::validate) but a rule failure is a BadRequest.
    /// Returns the discount and the amount it takes off `ctx.order_amount`.
    pub async fn price(&self, code: &str, ctx: &DiscountContext) -> Result<(Discount, Decimal)> {
        let discount = self.evaluate(code, ctx).await??;
        let amount = discount.compute_amount(ctx.order_amount);
        Ok((discount, amount))
    }

    async fn evaluate(&self, code: &str, ctx: &DiscountContext) -> Result<std::result::Result<Discount, DiscountRejection>> {
        let Ok(code) = DiscountCode::new(code) else { return Ok(Err(DiscountRejection::NotAvailable)) };
        let Some(discount) = self.store.find_discount_by_code(code.as_str()).await? else {
            return Ok(Err(DiscountRejection::NotAvailable));
        };
        let prior = discount.once_per_customer && self.store.has_discount_usage(discount.id, ctx.user_id).await?;
        Ok(discount.check_rules(ctx, prior, Utc::now()).map(|()| discount))
    }

    /// Records one redemption. Eligibility is re-checked under the store's
    /// lock, so this can fail even after a successful `validate`.
    pub async fn apply(&self, user_id: Uuid, input: &ApplyDiscountRequest) -> Result<Discount> {
        let usage = DiscountUsage::new(input.discount_id, user_id, input.order_id, input.product_id);
        let discount = self.store.apply_discount_usage(&usage).await?;
        tracing::info!(discount_id = %discount.id, code = %discount.code, %user_id, used_count = discount.used_count, "discount applied");
        self.events
            .publish(DomainEvent::Discount(DiscountEvent::Applied { discount_id: discount.id, user_id, order_id: input.order_id }))
            .await;
        Ok(discount)
    }

    pub async fn create(&self, input: CreateDiscountRequest) -> Result<Discount> {
        input.validate()?;
        let now = Utc::now();
        let discount = Discount {
            id: Uuid::now_v7(),
            code: DiscountCode::new(input.code)?.into_inner(),
            name: input.name,
            description: input.description,
            discount_type: input.discount_type,
            value: input.value,
            usage_limit: input.usage_limit,
            used_count: 0,
            min_order_amount: input.min_order_amount,
            max_discount_amount: input.max_discount_amount,
            starts_at: input.starts_at,
            expires_at: input.expires_at,
            is_active: input.is_active.unwrap_or(true),
            applies_to_all_products: input.applies_to_all_products.unwrap_or(true),
            product_ids: input.product_ids,
            category_ids: input.category_ids,
            once_per_customer: input.once_per_customer.unwrap_or(false),
            customer_ids: input.customer_ids,
            created_at: now,
            updated_at: now,
        };
        discount.validate_definition()?;
        self.store.insert_discount(&discount).await?;
        tracing::info!(discount_id = %discount.id, code = %discount.code, "discount created");
        Ok(discount)
    }

    pub async fn update(&self, id: Uuid, input: UpdateDiscountRequest) -> Result<Discount> {
        input.validate()?;
        let mut discount = self.find(id).await?;
        if let Some(code) = input.code { discount.code = DiscountCode::new(code)?.into_inner(); }
        if let Some(name) = input.name { discount.name = name; }
        if let Some(description) = input.description { discount.description = description; }
        if let Some(t) = input.discount_type { discount.discount_type = t; }
        if let Some(value) = input.value { discount.value = value; }
        if let Some(limit) = input.usage_limit { discount.usage_limit = limit; }
        if let Some(min) = input.min_order_amount { discount.min_order_amount = min; }
        if let Some(max) = input.max_discount_amount { discount.max_discount_amount = max; }
        if let Some(starts_at) = input.starts_at { discount.starts_at = starts_at; }
        if let Some(expires_at) = input.expires_at { discount.expires_at = expires_at; }
        if let Some(active) = input.is_active { discount.is_active = active; }
        if let Some(all) = input.applies_to_all_products { discount.applies_to_all_products = all; }
        if let Some(ids) = input.product_ids { discount.product_ids = ids; }
        if let Some(ids) = input.category_ids { discount.category_ids = ids; }
        if let Some(once) = input.once_per_customer { discount.once_per_customer = once; }
        if let Some(ids) = input.customer_ids { discount.customer_ids = ids; }
        discount.validate_definition()?;
        discount.updated_at = Utc::now();
        self.store.update_discount(&discount).await?;
        tracing::info!(discount_id = %id, "discount updated");
        Ok(discount)
    }

    pub async fn get(&self, id: Uuid) -> Result<DiscountDetails> {
        let discount = self.find(id).await?;
        let recent_usages = self.store.recent_discount_usages(id, RECENT_USAGES).await?;
        Ok(DiscountDetails { discount, recent_usages })
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Discount> {
        let code = DiscountCode::new(code)?;
        self.store
            .find_discount_by_code(code.as_str())
            .await?
            .ok_or_else(|| EcommerceError::not_found("Discount"))
    }

    pub async fn list(&self, filter: &DiscountFilter) -> Result<Page<Discount>> {
        self.store.list_discounts(filter).await
    }

    /// Active discounts inside their validity window.
    pub async fn active(&self) -> Result<Vec<Discount>> {
        self.store.live_discounts(Utc::now()).await
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<Discount> {
        self.set_active(id, false).await
    }

    pub async fn reactivate(&self, id: Uuid) -> Result<Discount> {
        self.set_active(id, true).await
    }

    /// Soft delete. Usage history keeps referencing the discount.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.set_active(id, false).await.map(|_| ())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Discount> {
        let mut discount = self.find(id).await?;
        discount.is_active = active;
        discount.updated_at = Utc::now();
        self.store.update_discount(&discount).await?;
        tracing::info!(discount_id = %id, active, "discount activation changed");
        Ok(discount)
    }

    async fn find(&self, id: Uuid) -> Result<Discount> {
        self.store.find_discount(id).await?.ok_or_else(|| EcommerceError::not_found("Discount"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> DiscountService {
        DiscountService::new(Arc::new(MemoryStore::new()), EventPublisher::disabled())
    }

    fn create_request(code: &str, discount_type: DiscountType, value: Decimal) -> CreateDiscountRequest {
        CreateDiscountRequest {
            code: code.into(), name: "Promo".into(), description: None, discount_type, value, usage_limit: None,
            min_order_amount: None, max_discount_amount: None, starts_at: None, expires_at: None, is_active: None,
            applies_to_all_products: None, product_ids: vec![], category_ids: vec![], once_per_customer: None,
            customer_ids: vec![],
        }
    }

    fn validate_request(code: &str, amount: Decimal) -> ValidateDiscountRequest {
        ValidateDiscountRequest { code: code.into(), order_amount: amount, product_ids: vec![], category_ids: vec![], customer_id: None }
    }

    #[tokio::test]
    async fn test_validate_percentage_with_cap() {
        let svc = service();
        let mut req = create_request("save10", DiscountType::Percentage, Decimal::new(10, 0));
        req.max_discount_amount = Some(Decimal::new(15, 0));
        let created = svc.create(req).await.unwrap();
        assert_eq!(created.code, "SAVE10");

        let result = svc.validate(Uuid::now_v7(), &validate_request(" Save10 ", Decimal::new(200, 0))).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.discount_amount, Decimal::new(15, 0));
        assert_eq!(result.final_amount, Some(Decimal::new(185, 0)));
    }

    #[tokio::test]
    async fn test_validate_unknown_code() {
        let result = service().validate(Uuid::now_v7(), &validate_request("NOPE", Decimal::TEN)).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.discount_amount, Decimal::ZERO);
        assert_eq!(result.message.as_deref(), Some("Discount not found or expired"));
    }

    #[tokio::test]
    async fn test_usage_limit_exhaustion() {
        let svc = service();
        let mut req = create_request("LIMITED", DiscountType::FixedAmount, Decimal::new(5, 0));
        req.usage_limit = Some(2);
        let discount = svc.create(req).await.unwrap();
        let apply = ApplyDiscountRequest { discount_id: discount.id, order_id: None, product_id: None };

        svc.apply(Uuid::now_v7(), &apply).await.unwrap();
        let second = svc.apply(Uuid::now_v7(), &apply).await.unwrap();
        assert_eq!(second.used_count, 2);

        let err = svc.apply(Uuid::now_v7(), &apply).await.unwrap_err();
        assert!(matches!(err, EcommerceError::BadRequest(ref m) if m == "Discount usage limit reached"));
        let result = svc.validate(Uuid::now_v7(), &validate_request("LIMITED", Decimal::TEN)).await.unwrap();
        assert_eq!(result.message.as_deref(), Some("Discount usage limit reached"));
        assert_eq!(svc.get(discount.id).await.unwrap().recent_usages.len(), 2);
    }

    #[tokio::test]
    async fn test_once_per_customer() {
        let svc = service();
        let mut req = create_request("WELCOME", DiscountType::FixedAmount, Decimal::new(5, 0));
        req.once_per_customer = Some(true);
        let discount = svc.create(req).await.unwrap();
        let user = Uuid::now_v7();
        let apply = ApplyDiscountRequest { discount_id: discount.id, order_id: None, product_id: None };

        svc.apply(user, &apply).await.unwrap();
        let result = svc.validate(user, &validate_request("WELCOME", Decimal::TEN)).await.unwrap();
        assert_eq!(result.message.as_deref(), Some("Discount can only be used once per customer"));
        assert!(svc.apply(user, &apply).await.is_err());
        // another shopper is unaffected
        assert!(svc.apply(Uuid::now_v7(), &apply).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_definitions() {
        let svc = service();
        svc.create(create_request("DUP", DiscountType::FixedAmount, Decimal::ONE)).await.unwrap();
        let err = svc.create(create_request("dup", DiscountType::FixedAmount, Decimal::ONE)).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Conflict(_)));

        let err = svc.create(create_request("BIG", DiscountType::Percentage, Decimal::new(150, 0))).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Validation(_)));

        let mut scoped = create_request("SCOPED", DiscountType::FixedAmount, Decimal::ONE);
        scoped.applies_to_all_products = Some(false);
        assert!(matches!(svc.create(scoped).await.unwrap_err(), EcommerceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_deactivate_hides_from_active_list() {
        let svc = service();
        let discount = svc.create(create_request("SEASON", DiscountType::FreeShipping, Decimal::ZERO)).await.unwrap();
        assert_eq!(svc.active().await.unwrap().len(), 1);
        svc.delete(discount.id).await.unwrap();
        assert!(svc.active().await.unwrap().is_empty());
        let result = svc.validate(Uuid::now_v7(), &validate_request("SEASON", Decimal::TEN)).await.unwrap();
        assert!(!result.is_valid);
        assert!(svc.reactivate(discount.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_update_changes_code_and_rechecks_invariants() {
        let svc = service();
        let discount = svc.create(create_request("OLD", DiscountType::FixedAmount, Decimal::ONE)).await.unwrap();
        svc.create(create_request("TAKEN", DiscountType::FixedAmount, Decimal::ONE)).await.unwrap();

        let update = UpdateDiscountRequest { code: Some("new".into()), ..Default::default() };
        assert_eq!(svc.update(discount.id, update).await.unwrap().code, "NEW");
        assert!(svc.get_by_code("new").await.is_ok());

        let clash = UpdateDiscountRequest { code: Some("taken".into()), ..Default::default() };
        assert!(matches!(svc.update(discount.id, clash).await.unwrap_err(), EcommerceError::Conflict(_)));

        let bad = UpdateDiscountRequest { discount_type: Some(DiscountType::Percentage), value: Some(Decimal::new(101, 0)), ..Default::default() };
        assert!(svc.update(discount.id, bad).await.is_err());
    }

    #[tokio::test]
    async fn test_update_null_clears_optional_bounds() {
        let svc = service();
        let mut create = create_request("WINDOW", DiscountType::FixedAmount, Decimal::ONE);
        create.usage_limit = Some(5);
        create.expires_at = Some(Utc::now() + chrono::Duration::days(1));
        let discount = svc.create(create).await.unwrap();

        let untouched: UpdateDiscountRequest = serde_json::from_value(serde_json::json!({ "name": "Renamed" })).unwrap();
        let kept = svc.update(discount.id, untouched).await.unwrap();
        assert_eq!((kept.usage_limit, kept.expires_at), (Some(5), discount.expires_at));

        let cleared: UpdateDiscountRequest =
            serde_json::from_value(serde_json::json!({ "usageLimit": null, "expiresAt": null })).unwrap();
        let cleared = svc.update(discount.id, cleared).await.unwrap();
        assert_eq!((cleared.usage_limit, cleared.expires_at), (None, None));
        assert_eq!(cleared.name, "Renamed");

        let zero = UpdateDiscountRequest { usage_limit: Some(Some(0)), ..Default::default() };
        assert!(matches!(svc.update(discount.id, zero).await, Err(EcommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_search() {
        let svc = service();
        svc.create(create_request("SUMMER", DiscountType::FixedAmount, Decimal::ONE)).await.unwrap();
        svc.create(create_request("WINTER", DiscountType::FixedAmount, Decimal::ONE)).await.unwrap();
        let filter = DiscountFilter { search: Some("summ".into()), ..Default::default() };
        let page = svc.list(&filter).await.unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.pagination.total, 1);
    }
}
