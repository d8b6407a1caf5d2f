//! Discount Aggregate
//!
//! Rule evaluation and amount computation for discount codes. Everything here
//! is pure; the usage ledger lookup is done by the caller and passed in.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::EcommerceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType { Percentage, FixedAmount, FreeShipping }

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "PERCENTAGE",
            Self::FixedAmount => "FIXED_AMOUNT",
            Self::FreeShipping => "FREE_SHIPPING",
        }
    }
}

impl FromStr for DiscountType {
    type Err = EcommerceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERCENTAGE" => Ok(Self::Percentage),
            "FIXED_AMOUNT" => Ok(Self::FixedAmount),
            "FREE_SHIPPING" => Ok(Self::FreeShipping),
            other => Err(EcommerceError::validation(format!("unknown discount type '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub applies_to_all_products: bool,
    pub product_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
    pub once_per_customer: bool,
    pub customer_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one discount redemption.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountUsage {
    pub id: Uuid,
    pub discount_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub used_at: DateTime<Utc>,
}

impl DiscountUsage {
    pub fn new(discount_id: Uuid, user_id: Uuid, order_id: Option<Uuid>, product_id: Option<Uuid>) -> Self {
        Self { id: Uuid::now_v7(), discount_id, user_id, order_id, product_id, used_at: Utc::now() }
    }
}

/// What the order being priced looks like to the discount rules.
#[derive(Clone, Debug, Default)]
pub struct DiscountContext {
    pub user_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub order_amount: Decimal,
    pub product_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
}

/// Reason a discount cannot be used. The display text is the message shown to
/// the shopper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscountRejection {
    NotAvailable,
    MinimumNotMet(Decimal),
    UsageLimitReached,
    AlreadyUsed,
    CustomerNotEligible,
    ProductsNotEligible,
}

impl fmt::Display for DiscountRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => write!(f, "Discount not found or expired"),
            Self::MinimumNotMet(min) => write!(f, "Minimum order amount of {min} required"),
            Self::UsageLimitReached => write!(f, "Discount usage limit reached"),
            Self::AlreadyUsed => write!(f, "Discount can only be used once per customer"),
            Self::CustomerNotEligible => write!(f, "Discount not available for this customer"),
            Self::ProductsNotEligible => write!(f, "Discount not applicable to products in cart"),
        }
    }
}

impl From<DiscountRejection> for EcommerceError {
    fn from(r: DiscountRejection) -> Self { EcommerceError::BadRequest(r.to_string()) }
}

impl Discount {
    /// Active and inside its `[starts_at, expires_at]` window. Missing bounds
    /// are open.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |s| s <= now)
            && self.expires_at.map_or(true, |e| e >= now)
    }

    pub fn is_free_shipping(&self) -> bool { self.discount_type == DiscountType::FreeShipping }

    fn limit_reached(&self) -> bool { self.usage_limit.is_some_and(|limit| self.used_count >= limit) }

    /// Evaluates the eligibility rules in order, stopping at the first failure.
    pub fn check_rules(&self, ctx: &DiscountContext, has_prior_usage: bool, now: DateTime<Utc>) -> Result<(), DiscountRejection> {
        if !self.is_live(now) { return Err(DiscountRejection::NotAvailable); }
        if let Some(min) = self.min_order_amount {
            if ctx.order_amount < min { return Err(DiscountRejection::MinimumNotMet(min)); }
        }
        if self.limit_reached() { return Err(DiscountRejection::UsageLimitReached); }
        if self.once_per_customer && has_prior_usage { return Err(DiscountRejection::AlreadyUsed); }
        let customer = ctx.customer_id.unwrap_or(ctx.user_id);
        if !self.customer_ids.is_empty() && !self.customer_ids.contains(&customer) {
            return Err(DiscountRejection::CustomerNotEligible);
        }
        if !self.applies_to_all_products {
            let eligible = ctx.product_ids.iter().any(|p| self.product_ids.contains(p))
                || ctx.category_ids.iter().any(|c| self.category_ids.contains(c));
            if !eligible { return Err(DiscountRejection::ProductsNotEligible); }
        }
        Ok(())
    }

    /// Checks repeated at redemption time, under the discount row lock.
    pub fn check_redeemable(&self, user_id: Uuid, has_prior_usage: bool, now: DateTime<Utc>) -> Result<(), DiscountRejection> {
        if !self.is_live(now) { return Err(DiscountRejection::NotAvailable); }
        if self.once_per_customer && has_prior_usage { return Err(DiscountRejection::AlreadyUsed); }
        if !self.customer_ids.is_empty() && !self.customer_ids.contains(&user_id) {
            return Err(DiscountRejection::CustomerNotEligible);
        }
        if self.limit_reached() { return Err(DiscountRejection::UsageLimitReached); }
        Ok(())
    }

    /// Monetary reduction for `order_amount`, rounded to cents half away from
    /// zero, clamped to `max_discount_amount` and then to the order amount itself.
    pub fn compute_amount(&self, order_amount: Decimal) -> Decimal {
        let raw = match self.discount_type {
            // a rate of at most 1 keeps the product within range
            DiscountType::Percentage => (order_amount * (self.value / Decimal::ONE_HUNDRED))
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            DiscountType::FixedAmount => self.value,
            // shipping is waived by the order, not through the amount
            DiscountType::FreeShipping => Decimal::ZERO,
        };
        let capped = match self.max_discount_amount {
            Some(max) if raw > max => max,
            _ => raw,
        };
        capped.min(order_amount).max(Decimal::ZERO)
    }

    /// Definition invariants, checked on create and update.
    pub fn validate_definition(&self) -> Result<(), EcommerceError> {
        if self.value < Decimal::ZERO {
            return Err(EcommerceError::validation("Discount value must not be negative"));
        }
        if self.discount_type == DiscountType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(EcommerceError::validation("Percentage discount cannot exceed 100%"));
        }
        if self.usage_limit.is_some_and(|l| l <= 0) {
            return Err(EcommerceError::validation("Usage limit must be positive"));
        }
        let negative = |v: Option<Decimal>| v.is_some_and(|v| v < Decimal::ZERO);
        if negative(self.min_order_amount) || negative(self.max_discount_amount) {
            return Err(EcommerceError::validation("Order and discount bounds must not be negative"));
        }
        if !self.applies_to_all_products && self.product_ids.is_empty() && self.category_ids.is_empty() {
            return Err(EcommerceError::validation(
                "When appliesToAllProducts is false, you must specify productIds or categoryIds",
            ));
        }
        if let (Some(start), Some(end)) = (self.starts_at, self.expires_at) {
            if start >= end {
                return Err(EcommerceError::validation("Start date must be before expiration date"));
            }
        }
        Ok(())
    }
}

/// Result of `validate`, returned to the storefront as-is.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountValidation {
    pub is_valid: bool,
    pub discount_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_free_shipping: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Discount>,
}

impl DiscountValidation {
    pub fn rejected(reason: DiscountRejection) -> Self {
        Self { is_valid: false, discount_amount: Decimal::ZERO, message: Some(reason.to_string()), ..Default::default() }
    }

    pub fn accepted(discount: Discount, order_amount: Decimal) -> Self {
        let discount_amount = discount.compute_amount(order_amount);
        Self {
            is_valid: true,
            discount_amount,
            message: None,
            is_free_shipping: Some(discount.is_free_shipping()),
            original_amount: Some(order_amount),
            final_amount: Some(order_amount - discount_amount),
            discount: Some(discount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn discount(discount_type: DiscountType, value: Decimal) -> Discount {
        let now = Utc::now();
        Discount {
            id: Uuid::now_v7(), code: "SAVE".into(), name: "Save".into(), description: None, discount_type, value,
            usage_limit: None, used_count: 0, min_order_amount: None, max_discount_amount: None, starts_at: None,
            expires_at: None, is_active: true, applies_to_all_products: true, product_ids: vec![], category_ids: vec![],
            once_per_customer: false, customer_ids: vec![], created_at: now, updated_at: now,
        }
    }

    fn ctx(amount: Decimal) -> DiscountContext {
        DiscountContext { user_id: Uuid::now_v7(), order_amount: amount, ..Default::default() }
    }

    #[test]
    fn test_percentage_clamped_to_max() {
        let mut d = discount(DiscountType::Percentage, Decimal::new(10, 0));
        d.max_discount_amount = Some(Decimal::new(15, 0));
        let result = DiscountValidation::accepted(d, Decimal::new(200, 0));
        assert_eq!(result.discount_amount, Decimal::new(15, 0));
        assert_eq!(result.final_amount, Some(Decimal::new(185, 0)));
        assert_eq!(result.is_free_shipping, Some(false));
    }

    #[test]
    fn test_percentage_rounds_to_cents() {
        let d = discount(DiscountType::Percentage, Decimal::new(125, 1));
        assert_eq!(d.compute_amount(Decimal::new(4, 2)), Decimal::new(1, 2));
        assert_eq!(d.compute_amount(Decimal::new(1999, 2)), Decimal::new(250, 2));
        let full = discount(DiscountType::Percentage, Decimal::ONE_HUNDRED);
        assert_eq!(full.compute_amount(Decimal::MAX), Decimal::MAX);
    }

    #[test]
    fn test_fixed_amount_never_exceeds_order() {
        let d = discount(DiscountType::FixedAmount, Decimal::new(50, 0));
        assert_eq!(d.compute_amount(Decimal::new(3000, 2)), Decimal::new(3000, 2));
        assert_eq!(d.compute_amount(Decimal::new(80, 0)), Decimal::new(50, 0));
    }

    #[test]
    fn test_free_shipping_amount_is_zero() {
        let d = discount(DiscountType::FreeShipping, Decimal::ZERO);
        let result = DiscountValidation::accepted(d, Decimal::new(40, 0));
        assert_eq!(result.discount_amount, Decimal::ZERO);
        assert_eq!(result.is_free_shipping, Some(true));
        assert_eq!(result.final_amount, Some(Decimal::new(40, 0)));
    }

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let mut d = discount(DiscountType::FixedAmount, Decimal::ONE);
        d.starts_at = Some(now + Duration::hours(1));
        assert_eq!(d.check_rules(&ctx(Decimal::TEN), false, now), Err(DiscountRejection::NotAvailable));
        d.starts_at = Some(now - Duration::hours(2));
        d.expires_at = Some(now - Duration::hours(1));
        assert_eq!(d.check_rules(&ctx(Decimal::TEN), false, now), Err(DiscountRejection::NotAvailable));
        d.expires_at = None;
        assert!(d.check_rules(&ctx(Decimal::TEN), false, now).is_ok());
        d.is_active = false;
        assert_eq!(d.check_rules(&ctx(Decimal::TEN), false, now), Err(DiscountRejection::NotAvailable));
    }

    #[test]
    fn test_rule_order_short_circuits() {
        let now = Utc::now();
        let mut d = discount(DiscountType::FixedAmount, Decimal::ONE);
        d.min_order_amount = Some(Decimal::new(100, 0));
        d.usage_limit = Some(1);
        d.used_count = 1;
        // minimum is reported before the exhausted limit
        assert_eq!(
            d.check_rules(&ctx(Decimal::TEN), false, now),
            Err(DiscountRejection::MinimumNotMet(Decimal::new(100, 0)))
        );
        assert_eq!(d.check_rules(&ctx(Decimal::new(100, 0)), false, now), Err(DiscountRejection::UsageLimitReached));
        assert_eq!(
            DiscountRejection::MinimumNotMet(Decimal::new(100, 0)).to_string(),
            "Minimum order amount of 100 required"
        );
    }

    #[test]
    fn test_customer_allow_list_uses_customer_id_override() {
        let now = Utc::now();
        let allowed = Uuid::now_v7();
        let mut d = discount(DiscountType::FixedAmount, Decimal::ONE);
        d.customer_ids = vec![allowed];
        let mut c = ctx(Decimal::TEN);
        assert_eq!(d.check_rules(&c, false, now), Err(DiscountRejection::CustomerNotEligible));
        c.customer_id = Some(allowed);
        assert!(d.check_rules(&c, false, now).is_ok());
    }

    #[test]
    fn test_product_and_category_allow_lists() {
        let now = Utc::now();
        let category = Uuid::now_v7();
        let mut d = discount(DiscountType::Percentage, Decimal::TEN);
        d.applies_to_all_products = false;
        d.category_ids = vec![category];
        let mut c = ctx(Decimal::TEN);
        c.product_ids = vec![Uuid::now_v7()];
        assert_eq!(d.check_rules(&c, false, now), Err(DiscountRejection::ProductsNotEligible));
        c.category_ids = vec![category];
        assert!(d.check_rules(&c, false, now).is_ok());
    }

    #[test]
    fn test_once_per_customer() {
        let now = Utc::now();
        let mut d = discount(DiscountType::FixedAmount, Decimal::ONE);
        d.once_per_customer = true;
        assert_eq!(d.check_rules(&ctx(Decimal::TEN), true, now), Err(DiscountRejection::AlreadyUsed));
        assert_eq!(d.check_redeemable(Uuid::now_v7(), true, now), Err(DiscountRejection::AlreadyUsed));
        assert!(d.check_redeemable(Uuid::now_v7(), false, now).is_ok());
    }

    #[test]
    fn test_definition_invariants() {
        let mut d = discount(DiscountType::Percentage, Decimal::new(101, 0));
        assert!(d.validate_definition().is_err());
        d.value = Decimal::new(20, 0);
        assert!(d.validate_definition().is_ok());
        d.applies_to_all_products = false;
        assert!(d.validate_definition().is_err());
        d.product_ids = vec![Uuid::now_v7()];
        assert!(d.validate_definition().is_ok());
        let now = Utc::now();
        d.starts_at = Some(now);
        d.expires_at = Some(now);
        assert!(d.validate_definition().is_err());
    }
}
