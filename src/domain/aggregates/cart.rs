//! Cart Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items_count: i32,
    pub total_amount: Decimal,
    /// Newest first
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    /// Unit price captured when the line was added
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(cart_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>, quantity: i32, price: Decimal) -> Self {
        let now = Utc::now();
        Self { id: Uuid::now_v7(), cart_id, product_id, variant_id, quantity, price, created_at: now, updated_at: now }
    }

    /// Saturates instead of overflowing; orders recompute line totals with checked arithmetic.
    pub fn line_total(&self) -> Decimal { self.price.saturating_mul(Decimal::from(self.quantity)) }

    /// Whether this line occupies the (product, variant) slot of its cart.
    pub fn matches(&self, product_id: Uuid, variant_id: Option<Uuid>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}

/// Derived cart totals. Always recomputed from the full item set; both
/// figures saturate at their type's maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub items_count: i32,
    pub total_amount: Decimal,
}

impl CartTotals {
    pub fn from_items(items: &[CartItem]) -> Self {
        items.iter().fold(Self::default(), |acc, i| Self {
            items_count: acc.items_count.saturating_add(i.quantity),
            total_amount: acc.total_amount.saturating_add(i.line_total()),
        })
    }
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), user_id, items_count: 0, total_amount: Decimal::ZERO,
            items: vec![], created_at: now, updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool { self.items_count == 0 }

    pub fn find_line(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Option<&CartItem> {
        self.items.iter().find(|i| i.matches(product_id, variant_id))
    }
}

/// Outcome of the pre-checkout cart review.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub updated_cart: Cart,
}

/// Compact cart view for the header badge and mini-cart.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub items_count: i32,
    pub total_amount: Decimal,
    pub items: Vec<CartItem>,
}
