//! Catalog read model
//!
//! Products and variants are owned by the catalog service. The storefront
//! only reads them to price and stock-check cart lines and order snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub status: ProductStatus,
    pub track_quantity: bool,
    pub quantity: i32,
    pub category_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub sku: Option<String>,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub track_quantity: bool,
    pub quantity: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus { #[default] Draft, Active, Archived }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "DRAFT", Self::Active => "ACTIVE", Self::Archived => "ARCHIVED" }
    }
}

impl FromStr for ProductStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "ACTIVE" => Ok(Self::Active),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(format!("unknown product status '{other}'")),
        }
    }
}

impl Product {
    /// Soft-deleted or non-ACTIVE products are treated as missing.
    pub fn is_available(&self) -> bool { self.deleted_at.is_none() && self.status == ProductStatus::Active }
    pub fn has_stock(&self, requested: i32) -> bool { !self.track_quantity || self.quantity >= requested }
}

impl ProductVariant {
    pub fn has_stock(&self, requested: i32) -> bool { !self.track_quantity || self.quantity >= requested }
}

/// The entity whose stock gates admission of a cart line: the variant when one
/// is chosen, otherwise the product.
#[derive(Clone, Copy, Debug)]
pub enum StockItem<'a> {
    Product(&'a Product),
    Variant(&'a ProductVariant),
}

impl<'a> StockItem<'a> {
    pub fn of(product: &'a Product, variant: Option<&'a ProductVariant>) -> Self {
        match variant { Some(v) => Self::Variant(v), None => Self::Product(product) }
    }
    pub fn price(&self) -> Decimal {
        match self { Self::Product(p) => p.price, Self::Variant(v) => v.price }
    }
    pub fn has_stock(&self, requested: i32) -> bool {
        match self { Self::Product(p) => p.has_stock(requested), Self::Variant(v) => v.has_stock(requested) }
    }
}
