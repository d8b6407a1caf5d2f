//! Cart aggregator service

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Cart, CartItem, CartSummary, CartValidation, Product, ProductVariant, StockItem};
use crate::store::Store;
use crate::{EcommerceError, Result};

const SUMMARY_ITEMS: usize = 3;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1))]
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

fn combined(line: &CartItem, added: i32) -> Result<i32> {
    line.quantity.checked_add(added).ok_or_else(|| EcommerceError::bad_request("Quantity is too large"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemRequest {
    /// Zero or less removes the line
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCartRequest {
    #[serde(default)]
    pub items: Vec<AddToCartRequest>,
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(&self, user_id: Uuid) -> Result<Cart> {
        match self.store.find_cart(user_id).await? {
            Some(cart) => Ok(cart),
            None => self.store.create_cart(user_id).await,
        }
    }

    pub async fn add_item(&self, user_id: Uuid, input: &AddToCartRequest) -> Result<Cart> {
        input.validate()?;
        let (product, variant) = self.load_sellable(input.product_id, input.variant_id).await?;
        let stock = StockItem::of(&product, variant.as_ref());
        if !stock.has_stock(input.quantity) {
            return Err(EcommerceError::bad_request("Insufficient stock"));
        }

        let cart = self.get_or_create(user_id).await?;
        if let Some(existing) = cart.find_line(input.product_id, input.variant_id) {
            return self.update_item(user_id, existing.id, combined(existing, input.quantity)?).await;
        }

        let item = CartItem::new(cart.id, input.product_id, input.variant_id, input.quantity, stock.price());
        match self.store.insert_cart_item(&item).await {
            Ok(()) => {}
            // a concurrent add created the line first; fold into it
            Err(EcommerceError::Conflict(_)) => {
                let cart = self.get_or_create(user_id).await?;
                let existing = cart
                    .find_line(input.product_id, input.variant_id)
                    .ok_or_else(|| EcommerceError::conflict("Cart changed concurrently, retry"))?;
                return self.update_item(user_id, existing.id, combined(existing, input.quantity)?).await;
            }
            Err(e) => return Err(e),
        }
        tracing::debug!(%user_id, product_id = %input.product_id, quantity = input.quantity, "cart line added");
        self.store.refresh_cart_totals(cart.id).await
    }

    pub async fn update_item(&self, user_id: Uuid, item_id: Uuid, quantity: i32) -> Result<Cart> {
        let (cart, mut item) = self.owned_item(user_id, item_id).await?;
        if quantity <= 0 {
            self.store.delete_cart_item(item.id).await?;
            return self.store.refresh_cart_totals(cart.id).await;
        }

        let (product, variant) = self.load_sellable(item.product_id, item.variant_id).await?;
        if !StockItem::of(&product, variant.as_ref()).has_stock(quantity) {
            return Err(EcommerceError::bad_request("Insufficient stock"));
        }
        item.quantity = quantity;
        item.updated_at = Utc::now();
        self.store.update_cart_item(&item).await?;
        self.store.refresh_cart_totals(cart.id).await
    }

    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<Cart> {
        let (cart, item) = self.owned_item(user_id, item_id).await?;
        self.store.delete_cart_item(item.id).await?;
        self.store.refresh_cart_totals(cart.id).await
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<Cart> {
        let cart = self.store.find_cart(user_id).await?.ok_or_else(|| EcommerceError::not_found("Cart"))?;
        self.store.clear_cart_items(cart.id).await?;
        tracing::debug!(%user_id, "cart cleared");
        self.store.refresh_cart_totals(cart.id).await
    }

    /// Counts, total and the newest few lines. All zeros without a cart.
    pub async fn summary(&self, user_id: Uuid) -> Result<CartSummary> {
        Ok(match self.store.find_cart(user_id).await? {
            Some(cart) => CartSummary {
                items_count: cart.items_count,
                total_amount: cart.total_amount,
                items: cart.items.into_iter().take(SUMMARY_ITEMS).collect(),
            },
            None => CartSummary { items_count: 0, total_amount: Default::default(), items: vec![] },
        })
    }

    pub async fn count(&self, user_id: Uuid) -> Result<i32> {
        Ok(self.store.find_cart(user_id).await?.map_or(0, |c| c.items_count))
    }

    /// Folds guest lines into the user's cart. Lines that cannot be added are
    /// skipped.
    pub async fn merge(&self, user_id: Uuid, guest_items: &[AddToCartRequest]) -> Result<Cart> {
        for item in guest_items {
            if let Err(e) = self.add_item(user_id, item).await {
                tracing::warn!(%user_id, product_id = %item.product_id, error = %e, "skipped guest cart line");
            }
        }
        self.get_or_create(user_id).await
    }

    /// Re-checks every line against the live catalog. Price drift is corrected
    /// in place and reported but does not invalidate the cart.
    pub async fn validate_for_checkout(&self, user_id: Uuid) -> Result<CartValidation> {
        let cart = self.get_or_create(user_id).await?;
        if cart.is_empty() {
            return Err(EcommerceError::bad_request("Cart is empty"));
        }

        let mut is_valid = true;
        let mut errors = Vec::new();
        let mut repriced = false;
        for item in &cart.items {
            let product = self.store.product(item.product_id).await?;
            let label = product.as_ref().map_or_else(|| item.product_id.to_string(), |p| p.name.clone());
            let Some(product) = product.filter(Product::is_available) else {
                errors.push(format!("Product \"{label}\" is no longer available"));
                is_valid = false;
                continue;
            };
            let variant = match item.variant_id {
                Some(id) => match self.store.variant(id).await?.filter(|v| v.product_id == product.id) {
                    Some(v) => Some(v),
                    None => {
                        errors.push(format!("Product \"{label}\" is no longer available"));
                        is_valid = false;
                        continue;
                    }
                },
                None => None,
            };

            let stock = StockItem::of(&product, variant.as_ref());
            if !stock.has_stock(item.quantity) {
                errors.push(format!("Insufficient stock for \"{label}\""));
                is_valid = false;
            }
            if stock.price() != item.price {
                let mut updated = item.clone();
                updated.price = stock.price();
                updated.updated_at = Utc::now();
                self.store.update_cart_item(&updated).await?;
                errors.push(format!("Price updated for \"{label}\""));
                repriced = true;
            }
        }

        let updated_cart = if repriced { self.store.refresh_cart_totals(cart.id).await? } else { cart };
        Ok(CartValidation { is_valid, errors, updated_cart })
    }

    async fn owned_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(Cart, CartItem)> {
        let cart = self.store.find_cart(user_id).await?.ok_or_else(|| EcommerceError::not_found("Cart item"))?;
        let item = self
            .store
            .find_cart_item(item_id)
            .await?
            .filter(|i| i.cart_id == cart.id)
            .ok_or_else(|| EcommerceError::not_found("Cart item"))?;
        Ok((cart, item))
    }

    /// The product, and variant when requested, if both can be sold.
    pub(crate) async fn load_sellable(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<(Product, Option<ProductVariant>)> {
        let product = self
            .store
            .product(product_id)
            .await?
            .filter(Product::is_available)
            .ok_or_else(|| EcommerceError::not_found("Product"))?;
        let variant = match variant_id {
            Some(id) => Some(
                self.store
                    .variant(id)
                    .await?
                    .filter(|v| v.product_id == product_id)
                    .ok_or_else(|| EcommerceError::not_found("Product variant"))?,
            ),
            None => None,
        };
        Ok((product, variant))
    }
}
