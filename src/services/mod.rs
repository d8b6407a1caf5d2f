//! Application services
//!
//! Each service owns one slice of the storefront workflow and talks to storage
//! through the [`Store`] traits only.

pub mod cart;
pub mod discount;
pub mod orders;
pub mod payments;

pub use cart::CartService;
pub use discount::DiscountService;
pub use orders::OrderService;
pub use payments::PaymentService;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use validator::ValidationError;

use crate::config::PaymentConfig;
use crate::gateway::PaymentGateway;
use crate::publisher::EventPublisher;
use crate::store::Store;

/// All services, wired over one store, gateway and event publisher.
#[derive(Clone)]
pub struct Services {
    pub carts: CartService,
    pub discounts: DiscountService,
    pub orders: OrderService,
    pub payments: PaymentService,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventPublisher,
        config: PaymentConfig,
    ) -> Self {
        let discounts = DiscountService::new(store.clone(), events.clone());
        let carts = CartService::new(store.clone());
        let orders = OrderService::new(store.clone(), discounts.clone(), carts.clone(), events.clone());
        let payments = PaymentService::new(store, gateway, orders.clone(), events, config);
        Self { carts, discounts, orders, payments }
    }
}

pub(crate) fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

/// Tells an explicit `null` (`Some(None)`) apart from an absent field (`None`).
/// Pair with `#[serde(default)]`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
