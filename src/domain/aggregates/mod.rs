//! Aggregates module
pub mod cart;
pub mod discount;
pub mod order;
pub mod payment;
pub mod product;

pub use cart::{Cart, CartItem, CartSummary, CartTotals, CartValidation};
pub use discount::{Discount, DiscountContext, DiscountRejection, DiscountType, DiscountUsage, DiscountValidation};
pub use order::{
    BillingAddress, CustomerSnapshot, NewOrder, Order, OrderDetails, OrderItem, OrderStats, OrderStatus, OrderTotals,
    PaymentMethod, PaymentMirror, PaymentStatus, ShippingAddress,
};
pub use payment::{GatewayStatus, Payment, PaymentInitialization, PaymentStats, Verification, VerificationOutcome};
pub use product::{Product, ProductStatus, ProductVariant, StockItem};
