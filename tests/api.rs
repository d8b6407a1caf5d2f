//! HTTP-level tests against the in-memory store and a scripted gateway.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use storefront::api::{self, AppState, USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
use storefront::config::PaymentConfig;
use storefront::domain::aggregates::{GatewayStatus, Product, ProductStatus, Verification};
use storefront::gateway::{Authorization, InitializeTransaction, PaymentGateway};
use storefront::publisher::EventPublisher;
use storefront::services::Services;
use storefront::store::MemoryStore;
use storefront::{EcommerceError, Result};

#[derive(Default)]
struct ScriptedGateway {
    verification: Mutex<Option<Verification>>,
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initialize_transaction(&self, request: &InitializeTransaction) -> Result<Authorization> {
        Ok(Authorization {
            authorization_url: format!("https://checkout.test/{}", request.metadata.order_number),
            access_code: None,
            reference: format!("ref-{}", request.metadata.order_id),
        })
    }

    async fn verify_transaction(&self, _reference: &str) -> Result<Verification> {
        self.verification
            .lock()
            .unwrap()
            .clone()
            .ok_or(EcommerceError::ExternalService { message: "Payment gateway timed out".into(), retryable: true })
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    gateway: Arc<ScriptedGateway>,
}

fn app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::default());
    let services = Services::new(store.clone(), gateway.clone(), EventPublisher::disabled(), PaymentConfig::default());
    TestApp { router: api::router(AppState { services }), store, gateway }
}

#[derive(Clone, Copy)]
enum Caller {
    Anonymous,
    Shopper(Uuid),
    Admin(Uuid),
}

async fn send(app: &TestApp, method: Method, uri: &str, caller: Caller, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    match caller {
        Caller::Anonymous => {}
        Caller::Shopper(id) => {
            builder = builder.header(USER_ID_HEADER, id.to_string()).header(USER_EMAIL_HEADER, "shopper@example.com");
        }
        Caller::Admin(id) => {
            builder = builder.header(USER_ID_HEADER, id.to_string()).header(USER_ROLE_HEADER, "ADMIN");
        }
    }
    let request = match body {
        Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

async fn seed_product(app: &TestApp, price: Decimal, quantity: i32) -> Product {
    let product = Product {
        id: Uuid::now_v7(), name: "Widget".into(), sku: format!("W-{}", Uuid::now_v7().simple()), price,
        compare_price: None, status: ProductStatus::Active, track_quantity: true, quantity, category_id: None,
        image_url: None, deleted_at: None,
    };
    app.store.put_product(product.clone()).await;
    product
}

fn order_body(method: &str) -> Value {
    json!({
        "items": [{ "productId": Uuid::now_v7(), "productName": "Widget", "productSku": "W-1", "price": "25.00", "quantity": 2 }],
        "customerFirstName": "Ada",
        "customerLastName": "Lovelace",
        "shippingAddress": {
            "firstName": "Ada", "lastName": "Lovelace", "addressLine1": "1 Analytical Way", "city": "Lagos",
            "state": "LA", "postalCode": "100001", "country": "NG"
        },
        "paymentMethod": method,
        "shippingAmount": "5.00"
    })
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", Caller::Anonymous, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_identity_is_required() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/cart", Caller::Anonymous, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");

    let (status, body) = send(&app, Method::GET, "/orders", Caller::Shopper(Uuid::now_v7()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");
}

#[tokio::test]
async fn test_cart_flow() {
    let app = app();
    let user = Caller::Shopper(Uuid::now_v7());
    let a = seed_product(&app, Decimal::new(1000, 2), 10).await;
    let b = seed_product(&app, Decimal::new(1000, 2), 10).await;

    let (status, _) = send(&app, Method::POST, "/cart/items", user, Some(json!({ "productId": a.id, "quantity": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, cart) = send(&app, Method::POST, "/cart/items", user, Some(json!({ "productId": b.id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["itemsCount"], 3);
    assert_eq!(money(&cart["totalAmount"]), Decimal::new(3000, 2));

    let (_, count) = send(&app, Method::GET, "/cart/count", user, None).await;
    assert_eq!(count["count"], 3);

    let (status, body) = send(&app, Method::POST, "/cart/items", user, Some(json!({ "productId": a.id, "quantity": 0 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, body) = send(&app, Method::POST, "/cart/items", user, Some(json!({ "productId": Uuid::now_v7() }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Product not found");

    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();
    let (status, cart) = send(&app, Method::DELETE, &format!("/cart/items/{item_id}"), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_discount_admin_and_validation() {
    let app = app();
    let admin = Caller::Admin(Uuid::now_v7());
    let create = json!({ "code": "save10", "name": "Ten off", "type": "PERCENTAGE", "value": 10, "maxDiscountAmount": 15 });

    let (status, _) = send(&app, Method::POST, "/discount", Caller::Shopper(Uuid::now_v7()), Some(create.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, created) = send(&app, Method::POST, "/discount", admin, Some(create.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["code"], "SAVE10");
    let (status, _) = send(&app, Method::POST, "/discount", admin, Some(create)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let shopper = Caller::Shopper(Uuid::now_v7());
    let (status, result) = send(&app, Method::POST, "/discount/validate", shopper, Some(json!({ "code": "SAVE10", "orderAmount": 200 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["isValid"], true);
    assert_eq!(money(&result["discountAmount"]), Decimal::new(15, 0));
    assert_eq!(money(&result["finalAmount"]), Decimal::new(185, 0));

    let id = created["id"].as_str().unwrap();
    let (status, _) = send(&app, Method::PUT, &format!("/discount/{id}/deactivate"), admin, None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, result) = send(&app, Method::POST, "/discount/validate", shopper, Some(json!({ "code": "SAVE10", "orderAmount": 200 }))).await;
    assert_eq!(result["isValid"], false);
    assert_eq!(result["message"], "Discount not found or expired");
}

#[tokio::test]
async fn test_card_order_without_billing_is_rejected() {
    let app = app();
    let user = Caller::Shopper(Uuid::now_v7());
    let (status, body) = send(&app, Method::POST, "/orders", user, Some(order_body("CREDIT_CARD"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");

    let (_, page) = send(&app, Method::GET, "/orders/my", user, None).await;
    assert_eq!(page["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_order_payment_round_trip() {
    let app = app();
    let shopper_id = Uuid::now_v7();
    let user = Caller::Shopper(shopper_id);
    let admin = Caller::Admin(Uuid::now_v7());

    let (status, order) = send(&app, Method::POST, "/orders", user, Some(order_body("PAYSTACK"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["orderNumber"], "ORD-0001");
    assert_eq!(order["customer"]["email"], "shopper@example.com");
    assert_eq!(money(&order["totalAmount"]), Decimal::new(5500, 2));
    let order_id = order["id"].as_str().unwrap().to_string();

    let initialize = format!("/payment/orders/{order_id}/initialize");
    let (status, _) = send(&app, Method::POST, &initialize, Caller::Shopper(Uuid::now_v7()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, init) = send(&app, Method::POST, &initialize, user, None).await;
    assert_eq!(status, StatusCode::OK);
    let reference = init["reference"].as_str().unwrap().to_string();

    // the gateway times out: retryable and nothing changes
    let (status, body) = send(&app, Method::POST, &format!("/payment/verify/{reference}"), user, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "EXTERNAL_SERVICE_ERROR");

    *app.gateway.verification.lock().unwrap() =
        Some(Verification { status: GatewayStatus::Success, transaction_id: Some("TX-77".into()), gateway_response: Some("Approved".into()) });
    let (status, _) = send(&app, Method::POST, &format!("/payment/verify/{reference}"), Caller::Anonymous, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, verified) = send(&app, Method::POST, &format!("/payment/verify/{reference}"), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["payment"]["status"], "COMPLETED");
    assert_eq!(verified["payment"]["transactionId"], "TX-77");
    assert_eq!(verified["verification"], json!({ "status": "success", "transactionId": "TX-77", "gatewayResponse": "Approved" }));

    let (_, details) = send(&app, Method::GET, "/orders/ORD-0001", user, None).await;
    assert_eq!(details["status"], "CONFIRMED");
    assert_eq!(details["paymentStatus"], "COMPLETED");
    assert_eq!(details["payments"].as_array().map(Vec::len), Some(1));

    let (status, _) = send(&app, Method::GET, "/orders/ORD-0001", Caller::Shopper(Uuid::now_v7()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, cancelled) =
        send(&app, Method::PATCH, &format!("/orders/my/{order_id}/cancel"), user, Some(json!({ "reason": "too slow" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");
    assert_eq!(cancelled["internalNote"], "Cancelled: too slow");

    let (status, body) = send(&app, Method::PATCH, &format!("/orders/{order_id}/cancel"), admin, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Order cannot be cancelled at this stage");

    let (status, stats) = send(&app, Method::GET, "/payment/stats?timeframe=day", admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["successfulPayments"], 1);
    assert_eq!(money(&stats["totalRevenue"]), Decimal::new(5500, 2));
}

#[tokio::test]
async fn test_checkout_clears_cart() {
    let app = app();
    let user = Caller::Shopper(Uuid::now_v7());
    let product = seed_product(&app, Decimal::new(1250, 2), 5).await;
    send(&app, Method::POST, "/cart/items", user, Some(json!({ "productId": product.id, "quantity": 2 }))).await;

    let mut body = order_body("BANK_TRANSFER");
    body.as_object_mut().unwrap().remove("items");
    let (status, order) = send(&app, Method::POST, "/orders/checkout", user, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(money(&order["subtotal"]), Decimal::new(2500, 2));
    assert_eq!(order["items"][0]["productSku"], product.sku.as_str());

    let (_, count) = send(&app, Method::GET, "/cart/count", user, None).await;
    assert_eq!(count["count"], 0);
}
