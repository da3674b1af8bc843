mod common;

use axum::http::{Method, Request, StatusCode};
use common::TestApp;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

#[tokio::test]
async fn health_needs_no_token() {
    let app = TestApp::new().await;

    let (status, body) = app.request_json(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn api_routes_require_a_token() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request_json(Method::GET, "/api/v1/cart", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "auth_missing_token");

    let (status, body) = app
        .request_json(Method::GET, "/api/v1/orders/user", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "auth_invalid_token");
}

#[tokio::test]
async fn cart_to_order_over_http() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token(owner);
    let plant = app.seed_plant(5).await;
    let address = app.seed_address(owner).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/cart",
            Some(json!({ "product_id": plant, "quantity": 3 })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["quantity"], 3);

    let (status, body) = app
        .request_json(Method::GET, "/api/v1/cart", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["item_count"], 3);

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/payments/create-order",
            Some(json!({ "receipt": "rcpt_1" })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["amount"], 389_700);
    assert_eq!(body["data"]["receipt"], "rcpt_1");
    assert_eq!(body["data"]["key_id"], "rzp_test_key");
    let intent_id = body["data"]["intent_id"].as_str().unwrap().to_string();

    let signature = app.sign(&intent_id, "pay_http");
    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "intent_id": intent_id,
                "payment_id": "pay_http",
                "signature": signature,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verified"], true);

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "intent_id": intent_id,
                "payment_id": "pay_http",
                "signature": signature,
                "address_id": address,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["items"][0]["quantity"], 3);
    assert_eq!(body["data"]["shipping_address"]["city"], "Bengaluru");
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    assert_eq!(app.stock_of(plant).await, 2);

    let (status, body) = app
        .request_json(Method::GET, "/api/v1/orders/user", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], order_id.as_str());

    let (status, _) = app
        .request_json(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&app.token(Uuid::new_v4())),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn intent_amount_comes_from_the_cart() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token(owner);
    let plant = app.seed_plant(10).await;

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/payments/create-order",
            Some(json!({ "amount": "0.01" })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_operation");

    app.services.cart.add_item(owner, plant, 5).await.unwrap();
    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/payments/create-order",
            Some(json!({ "amount": "0.01" })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["amount"], 649_500);
    assert!(body["data"]["receipt"].as_str().unwrap().starts_with("rcpt_"));
}

#[tokio::test]
async fn cart_item_routes_update_and_delete() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token(owner);
    let plant = app.seed_plant(5).await;

    let (_, body) = app
        .request_json(
            Method::POST,
            "/api/v1/cart",
            Some(json!({ "product_id": plant, "quantity": 1 })),
            Some(&token),
        )
        .await;
    let item_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/cart/{}", item_id),
            Some(json!({ "quantity": 4 })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quantity"], 4);

    let (status, body) = app
        .request_json(
            Method::PUT,
            &format!("/api/v1/cart/{}", item_id),
            Some(json!({ "quantity": 9 })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_stock");

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/cart",
            Some(json!({ "product_id": plant, "quantity": 0 })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_quantity");

    let (status, _) = app
        .request_json(
            Method::DELETE,
            &format!("/api/v1/cart/{}", item_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request_json(Method::DELETE, "/api/v1/cart", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.cart_items_of(owner).await.is_empty());
}

#[tokio::test]
async fn tampered_signature_is_rejected_over_http() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token(owner);
    let plant = app.seed_plant(5).await;
    let address = app.seed_address(owner).await;
    app.services.cart.add_item(owner, plant, 1).await.unwrap();

    let (status, body) = app
        .request_json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "intent_id": "order_x",
                "payment_id": "pay_x",
                "signature": "00".repeat(32),
                "address_id": address,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "signature_mismatch");
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.stock_of(plant).await, 5);
}

#[tokio::test]
async fn foreign_address_is_not_found() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token(owner);
    let plant = app.seed_plant(5).await;
    let someone_elses = app.seed_address(Uuid::new_v4()).await;
    app.services.cart.add_item(owner, plant, 1).await.unwrap();

    let (status, _) = app
        .request_json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "intent_id": "order_a",
                "payment_id": "pay_a",
                "signature": app.sign("order_a", "pay_a"),
                "address_id": someone_elses,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn status_updates_are_admin_only() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let plant = app.seed_plant(5).await;
    let order = app.checkout(owner, plant, 1).await.unwrap();
    let uri = format!("/api/v1/orders/{}", order.id);
    let admin = app.admin_token(Uuid::new_v4());

    let (status, _) = app
        .request_json(
            Method::PUT,
            &uri,
            Some(json!({ "status": "processing" })),
            Some(&app.token(owner)),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request_json(
            Method::PUT,
            &uri,
            Some(json!({ "status": "Processing" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "processing");

    let (status, body) = app
        .request_json(
            Method::PUT,
            &uri,
            Some(json!({ "status": "teleported" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = app
        .request_json(
            Method::PUT,
            &uri,
            Some(json!({ "status": "pending" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(body["details"]["from"], "processing");
    assert_eq!(body["details"]["to"], "pending");
}

#[tokio::test]
async fn reconciliations_are_admin_only() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request_json(
            Method::GET,
            "/api/v1/admin/reconciliations",
            None,
            Some(&app.token(Uuid::new_v4())),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request_json(
            Method::GET,
            "/api/v1/admin/reconciliations?open_only=false",
            None,
            Some(&app.admin_token(Uuid::new_v4())),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request_json(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/orders"].is_object());
    assert!(body["components"]["securitySchemes"]["Bearer"].is_object());
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::new().await;

    let generated = app.request(Method::GET, "/health", None, None).await;
    assert!(generated.headers().contains_key("x-request-id"));

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/cart")
        .header("x-request-id", "trace-me-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-me-123"
    );
}
