#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use plant_checkout::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{address, cart, cart_item, order, payment_intent, payment_reconciliation, product},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    services::{
        address_book::ShippingAddress,
        image_signing::DisabledImageSigner,
        orders::OrderView,
        payments::{IntentRequest, PaymentGateway, PaymentIntent, VerifiedPayment},
    },
    AppState,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub use product::ProductKind;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const GATEWAY_SECRET: &str = "gateway_test_secret_0123456789";

/// Gateway stand-in that accepts every intent.
pub struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError> {
        Ok(PaymentIntent {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: request.receipt.clone(),
            status: Some("created".to_string()),
        })
    }
}

/// Helper harness for an application backed by a throwaway SQLite file.
///
/// The pool holds a single connection, so concurrent callers queue on it
/// instead of hitting SQLite lock errors.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub config: AppConfig,
    pub auth: Arc<AuthService>,
    router: Router,
    events: Mutex<mpsc::Receiver<Event>>,
    db_path: PathBuf,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_path = std::env::temp_dir().join(format!("plant_checkout_{}.db", Uuid::new_v4()));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "http://127.0.0.1:9".to_string(),
            GATEWAY_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.payment_key_id = "rzp_test_key".to_string();
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = Arc::new(EventSender::new(event_tx));

        let services = AppServices::new(
            db.clone(),
            event_sender,
            Arc::new(StubGateway),
            Arc::new(DisabledImageSigner),
            &cfg,
        );

        let auth = Arc::new(AuthService::new(AuthConfig::from(&cfg)));

        let state = AppState {
            db: db.clone(),
            config: cfg.clone(),
            services: services.clone(),
        };
        let router = plant_checkout::build_router(state, auth.clone());

        Self {
            db,
            services,
            config: cfg,
            auth,
            router,
            events: Mutex::new(event_rx),
            db_path,
        }
    }

    pub async fn seed_product(&self, kind: ProductKind, name: &str, price_cents: i64, stock: i32) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            kind: Set(kind),
            name: Set(name.to_string()),
            description: Set(None),
            price_cents: Set(price_cents),
            stock: Set(stock),
            category_id: Set(None),
            image_key: Set(Some(format!("products/{}.jpg", id))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn seed_plant(&self, stock: i32) -> Uuid {
        self.seed_product(ProductKind::Plant, "Monstera Deliciosa", 129_900, stock)
            .await
    }

    pub async fn seed_address(&self, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        address::ActiveModel {
            id: Set(id),
            owner_id: Set(owner_id),
            full_name: Set("Asha Rao".to_string()),
            street: Set("12 MG Road".to_string()),
            city: Set("Bengaluru".to_string()),
            state: Set("Karnataka".to_string()),
            postal_code: Set("560001".to_string()),
            country: Set("IN".to_string()),
            phone: Set("+91 90000 00000".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed address");
        id
    }

    pub fn shipping_address(&self) -> ShippingAddress {
        ShippingAddress {
            full_name: "Asha Rao".to_string(),
            street: "12 MG Road".to_string(),
            city: "Bengaluru".to_string(),
            state: "Karnataka".to_string(),
            postal_code: "560001".to_string(),
            country: "IN".to_string(),
            phone: "+91 90000 00000".to_string(),
        }
    }

    pub async fn product(&self, product_id: Uuid) -> product::Model {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.product(product_id).await.stock
    }

    pub async fn set_stock(&self, product_id: Uuid, stock: i32) {
        let mut model: product::ActiveModel = self.product(product_id).await.into();
        model.stock = Set(stock);
        model.update(&*self.db).await.expect("update stock");
    }

    pub async fn set_price(&self, product_id: Uuid, price_cents: i64) {
        let mut model: product::ActiveModel = self.product(product_id).await.into();
        model.price_cents = Set(price_cents);
        model.update(&*self.db).await.expect("update price");
    }

    /// Cart rows the owner currently has.
    pub async fn cart_items_of(&self, owner_id: Uuid) -> Vec<cart_item::Model> {
        let Some(cart) = cart::Entity::find()
            .filter(cart::Column::OwnerId.eq(owner_id))
            .one(&*self.db)
            .await
            .expect("load cart")
        else {
            return Vec::new();
        };

        cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await
            .expect("load cart items")
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.db)
            .await
            .expect("count orders")
    }

    pub async fn reconciliations(&self) -> Vec<payment_reconciliation::Model> {
        payment_reconciliation::Entity::find()
            .all(&*self.db)
            .await
            .expect("load reconciliations")
    }

    /// Signature the gateway would send for this pair.
    pub fn sign(&self, intent_id: &str, payment_id: &str) -> String {
        self.services
            .verifier
            .expected_signature(intent_id, payment_id)
            .expect("sign payment")
    }

    /// Opens an intent for the owner's current cart and completes it as `payment_id`.
    pub async fn pay_for_cart(&self, owner_id: Uuid, payment_id: &str) -> VerifiedPayment {
        let intent = self
            .services
            .intents
            .create_cart_intent(owner_id, None)
            .await
            .expect("open cart intent");
        self.verified_payment(&intent.id, payment_id).await
    }

    /// Records an intent as if it had been issued to `owner_id` for `amount_minor`.
    pub async fn record_intent(&self, intent_id: &str, owner_id: Uuid, amount_minor: i64) {
        payment_intent::ActiveModel {
            id: Set(intent_id.to_string()),
            owner_id: Set(owner_id),
            amount_minor: Set(amount_minor),
            currency: Set("INR".to_string()),
            receipt: Set(format!("rcpt_{}", intent_id)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("record intent");
    }

    pub async fn execute_sql(&self, sql: &str) {
        self.db
            .execute_unprepared(sql)
            .await
            .expect("execute sql");
    }

    pub async fn verified_payment(&self, intent_id: &str, payment_id: &str) -> VerifiedPayment {
        let signature = self.sign(intent_id, payment_id);
        self.services
            .verifier
            .verify(intent_id, payment_id, &signature)
            .await
            .expect("valid proof")
    }

    /// Adds `quantity` of `product_id` and commits the cart under a fresh payment.
    pub async fn checkout(&self, owner_id: Uuid, product_id: Uuid, quantity: i32) -> Result<OrderView, ServiceError> {
        self.services
            .cart
            .add_item(owner_id, product_id, quantity)
            .await?;
        let payment = self
            .pay_for_cart(owner_id, &format!("pay_{}", Uuid::new_v4().simple()))
            .await;
        self.services
            .orders
            .commit(owner_id, &payment, self.shipping_address())
            .await
    }

    /// Events emitted so far, oldest first.
    pub fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().expect("event receiver lock");
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn token(&self, owner_id: Uuid) -> String {
        self.auth.generate_token(owner_id, &[]).expect("issue token")
    }

    pub fn admin_token(&self, owner_id: Uuid) -> String {
        self.auth
            .generate_token(owner_id, &["admin"])
            .expect("issue admin token")
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and returns the status with the decoded JSON body (Null when empty).
    pub async fn request_json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is json")
        };
        (status, value)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}
