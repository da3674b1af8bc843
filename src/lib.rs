//! Plant checkout library
//!
//! Cart, payment and order pipeline for the plant storefront: inventory
//! checked carts, gateway payment intents, signed payment verification and
//! transactional order commits.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::{OpenApi, ToSchema};

use crate::auth::{auth_middleware, AuthService};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Authenticated checkout routes, mounted under `/api/v1`.
pub fn api_v1_routes(auth_service: Arc<AuthService>) -> Router<AppState> {
    use axum::routing::{post, put};

    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::carts::get_cart)
                .post(handlers::carts::add_item)
                .delete(handlers::carts::clear_cart),
        )
        .route(
            "/cart/:item_id",
            put(handlers::carts::update_item).delete(handlers::carts::remove_item),
        );

    let payments = Router::new()
        .route(
            "/payments/create-order",
            post(handlers::payments::create_intent),
        )
        .route("/payments/verify", post(handlers::payments::verify_payment));

    // `/orders/user` is a static segment and wins over `/orders/:id`
    let orders = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/user", get(handlers::orders::list_my_orders))
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).put(handlers::orders::update_order_status),
        );

    let admin = Router::new().route(
        "/admin/reconciliations",
        get(handlers::admin::list_reconciliations),
    );

    Router::new()
        .merge(cart)
        .merge(payments)
        .merge(orders)
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(auth_service, auth_middleware))
}

/// Full application router with the HTTP middleware stack.
pub fn build_router(state: AppState, auth_service: Arc<AuthService>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", api_v1_routes(auth_service))
        .layer(cors)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(crate::tracing::request_id_middleware))
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDocV1::openapi())
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        return if config.is_development() {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        };
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
