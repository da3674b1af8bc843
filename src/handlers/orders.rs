use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::order_status::parse_status,
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 128))]
    pub intent_id: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
    /// Address book entry to ship to
    pub address_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// One of pending, processing, shipped, delivered, cancelled
    #[validate(length(min = 1))]
    #[schema(example = "shipped")]
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Place order",
    description = "Verify the payment proof and commit the caller's cart as an order. Replaying the same payment returns the existing order.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<crate::services::orders::OrderView>),
        (status = 400, description = "Signature mismatch, empty cart or invalid input", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Address not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment already used by another owner", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock or payment not matching the cart; reconciliation opened", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let services = &state.services;

    let verified = services
        .verifier
        .verify(&payload.intent_id, &payload.payment_id, &payload.signature)
        .await?;

    let shipping = services
        .address_book
        .shipping_address(auth_user.user_id, payload.address_id)
        .await?;

    let order = services
        .orders
        .commit(auth_user.user_id, &verified, shipping)
        .await?;

    Ok(created_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/user",
    summary = "List my orders",
    description = "The caller's orders, newest first.",
    responses(
        (status = 200, description = "Orders retrieved", body = crate::ApiResponse<Vec<crate::services::orders::OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.services.orders.list_for_owner(auth_user.user_id).await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = crate::ApiResponse<crate::services::orders::OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(id, auth_user.user_id, auth_user.is_admin())
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}",
    summary = "Update order status",
    description = "Admin only. Moves an order along pending, processing, shipped, delivered, or to cancelled.",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<crate::services::orders::OrderView>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed or concurrent update", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    auth_user.require_admin()?;
    validate_input(&payload)?;

    let new_status = parse_status(&payload.status)?;
    state
        .services
        .order_status
        .update_status(id, new_status)
        .await?;

    let order = state
        .services
        .orders
        .get_order(id, auth_user.user_id, true)
        .await?;
    Ok(success_response(order))
}
