use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::cart_item,
    errors::ServiceError,
    handlers::common::{created_response, no_content_response, success_response},
    AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    /// Must be a positive integer
    #[schema(example = 2)]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateItemRequest {
    /// Replacement quantity, must be a positive integer
    #[schema(example = 1)]
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemResponse {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

impl From<cart_item::Model> for CartItemResponse {
    fn from(model: cart_item::Model) -> Self {
        Self {
            id: model.id,
            cart_id: model.cart_id,
            product_id: model.product_id,
            quantity: model.quantity,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Get cart",
    description = "Return the caller's cart with product details and signed image URLs. An owner without a cart gets an empty cart.",
    responses(
        (status = 200, description = "Cart retrieved", body = crate::ApiResponse<crate::services::cart::CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.get_cart(auth_user.user_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart",
    summary = "Add item to cart",
    description = "Add a product to the caller's cart, merging with an existing line for the same product.",
    request_body = AddItemRequest,
    responses(
        (status = 201, description = "Item added", body = crate::ApiResponse<CartItemResponse>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state
        .services
        .cart
        .add_item(auth_user.user_id, payload.product_id, payload.quantity)
        .await?;
    Ok(created_response(CartItemResponse::from(item)))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/{item_id}",
    summary = "Update cart item quantity",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Quantity updated", body = crate::ApiResponse<CartItemResponse>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state
        .services
        .cart
        .update_item(auth_user.user_id, item_id, payload.quantity)
        .await?;
    Ok(success_response(CartItemResponse::from(item)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/{item_id}",
    summary = "Remove cart item",
    description = "Idempotent: removing a missing item succeeds.",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 204, description = "Item removed"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .cart
        .remove_item(auth_user.user_id, item_id)
        .await?;
    Ok(no_content_response())
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    summary = "Clear cart",
    description = "Idempotent: clearing an empty cart succeeds.",
    responses(
        (status = 204, description = "Cart cleared"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.cart.clear_cart(auth_user.user_id).await?;
    Ok(no_content_response())
}
