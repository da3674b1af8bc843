use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    AppState,
};

/// The charged amount is always the caller's current cart total.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateIntentRequest {
    /// Optional merchant receipt; generated when absent
    #[validate(length(max = 40))]
    pub receipt: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateIntentResponse {
    /// Gateway-assigned intent id
    pub intent_id: String,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub status: Option<String>,
    /// Public key the client passes to the gateway checkout
    pub key_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 128))]
    pub intent_id: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub verified: bool,
    pub intent_id: String,
    pub payment_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/create-order",
    summary = "Create payment intent",
    description = "Open a gateway payment intent for the caller's cart total in the store currency. Safe to retry on gateway failure.",
    request_body = CreateIntentRequest,
    responses(
        (status = 201, description = "Intent created", body = crate::ApiResponse<CreateIntentResponse>),
        (status = 400, description = "Empty cart or invalid receipt", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let broker = &state.services.intents;
    let intent = broker
        .create_cart_intent(auth_user.user_id, payload.receipt)
        .await?;

    tracing::info!(owner_id = %auth_user.user_id, intent_id = %intent.id, "Payment intent issued");

    Ok(created_response(CreateIntentResponse {
        intent_id: intent.id,
        amount: intent.amount,
        currency: intent.currency,
        receipt: intent.receipt,
        status: intent.status,
        key_id: broker.key_id().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    summary = "Verify payment proof",
    description = "Check the gateway's signature over intent and payment ids. Placing the order re-verifies the proof.",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Signature valid", body = crate::ApiResponse<VerifyPaymentResponse>),
        (status = 400, description = "Signature mismatch or invalid input", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let verified = state
        .services
        .verifier
        .verify(&payload.intent_id, &payload.payment_id, &payload.signature)
        .await?;

    Ok(success_response(VerifyPaymentResponse {
        verified: true,
        intent_id: verified.intent_id().to_string(),
        payment_id: verified.payment_id().to_string(),
    }))
}
