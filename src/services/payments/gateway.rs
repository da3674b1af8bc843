use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Body sent to the gateway when opening an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentRequest {
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

/// Gateway-side pending payment. Never persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub id: String,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Third-party payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent. Any failure is a `GatewayError`.
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError>;
}

/// HTTP client for the gateway's order API (`POST {base}/v1/orders`, basic auth).
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    fn orders_url(&self) -> String {
        format!("{}/v1/orders", self.base_url)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount = request.amount))]
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .client
            .post(self.orders_url())
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                error!("Payment gateway request {}: {}", kind, e);
                ServiceError::GatewayError(format!("intent request {}: {}", kind, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Payment gateway rejected intent request");
            return Err(ServiceError::GatewayError(describe_rejection(status, &body)));
        }

        let intent: PaymentIntent = response.json().await.map_err(|e| {
            error!("Payment gateway returned an unreadable intent: {}", e);
            ServiceError::GatewayError(format!("malformed intent response: {}", e))
        })?;

        info!(intent_id = %intent.id, "Payment intent created");
        Ok(intent)
    }
}

fn describe_rejection(status: StatusCode, body: &str) -> String {
    let snippet: String = body.chars().take(200).collect();
    format!("gateway responded {}: {}", status, snippet)
}
