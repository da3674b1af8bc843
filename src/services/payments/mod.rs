//! Payment intent broker and payment proof verification.

pub mod gateway;
pub mod verifier;

pub use gateway::{HttpPaymentGateway, IntentRequest, PaymentGateway, PaymentIntent};
pub use verifier::{PaymentVerifier, VerifiedPayment};

use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::payment_intent,
    errors::ServiceError,
    events::{Event, EventSender},
    services::cart::{self, cents_to_decimal},
};

const MAX_RECEIPT_LEN: usize = 40;

/// Converts a major-unit amount into integer minor units (x100), rounding
/// half away from zero. Non-positive amounts are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    let minor = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|value| value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|value| value.to_i64())
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is too large", amount)))?;

    if minor == 0 {
        return Err(ServiceError::ValidationError(format!(
            "amount {} is below the smallest currency unit",
            amount
        )));
    }
    Ok(minor)
}

fn generate_receipt() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("rcpt_{}", &id[..12])
}

/// Opens gateway-side payment intents in the configured settlement currency.
///
/// Gateway failures are returned as-is and never retried here; the client
/// may retry since no funds have moved.
#[derive(Clone)]
pub struct PaymentIntentBroker {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    currency: String,
    key_id: String,
}

impl PaymentIntentBroker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        currency: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            currency: currency.into(),
            key_id: key_id.into(),
        }
    }

    /// Public key the client passes to the gateway checkout widget.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    #[instrument(skip(self))]
    pub async fn create_intent(
        &self,
        amount_major: Decimal,
        receipt: Option<String>,
    ) -> Result<PaymentIntent, ServiceError> {
        let amount = to_minor_units(amount_major)?;

        let receipt = match receipt.map(|r| r.trim().to_string()) {
            Some(r) if r.len() > MAX_RECEIPT_LEN => {
                return Err(ServiceError::ValidationError(format!(
                    "receipt must be at most {} characters",
                    MAX_RECEIPT_LEN
                )))
            }
            Some(r) if !r.is_empty() => r,
            _ => generate_receipt(),
        };

        let request = IntentRequest {
            amount,
            currency: self.currency.clone(),
            receipt,
        };

        let intent = self.gateway.create_intent(&request).await.map_err(|e| {
            counter!("payments.intent_failures", 1);
            warn!(receipt = %request.receipt, "Intent creation failed: {}", e);
            match e {
                ServiceError::GatewayError(_) => e,
                other => ServiceError::GatewayError(other.to_string()),
            }
        })?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                intent_id: intent.id.clone(),
                amount_minor: intent.amount,
                currency: intent.currency.clone(),
            })
            .await;

        Ok(intent)
    }

    /// Opens an intent for the owner's current cart total and records it, so
    /// checkout can later confirm the payment covers what is being ordered.
    #[instrument(skip(self))]
    pub async fn create_cart_intent(
        &self,
        owner_id: Uuid,
        receipt: Option<String>,
    ) -> Result<PaymentIntent, ServiceError> {
        let due_cents = match cart::load_snapshot(&*self.db, owner_id).await? {
            Some(snapshot) if !snapshot.is_empty() => snapshot.total_cents()?,
            _ => {
                return Err(ServiceError::InvalidOperation(
                    "Cannot pay for an empty cart".to_string(),
                ))
            }
        };

        let intent = self.create_intent(cents_to_decimal(due_cents), receipt).await?;

        payment_intent::ActiveModel {
            id: Set(intent.id.clone()),
            owner_id: Set(owner_id),
            amount_minor: Set(intent.amount),
            currency: Set(intent.currency.clone()),
            receipt: Set(intent.receipt.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(%owner_id, intent_id = %intent.id, amount_minor = intent.amount, "Cart intent recorded");
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingGateway {
        requests: Mutex<Vec<IntentRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn create_intent(
            &self,
            request: &IntentRequest,
        ) -> Result<PaymentIntent, ServiceError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ServiceError::GatewayError("connection reset".into()));
            }
            Ok(PaymentIntent {
                id: "order_test".into(),
                amount: request.amount,
                currency: request.currency.clone(),
                receipt: request.receipt.clone(),
                status: Some("created".into()),
            })
        }
    }

    fn broker(gateway: Arc<RecordingGateway>) -> PaymentIntentBroker {
        let (tx, _rx) = mpsc::channel(8);
        PaymentIntentBroker::new(
            Arc::new(DatabaseConnection::Disconnected),
            gateway,
            Arc::new(EventSender::new(tx)),
            "INR",
            "rzp_key",
        )
    }

    #[test]
    fn converts_major_to_minor_units() {
        assert_eq!(to_minor_units(dec!(1299)).unwrap(), 129_900);
        assert_eq!(to_minor_units(dec!(19.99)).unwrap(), 1_999);
        assert_eq!(to_minor_units(dec!(0.015)).unwrap(), 2);
    }

    #[test]
    fn rejects_non_positive_and_sub_unit_amounts() {
        assert_matches!(to_minor_units(Decimal::ZERO), Err(ServiceError::ValidationError(_)));
        assert_matches!(to_minor_units(dec!(-5)), Err(ServiceError::ValidationError(_)));
        assert_matches!(to_minor_units(dec!(0.004)), Err(ServiceError::ValidationError(_)));
    }

    proptest! {
        #[test]
        fn two_decimal_amounts_convert_exactly(cents in 1i64..10_000_000_000) {
            let amount = Decimal::new(cents, 2);
            prop_assert_eq!(to_minor_units(amount).unwrap(), cents);
        }
    }

    #[tokio::test]
    async fn forwards_fixed_currency_and_minor_amount() {
        let gateway = Arc::new(RecordingGateway::default());
        let intent = broker(gateway.clone())
            .create_intent(dec!(450.50), Some("rcpt_42".into()))
            .await
            .unwrap();

        assert_eq!(intent.amount, 45_050);
        let requests = gateway.requests.lock().unwrap();
        assert_eq!(
            requests.as_slice(),
            &[IntentRequest {
                amount: 45_050,
                currency: "INR".into(),
                receipt: "rcpt_42".into(),
            }]
        );
    }

    #[tokio::test]
    async fn generates_receipt_when_missing() {
        let gateway = Arc::new(RecordingGateway::default());
        let intent = broker(gateway).create_intent(dec!(10), None).await.unwrap();
        assert!(intent.receipt.starts_with("rcpt_"));
        assert_eq!(intent.receipt.len(), 17);
    }

    #[tokio::test]
    async fn gateway_failure_is_surfaced_once() {
        let gateway = Arc::new(RecordingGateway {
            fail: true,
            ..Default::default()
        });
        assert_matches!(
            broker(gateway.clone()).create_intent(dec!(10), None).await,
            Err(ServiceError::GatewayError(_))
        );
        assert_eq!(gateway.requests.lock().unwrap().len(), 1);
    }
}
