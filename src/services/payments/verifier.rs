use hmac::{Hmac, Mac};
use metrics::counter;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
};

type HmacSha256 = Hmac<Sha256>;

/// A gateway payment whose proof checked out. Only [`PaymentVerifier::verify`]
/// can construct one, so holding it means the signature was valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    intent_id: String,
    payment_id: String,
}

impl VerifiedPayment {
    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }
}

/// Checks gateway callback signatures: hex(HMAC-SHA256(secret, "intent|payment")).
#[derive(Clone)]
pub struct PaymentVerifier {
    secret: Arc<Vec<u8>>,
    event_sender: Arc<EventSender>,
}

impl fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentVerifier").finish_non_exhaustive()
    }
}

impl PaymentVerifier {
    pub fn new(secret: impl AsRef<[u8]>, event_sender: Arc<EventSender>) -> Self {
        Self {
            secret: Arc::new(secret.as_ref().to_vec()),
            event_sender,
        }
    }

    /// Hex signature the gateway is expected to send for this pair.
    pub fn expected_signature(&self, intent_id: &str, payment_id: &str) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
        mac.update(intent_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Validates a payment proof. A mismatch is final for this checkout attempt.
    #[instrument(skip(self, supplied_signature))]
    pub async fn verify(
        &self,
        intent_id: &str,
        payment_id: &str,
        supplied_signature: &str,
    ) -> Result<VerifiedPayment, ServiceError> {
        if intent_id.is_empty() || payment_id.is_empty() {
            return Err(ServiceError::ValidationError(
                "intent_id and payment_id are required".to_string(),
            ));
        }

        let expected = self.expected_signature(intent_id, payment_id)?;

        if !constant_time_eq(&expected, supplied_signature) {
            counter!("checkout.signature_mismatch", 1);
            warn!("Payment signature mismatch");
            self.event_sender
                .send_or_log(Event::PaymentVerificationFailed {
                    intent_id: intent_id.to_string(),
                    payment_id: payment_id.to_string(),
                })
                .await;
            return Err(ServiceError::SignatureMismatch);
        }

        self.event_sender
            .send_or_log(Event::PaymentVerified {
                intent_id: intent_id.to_string(),
                payment_id: payment_id.to_string(),
            })
            .await;
        info!("Payment signature verified");

        Ok(VerifiedPayment {
            intent_id: intent_id.to_string(),
            payment_id: payment_id.to_string(),
        })
    }
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
