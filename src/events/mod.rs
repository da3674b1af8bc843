use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Events are notifications; the state change they describe has already happened.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted by the checkout pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        owner_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        owner_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        owner_id: Uuid,
        item_id: Uuid,
    },
    CartCleared(Uuid),

    // Payment events
    PaymentIntentCreated {
        intent_id: String,
        amount_minor: i64,
        currency: String,
    },
    PaymentVerified {
        intent_id: String,
        payment_id: String,
    },
    PaymentVerificationFailed {
        intent_id: String,
        payment_id: String,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        owner_id: Uuid,
        payment_id: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },

    /// Money moved but no order could be committed.
    ReconciliationRequired {
        reconciliation_id: Uuid,
        owner_id: Uuid,
        payment_id: String,
        product_id: Option<Uuid>,
        reason: String,
    },
    /// A retried checkout succeeded after its payment was flagged.
    ReconciliationResolved {
        payment_id: String,
        order_id: Uuid,
    },
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ReconciliationRequired {
                reconciliation_id,
                owner_id,
                payment_id,
                product_id,
                reason,
            } => {
                error!(
                    target: "reconciliation",
                    %reconciliation_id,
                    %owner_id,
                    payment_id = %payment_id,
                    product_id = ?product_id,
                    "Paid checkout needs manual reconciliation: {}",
                    reason
                );
            }
            Event::PaymentVerificationFailed {
                intent_id,
                payment_id,
            } => {
                warn!(
                    intent_id = %intent_id,
                    payment_id = %payment_id,
                    "Payment proof rejected"
                );
            }
            other => info!("Received event: {:?}", other),
        }
    }

    info!("Event channel closed; event processing loop finished");
}
