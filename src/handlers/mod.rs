pub mod admin;
pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        address_book::{AddressBook, DbAddressBook},
        cart::CartService,
        image_signing::ImageSigner,
        order_status::OrderStatusService,
        orders::OrderService,
        payments::{PaymentGateway, PaymentIntentBroker, PaymentVerifier},
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub intents: Arc<PaymentIntentBroker>,
    pub verifier: Arc<PaymentVerifier>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub address_book: Arc<dyn AddressBook>,
}

impl AppServices {
    /// Wires every service from already-built clients.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        image_signer: Arc<dyn ImageSigner>,
        config: &AppConfig,
    ) -> Self {
        Self {
            cart: Arc::new(CartService::new(
                db_pool.clone(),
                event_sender.clone(),
                image_signer,
            )),
            intents: Arc::new(PaymentIntentBroker::new(
                db_pool.clone(),
                gateway,
                event_sender.clone(),
                config.payment_currency.clone(),
                config.payment_key_id.clone(),
            )),
            verifier: Arc::new(PaymentVerifier::new(
                config.payment_key_secret.as_bytes(),
                event_sender.clone(),
            )),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone())),
            order_status: Arc::new(OrderStatusService::new(db_pool.clone(), event_sender)),
            address_book: Arc::new(DbAddressBook::new(db_pool)),
        }
    }
}
