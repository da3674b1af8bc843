// Checkout pipeline
pub mod cart;
pub mod inventory;
pub mod orders;
pub mod payments;

// Post-purchase lifecycle
pub mod order_status;

// Collaborators consumed by the pipeline
pub mod address_book;
pub mod image_signing;
