use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::address, errors::ServiceError};

/// Shipping target frozen into an order at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

impl From<address::Model> for ShippingAddress {
    fn from(model: address::Model) -> Self {
        Self {
            full_name: model.full_name,
            street: model.street,
            city: model.city,
            state: model.state,
            postal_code: model.postal_code,
            country: model.country,
            phone: model.phone,
        }
    }
}

/// Source of shipping targets. Owner scoped: another owner's address is not found.
#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn shipping_address(
        &self,
        owner_id: Uuid,
        address_id: Uuid,
    ) -> Result<ShippingAddress, ServiceError>;
}

/// Reads addresses from the shared `addresses` table.
#[derive(Clone)]
pub struct DbAddressBook {
    db: Arc<DatabaseConnection>,
}

impl DbAddressBook {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AddressBook for DbAddressBook {
    async fn shipping_address(
        &self,
        owner_id: Uuid,
        address_id: Uuid,
    ) -> Result<ShippingAddress, ServiceError> {
        address::Entity::find_by_id(address_id)
            .filter(address::Column::OwnerId.eq(owner_id))
            .one(&*self.db)
            .await?
            .map(ShippingAddress::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))
    }
}
