use crate::{
    entities::{
        cart, cart_item,
        product::{self, ProductKind},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{image_signing::ImageSigner, inventory},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Converts stored minor units into a two-decimal major-unit amount.
pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// A cart line joined with its live catalog entry.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub kind: ProductKind,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    /// Absent when the product has no image or signing failed
    pub image_url: Option<String>,
    pub available_stock: i32,
}

/// Cart as rendered to the owner. Totals are recomputed from live prices on every read.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub owner_id: Uuid,
    /// `None` until the first item is added
    pub cart_id: Option<Uuid>,
    pub items: Vec<CartLine>,
    pub item_count: i32,
    pub subtotal: Decimal,
}

impl CartView {
    fn empty(owner_id: Uuid) -> Self {
        Self {
            owner_id,
            cart_id: None,
            items: Vec::new(),
            item_count: 0,
            subtotal: Decimal::ZERO,
        }
    }
}

/// Cart contents as read inside a transaction, used by checkout.
#[derive(Debug, Clone)]
pub struct CartSnapshot {
    pub cart: cart::Model,
    pub lines: Vec<(cart_item::Model, product::Model)>,
}

impl CartSnapshot {
    /// Sum of every line at the snapshot's prices, in minor units.
    pub fn total_cents(&self) -> Result<i64, ServiceError> {
        self.lines
            .iter()
            .try_fold(0i64, |acc, (item, product)| {
                product
                    .price_cents
                    .checked_mul(i64::from(item.quantity))
                    .and_then(|line| acc.checked_add(line))
            })
            .ok_or_else(|| ServiceError::ValidationError("Cart total overflows".to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reads the owner's cart and its products through `conn`.
///
/// Items whose product has disappeared from the catalog are skipped.
pub async fn load_snapshot<C>(conn: &C, owner_id: Uuid) -> Result<Option<CartSnapshot>, ServiceError>
where
    C: ConnectionTrait,
{
    let Some(cart) = find_cart(conn, owner_id).await? else {
        return Ok(None);
    };

    let rows = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    let lines = rows
        .into_iter()
        .filter_map(|(item, product)| match product {
            Some(product) => Some((item, product)),
            None => {
                warn!(item_id = %item.id, product_id = %item.product_id, "Cart item references a missing product");
                None
            }
        })
        .collect();

    Ok(Some(CartSnapshot { cart, lines }))
}

async fn find_cart<C>(conn: &C, owner_id: Uuid) -> Result<Option<cart::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(cart::Entity::find()
        .filter(cart::Column::OwnerId.eq(owner_id))
        .one(conn)
        .await?)
}

/// Cart manager: the owner's mutable pre-purchase basket.
///
/// Stock is only checked here, never decremented; the order committer does
/// the authoritative decrement at purchase time.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    image_signer: Arc<dyn ImageSigner>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        image_signer: Arc<dyn ImageSigner>,
    ) -> Self {
        Self {
            db,
            event_sender,
            image_signer,
        }
    }

    /// Returns the owner's cart with product details and image URLs.
    /// An owner without a cart gets an empty view, not an error.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner_id: Uuid) -> Result<CartView, ServiceError> {
        let Some(snapshot) = load_snapshot(&*self.db, owner_id).await? else {
            return Ok(CartView::empty(owner_id));
        };

        let mut items = Vec::with_capacity(snapshot.lines.len());
        for (item, product) in snapshot.lines {
            let image_url = self.resolve_image(&product).await;
            let unit_price = cents_to_decimal(product.price_cents);
            items.push(CartLine {
                item_id: item.id,
                product_id: product.id,
                kind: product.kind,
                name: product.name,
                quantity: item.quantity,
                unit_price,
                line_total: unit_price * Decimal::from(item.quantity),
                image_url,
                available_stock: product.stock,
            });
        }

        let item_count = items.iter().map(|line| line.quantity).sum();
        let subtotal = items.iter().map(|line| line.line_total).sum();

        Ok(CartView {
            owner_id,
            cart_id: Some(snapshot.cart.id),
            items,
            item_count,
            subtotal,
        })
    }

    async fn resolve_image(&self, product: &product::Model) -> Option<String> {
        let key = product.image_key.as_deref()?;
        match self.image_signer.sign(key).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(product_id = %product.id, "Image URL unavailable: {}", e);
                None
            }
        }
    }

    /// Adds `quantity` units of a product, merging into an existing line.
    ///
    /// The stock check covers the merged quantity. The merge itself is a
    /// single upsert on (cart_id, product_id), so concurrent adds of the same
    /// product accumulate into one row.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let txn = self.db.begin().await?;

        let cart = self.find_or_create_cart(&txn, owner_id).await?;

        let existing_quantity = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .map(|item| item.quantity)
            .unwrap_or(0);

        let requested = existing_quantity
            .checked_add(quantity)
            .ok_or(ServiceError::InvalidQuantity(quantity))?;
        inventory::check_and_reserve(&txn, product_id, requested).await?;

        let now = Utc::now();
        let row = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        };

        cart_item::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([cart_item::Column::CartId, cart_item::Column::ProductId])
                    .value(
                        cart_item::Column::Quantity,
                        Expr::col((cart_item::Entity, cart_item::Column::Quantity)).add(quantity),
                    )
                    .value(cart_item::Column::UpdatedAt, Expr::value(now))
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        let item = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Cart item for product {} vanished after upsert",
                    product_id
                ))
            })?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                owner_id,
                product_id,
                quantity,
            })
            .await;

        info!(
            cart_id = %cart.id,
            item_id = %item.id,
            quantity = item.quantity,
            "Added item to cart"
        );
        Ok(item)
    }

    /// Replaces the quantity of one of the owner's cart items.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        owner_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let txn = self.db.begin().await?;

        let not_found = || ServiceError::NotFound(format!("Cart item {} not found", item_id));
        let cart = find_cart(&txn, owner_id).await?.ok_or_else(not_found)?;
        let item = cart_item::Entity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(not_found)?;

        inventory::check_and_reserve(&txn, item.product_id, quantity).await?;

        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.updated_at = Set(Utc::now());
        let item = item.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                owner_id,
                item_id,
                quantity,
            })
            .await;

        info!(item_id = %item_id, quantity, "Updated cart item quantity");
        Ok(item)
    }

    /// Deletes one of the owner's cart items. Missing items are not an error.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, owner_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let Some(cart) = find_cart(&*self.db, owner_id).await? else {
            return Ok(());
        };

        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::CartItemRemoved { owner_id, item_id })
                .await;
            info!(item_id = %item_id, "Removed cart item");
        }

        Ok(())
    }

    /// Empties the owner's cart. Calling it on an empty or missing cart is a no-op.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, owner_id: Uuid) -> Result<(), ServiceError> {
        let Some(cart) = find_cart(&*self.db, owner_id).await? else {
            return Ok(());
        };

        let removed = clear_items(&*self.db, cart.id).await?;
        if removed > 0 {
            self.event_sender
                .send_or_log(Event::CartCleared(owner_id))
                .await;
            info!(cart_id = %cart.id, removed, "Cleared cart");
        }

        Ok(())
    }

    /// Creates the owner's cart on first use. Racing creators resolve to the
    /// same row through the unique owner index.
    async fn find_or_create_cart<C>(&self, conn: &C, owner_id: Uuid) -> Result<cart::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        if let Some(cart) = find_cart(conn, owner_id).await? {
            return Ok(cart);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        cart::Entity::insert(cart)
            .on_conflict(
                OnConflict::column(cart::Column::OwnerId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        find_cart(conn, owner_id).await?.ok_or_else(|| {
            ServiceError::InternalError(format!("Cart for owner {} was not created", owner_id))
        })
    }
}

/// Deletes every item of a cart, returning how many rows went away.
pub async fn clear_items<C>(conn: &C, cart_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
