use crate::{
    entities::{
        order::{self, OrderStatus},
        order_item, payment_intent, payment_reconciliation,
        product::ProductKind,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        address_book::ShippingAddress,
        cart::{self, cents_to_decimal, CartSnapshot},
        inventory,
        payments::VerifiedPayment,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub kind: ProductKind,
    pub name: String,
    /// Price at purchase time
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemView {
    fn from(model: order_item::Model) -> Self {
        let unit_price = cents_to_decimal(model.unit_price_cents);
        Self {
            id: model.id,
            product_id: model.product_id,
            kind: model.product_kind,
            name: model.name,
            unit_price,
            quantity: model.quantity,
            line_total: unit_price * Decimal::from(model.quantity),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub payment_id: String,
    pub intent_id: String,
    pub status: OrderStatus,
    pub shipping_address: ShippingAddress,
    pub total: Decimal,
    pub items: Vec<OrderItemView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    fn from_parts(
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<Self, ServiceError> {
        let shipping_address: ShippingAddress = serde_json::from_value(order.shipping_address)
            .map_err(|e| {
                ServiceError::InternalError(format!(
                    "Order {} has an unreadable shipping address: {}",
                    order.id, e
                ))
            })?;

        Ok(Self {
            id: order.id,
            owner_id: order.owner_id,
            payment_id: order.payment_id,
            intent_id: order.intent_id,
            status: order.status,
            shipping_address,
            total: cents_to_decimal(order.total_cents),
            items: items.into_iter().map(OrderItemView::from).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}

/// Open or resolved case of a paid checkout that produced no order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub intent_id: String,
    pub payment_id: String,
    pub product_id: Option<Uuid>,
    pub reason: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl From<payment_reconciliation::Model> for ReconciliationView {
    fn from(model: payment_reconciliation::Model) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            intent_id: model.intent_id,
            payment_id: model.payment_id,
            product_id: model.product_id,
            reason: model.reason,
            resolved: model.resolved,
            created_at: model.created_at,
        }
    }
}

enum CommitOutcome {
    Created {
        view: OrderView,
        /// Reconciliation cases this payment had open before it succeeded
        settled_cases: u64,
    },
    Replayed(OrderView),
}

/// Order committer: turns the owner's cart plus a verified payment into an
/// order, and serves committed orders back.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Commits the owner's current cart as an order paid by `payment`.
    ///
    /// The payment's recorded intent must be the owner's and charge exactly
    /// the cart total. Stock validation, stock decrement, the order and its
    /// item snapshots and clearing the cart all happen in one transaction.
    /// A stock shortfall or an amount mismatch rolls everything back and
    /// opens a reconciliation case, since the customer has already paid. A
    /// later successful retry of the same payment closes that case.
    ///
    /// Committing the same payment twice returns the first order.
    #[instrument(skip(self, payment, shipping), fields(payment_id = %payment.payment_id()))]
    pub async fn commit(
        &self,
        owner_id: Uuid,
        payment: &VerifiedPayment,
        shipping: ShippingAddress,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;

        let outcome = match commit_in_txn(&txn, owner_id, payment, &shipping).await {
            Ok(outcome) => {
                txn.commit().await?;
                outcome
            }
            Err(e) => {
                txn.rollback().await?;
                return self.handle_commit_failure(owner_id, payment, e).await;
            }
        };

        match outcome {
            CommitOutcome::Replayed(view) => {
                info!(order_id = %view.id, "Payment already committed; returning existing order");
                Ok(view)
            }
            CommitOutcome::Created {
                view,
                settled_cases,
            } => {
                counter!("checkout.orders_committed", 1);
                if settled_cases > 0 {
                    info!(
                        target: "reconciliation",
                        order_id = %view.id,
                        payment_id = %view.payment_id,
                        "Retried checkout succeeded; reconciliation closed"
                    );
                    self.event_sender
                        .send_or_log(Event::ReconciliationResolved {
                            payment_id: view.payment_id.clone(),
                            order_id: view.id,
                        })
                        .await;
                }
                self.event_sender
                    .send_or_log(Event::OrderCreated {
                        order_id: view.id,
                        owner_id,
                        payment_id: view.payment_id.clone(),
                    })
                    .await;
                info!(
                    order_id = %view.id,
                    items = view.items.len(),
                    total = %view.total,
                    "Order committed"
                );
                Ok(view)
            }
        }
    }

    async fn handle_commit_failure(
        &self,
        owner_id: Uuid,
        payment: &VerifiedPayment,
        err: ServiceError,
    ) -> Result<OrderView, ServiceError> {
        let needs_reconciliation = match &err {
            ServiceError::InsufficientStock { product_id, .. } => Some(Some(*product_id)),
            ServiceError::PaymentMismatch { .. } => Some(None),
            _ => None,
        };
        if let Some(product_id) = needs_reconciliation {
            if let Err(record_err) = self
                .open_reconciliation(owner_id, payment, product_id, &err.to_string())
                .await
            {
                counter!("checkout.reconciliation_record_failures", 1);
                error!(
                    target: "reconciliation",
                    %owner_id,
                    payment_id = %payment.payment_id(),
                    "Paid checkout failed ({}) and its reconciliation could not be recorded: {}",
                    err,
                    record_err
                );
            }
            return Err(err);
        }

        // A concurrent commit of the same payment won the unique index.
        if is_unique_violation(&err) {
            warn!("Concurrent commit detected for the same payment");
            if let Some(view) = find_by_payment(&*self.db, owner_id, payment.payment_id()).await? {
                return Ok(view);
            }
        }

        Err(err)
    }

    /// Records the failed paid checkout. A payment keeps a single case no
    /// matter how many times its checkout is retried.
    async fn open_reconciliation(
        &self,
        owner_id: Uuid,
        payment: &VerifiedPayment,
        product_id: Option<Uuid>,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let reconciliation_id = Uuid::new_v4();
        let record = payment_reconciliation::ActiveModel {
            id: Set(reconciliation_id),
            owner_id: Set(owner_id),
            intent_id: Set(payment.intent_id().to_string()),
            payment_id: Set(payment.payment_id().to_string()),
            product_id: Set(product_id),
            reason: Set(reason.to_string()),
            resolved: Set(false),
            created_at: Set(Utc::now()),
        };

        let inserted = payment_reconciliation::Entity::insert(record)
            .on_conflict(
                OnConflict::column(payment_reconciliation::Column::PaymentId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        if inserted == 0 {
            warn!(
                target: "reconciliation",
                %owner_id,
                payment_id = %payment.payment_id(),
                "Retried checkout failed again; reconciliation already on file: {}",
                reason
            );
            return Ok(());
        }

        counter!("checkout.reconciliation_required", 1);
        error!(
            target: "reconciliation",
            %reconciliation_id,
            %owner_id,
            payment_id = %payment.payment_id(),
            "Paid checkout could not be committed: {}",
            reason
        );

        self.event_sender
            .send_or_log(Event::ReconciliationRequired {
                reconciliation_id,
                owner_id,
                payment_id: payment.payment_id().to_string(),
                product_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(())
    }

    /// Fetches an order with its items. Other owners' orders are reported as
    /// missing unless the requester is an admin.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester: Uuid,
        is_admin: bool,
    ) -> Result<OrderView, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Order {} not found", order_id));

        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(not_found)?;

        if order.owner_id != requester && !is_admin {
            return Err(not_found());
        }

        load_view(&*self.db, order).await
    }

    /// The owner's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::OwnerId.eq(owner_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            views.push(load_view(&*self.db, order).await?);
        }
        Ok(views)
    }

    /// Reconciliation cases, oldest first. `open_only` hides resolved ones.
    #[instrument(skip(self))]
    pub async fn list_reconciliations(
        &self,
        open_only: bool,
    ) -> Result<Vec<ReconciliationView>, ServiceError> {
        let mut query = payment_reconciliation::Entity::find();
        if open_only {
            query = query.filter(payment_reconciliation::Column::Resolved.eq(false));
        }

        let rows = query
            .order_by_asc(payment_reconciliation::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(rows.into_iter().map(ReconciliationView::from).collect())
    }
}

async fn commit_in_txn(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
    payment: &VerifiedPayment,
    shipping: &ShippingAddress,
) -> Result<CommitOutcome, ServiceError> {
    if let Some(existing) = find_by_payment(txn, owner_id, payment.payment_id()).await? {
        return Ok(CommitOutcome::Replayed(existing));
    }

    let snapshot = match cart::load_snapshot(txn, owner_id).await? {
        Some(snapshot) if !snapshot.is_empty() => snapshot,
        _ => {
            return Err(ServiceError::InvalidOperation(
                "Cannot check out an empty cart".to_string(),
            ))
        }
    };

    let total_cents = snapshot.total_cents()?;
    ensure_payment_covers(txn, owner_id, payment, total_cents).await?;

    // Every line is validated before the first decrement.
    for (item, product) in &snapshot.lines {
        inventory::ensure_available(product.id, product.stock, item.quantity)?;
    }
    for (product_id, quantity) in decrement_plan(&snapshot) {
        inventory::decrement_stock(txn, product_id, quantity).await?;
    }
    let shipping_json = serde_json::to_value(shipping)
        .map_err(|e| ServiceError::InternalError(format!("Unable to encode address: {}", e)))?;

    let now = Utc::now();
    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        payment_id: Set(payment.payment_id().to_string()),
        intent_id: Set(payment.intent_id().to_string()),
        status: Set(OrderStatus::Pending),
        shipping_address: Set(shipping_json),
        total_cents: Set(total_cents),
        created_at: Set(now),
        updated_at: Set(now),
        version: Set(1),
    }
    .insert(txn)
    .await?;

    let mut items = Vec::with_capacity(snapshot.lines.len());
    for (item, product) in &snapshot.lines {
        let order_item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            product_kind: Set(product.kind),
            name: Set(product.name.clone()),
            unit_price_cents: Set(product.price_cents),
            quantity: Set(item.quantity),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;
        items.push(order_item);
    }

    cart::clear_items(txn, snapshot.cart.id).await?;

    let settled_cases = payment_reconciliation::Entity::update_many()
        .col_expr(payment_reconciliation::Column::Resolved, Expr::value(true))
        .filter(payment_reconciliation::Column::PaymentId.eq(payment.payment_id()))
        .filter(payment_reconciliation::Column::Resolved.eq(false))
        .exec(txn)
        .await?
        .rows_affected;

    Ok(CommitOutcome::Created {
        view: OrderView::from_parts(order, items)?,
        settled_cases,
    })
}

/// Checks that the payment's intent was issued to `owner_id` for exactly
/// `due_minor`.
async fn ensure_payment_covers<C>(
    conn: &C,
    owner_id: Uuid,
    payment: &VerifiedPayment,
    due_minor: i64,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let paid_minor = payment_intent::Entity::find_by_id(payment.intent_id().to_string())
        .one(conn)
        .await?
        .filter(|intent| intent.owner_id == owner_id)
        .map(|intent| intent.amount_minor);

    if paid_minor == Some(due_minor) {
        return Ok(());
    }

    warn!(
        intent_id = %payment.intent_id(),
        ?paid_minor,
        due_minor,
        "Payment does not match the cart total"
    );
    Err(ServiceError::PaymentMismatch {
        intent_id: payment.intent_id().to_string(),
        paid_minor,
        due_minor,
    })
}

/// Stock decrements in product id order. Concurrent checkouts then lock
/// product rows in the same order and cannot deadlock each other.
fn decrement_plan(snapshot: &CartSnapshot) -> Vec<(Uuid, i32)> {
    let mut plan: Vec<(Uuid, i32)> = snapshot
        .lines
        .iter()
        .map(|(item, product)| (product.id, item.quantity))
        .collect();
    plan.sort_unstable_by_key(|(product_id, _)| *product_id);
    plan
}

fn is_unique_violation(err: &ServiceError) -> bool {
    matches!(
        err,
        ServiceError::DatabaseError(db_err)
            if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
    )
}

/// Looks up the order already committed for `payment_id`. An order paid by
/// that payment under a different owner is a conflict.
async fn find_by_payment<C>(
    conn: &C,
    owner_id: Uuid,
    payment_id: &str,
) -> Result<Option<OrderView>, ServiceError>
where
    C: ConnectionTrait,
{
    let Some(order) = order::Entity::find()
        .filter(order::Column::PaymentId.eq(payment_id))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    if order.owner_id != owner_id {
        warn!(order_id = %order.id, "Payment already bound to another owner's order");
        return Err(ServiceError::Conflict(format!(
            "Payment {} is already attached to another order",
            payment_id
        )));
    }

    load_view(conn, order).await.map(Some)
}

async fn load_view<C>(conn: &C, order: order::Model) -> Result<OrderView, ServiceError>
where
    C: ConnectionTrait,
{
    let items = order
        .find_related(order_item::Entity)
        .order_by_asc(order_item::Column::CreatedAt)
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?;
    OrderView::from_parts(order, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{cart as cart_entity, cart_item, product};
    use rust_decimal_macros::dec;

    fn line(price_cents: i64, quantity: i32) -> (cart_item::Model, product::Model) {
        let now = Utc::now();
        let product_id = Uuid::new_v4();
        (
            cart_item::Model {
                id: Uuid::new_v4(),
                cart_id: Uuid::nil(),
                product_id,
                quantity,
                created_at: now,
                updated_at: now,
            },
            product::Model {
                id: product_id,
                kind: ProductKind::Plant,
                name: "Fiddle Leaf Fig".into(),
                description: None,
                price_cents,
                stock: 10,
                category_id: None,
                image_key: None,
                created_at: now,
                updated_at: now,
            },
        )
    }

    fn snapshot(lines: Vec<(cart_item::Model, product::Model)>) -> CartSnapshot {
        let now = Utc::now();
        CartSnapshot {
            cart: cart_entity::Model {
                id: Uuid::nil(),
                owner_id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
            },
            lines,
        }
    }

    #[test]
    fn decrements_follow_product_id_order() {
        let lines = vec![line(1_299, 3), line(450, 2), line(999, 1)];
        let mut expected: Vec<(Uuid, i32)> = lines
            .iter()
            .map(|(item, product)| (product.id, item.quantity))
            .collect();
        expected.sort();

        let forward = snapshot(lines.clone());
        let mut reversed_lines = lines;
        reversed_lines.reverse();
        let reversed = snapshot(reversed_lines);

        assert_eq!(decrement_plan(&forward), expected);
        assert_eq!(decrement_plan(&reversed), expected);
    }

    #[test]
    fn item_view_uses_snapshot_price() {
        let view = OrderItemView::from(order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_kind: ProductKind::Product,
            name: "Terracotta Pot".into(),
            unit_price_cents: 2_550,
            quantity: 2,
            created_at: Utc::now(),
        });
        assert_eq!(view.unit_price, dec!(25.50));
        assert_eq!(view.line_total, dec!(51.00));
    }
}
