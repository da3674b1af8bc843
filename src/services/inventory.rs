//! Inventory gate: stock checks for cart mutations and the authoritative
//! decrement performed at order commit.
//!
//! Both operations take any [`ConnectionTrait`] so callers can run them
//! inside their own transaction.

use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{entities::product, errors::ServiceError};

/// Pure availability rule shared by the check and the decrement.
pub fn ensure_available(
    product_id: Uuid,
    available: i32,
    requested: i32,
) -> Result<(), ServiceError> {
    if requested <= 0 {
        return Err(ServiceError::InvalidQuantity(requested));
    }
    if available >= requested {
        Ok(())
    } else {
        Err(ServiceError::InsufficientStock {
            product_id,
            available: available.max(0),
        })
    }
}

/// Checks that `requested` units of a product are available and returns the
/// product. Read-only: nothing is held or decremented.
#[instrument(skip(conn))]
pub async fn check_and_reserve<C>(
    conn: &C,
    product_id: Uuid,
    requested: i32,
) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let product = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

    ensure_available(product_id, product.stock, requested)?;
    debug!(stock = product.stock, "Stock check passed");

    Ok(product)
}

/// Atomically takes `quantity` units out of stock.
///
/// Issued as a single conditional `UPDATE ... WHERE stock >= quantity`, so two
/// racing commits cannot both consume the last unit.
#[instrument(skip(conn))]
pub async fn decrement_stock<C>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if quantity <= 0 {
        return Err(ServiceError::InvalidQuantity(quantity));
    }

    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        return Ok(());
    }

    let available = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .map(|p| p.stock)
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

    warn!(available, "Conditional stock decrement matched no rows");
    Err(ServiceError::InsufficientStock {
        product_id,
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn exact_stock_is_enough() {
        assert!(ensure_available(Uuid::nil(), 5, 5).is_ok());
    }

    #[test]
    fn shortfall_reports_available_units() {
        let id = Uuid::new_v4();
        assert_matches!(
            ensure_available(id, 5, 7),
            Err(ServiceError::InsufficientStock { product_id, available: 5 }) if product_id == id
        );
    }

    #[test]
    fn non_positive_request_is_invalid() {
        assert_matches!(
            ensure_available(Uuid::nil(), 5, 0),
            Err(ServiceError::InvalidQuantity(0))
        );
        assert_matches!(
            ensure_available(Uuid::nil(), 5, -2),
            Err(ServiceError::InvalidQuantity(-2))
        );
    }
}
