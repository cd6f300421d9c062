use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::instrument;

use crate::db::DbPool;
use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;

/// Outcome of an attempted stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Decremented,
    InsufficientStock,
    NotFound,
}

/// Looks up the current catalog price for a SKU.
///
/// Generic over the connection so the atomic order-creation path can run
/// it inside its transaction and the stepwise path against the pool.
pub async fn price_for_sku<C: ConnectionTrait>(
    conn: &C,
    sku: &str,
) -> Result<Option<Decimal>, ServiceError> {
    let product = ProductEntity::find()
        .filter(product::Column::Sku.eq(sku))
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    Ok(product.map(|p| p.price))
}

/// Decrements stock for a SKU by `quantity` in a single conditional
/// UPDATE, atomic at the database regardless of surrounding transaction:
/// the row only changes when enough stock remains.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    sku: &str,
    quantity: i32,
) -> Result<StockDecrement, ServiceError> {
    let result = ProductEntity::update_many()
        .col_expr(
            product::Column::StockCount,
            Expr::col(product::Column::StockCount).sub(quantity),
        )
        .filter(product::Column::Sku.eq(sku))
        .filter(product::Column::StockCount.gte(quantity))
        .exec(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    if result.rows_affected > 0 {
        return Ok(StockDecrement::Decremented);
    }

    // Nothing matched: distinguish an unknown SKU from one that exists
    // but has too little stock, so callers can log the right thing.
    let exists = ProductEntity::find()
        .filter(product::Column::Sku.eq(sku))
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .is_some();

    if exists {
        Ok(StockDecrement::InsufficientStock)
    } else {
        Ok(StockDecrement::NotFound)
    }
}

/// Catalog store facade over the shared pool.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn get_price(&self, sku: &str) -> Result<Option<Decimal>, ServiceError> {
        price_for_sku(&*self.db_pool, sku).await
    }

    #[instrument(skip(self))]
    pub async fn decrement_stock(
        &self,
        sku: &str,
        quantity: i32,
    ) -> Result<StockDecrement, ServiceError> {
        decrement_stock(&*self.db_pool, sku, quantity).await
    }
}
