use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity,
    Model as OrderModel, OrderStatus};
use crate::entities::order_item::{self, ActiveModel as OrderItemActiveModel,
    Entity as OrderItemEntity, Model as OrderItemModel};
use crate::errors::ServiceError;

/// Inserts an order row. The transaction reference is captured on the
/// row so later deliveries of the same transaction can be matched
/// exactly, not just heuristically.
pub async fn insert_order<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    total_amount: Decimal,
    transaction_reference: Option<&str>,
) -> Result<OrderModel, ServiceError> {
    let now = Utc::now();
    let order = OrderActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id.to_string()),
        status: Set(OrderStatus::Paid.to_string()),
        total_amount: Set(total_amount),
        transaction_reference: Set(transaction_reference.map(str::to_string)),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    };

    order.insert(conn).await.map_err(|e| {
        error!(error = %e, user_id = %user_id, "Failed to insert order row");
        ServiceError::DatabaseError(e)
    })
}

/// Inserts one line item for an already-created order.
pub async fn insert_line_item<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    sku: &str,
    quantity: i32,
    unit_price: Decimal,
) -> Result<OrderItemModel, ServiceError> {
    let item = OrderItemActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        sku: Set(sku.to_string()),
        quantity: Set(quantity),
        unit_price: Set(unit_price),
        created_at: Set(Utc::now()),
    };

    item.insert(conn).await.map_err(|e| {
        error!(error = %e, order_id = %order_id, sku = %sku, "Failed to insert order line item");
        ServiceError::DatabaseError(e)
    })
}

/// Order store facade over the shared pool.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Exact-match duplicate probe: an order already carrying this
    /// transaction reference.
    #[instrument(skip(self))]
    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::TransactionReference.eq(reference))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Heuristic duplicate probe: orders for the same user with the same
    /// total created within the trailing window. Deliberately a
    /// heuristic, not a guarantee; see the reconciler for how it is used.
    #[instrument(skip(self))]
    pub async fn find_recent_orders(
        &self,
        user_id: &str,
        total_amount: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::TotalAmount.eq(total_amount))
            .filter(order::Column::CreatedAt.gte(since))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        user_id: &str,
        total_amount: Decimal,
        transaction_reference: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        insert_order(&*self.db_pool, user_id, total_amount, transaction_reference).await
    }

    #[instrument(skip(self))]
    pub async fn create_line_item(
        &self,
        order_id: Uuid,
        sku: &str,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<OrderItemModel, ServiceError> {
        insert_line_item(&*self.db_pool, order_id, sku, quantity, unit_price).await
    }

    /// Line items belonging to an order, oldest first.
    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}
