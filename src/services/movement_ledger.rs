use crate::entities::stock_movement::{self, Entity as StockMovement, MovementType, Reference};
use crate::errors::ServiceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

/// A fully resolved movement record, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub warehouse_id: Uuid,
    pub from_warehouse_id: Option<Uuid>,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<Reference>,
    pub notes: Option<String>,
    pub user_id: Option<Uuid>,
    pub movement_date: DateTime<Utc>,
}

/// Query over the ledger. Date bounds are UTC instants, `until` exclusive.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Append-only log of stock movements. Rows are only replaced or deleted by
/// the engine after it has reversed their balance effect.
pub struct MovementLedger;

impl MovementLedger {
    pub async fn append<C: ConnectionTrait>(
        conn: &C,
        movement: NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        let now = Utc::now();
        let row = stock_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            warehouse_id: Set(movement.warehouse_id),
            product_id: Set(movement.product_id),
            movement_type: Set(movement.movement_type),
            quantity: Set(movement.quantity),
            unit_cost: Set(movement.unit_cost),
            from_warehouse_id: Set(movement.from_warehouse_id),
            reference_type: Set(movement.reference.map(|r| r.kind)),
            reference_id: Set(movement.reference.map(|r| r.id)),
            notes: Set(movement.notes),
            user_id: Set(movement.user_id),
            movement_date: Set(movement.movement_date),
            created_at: Set(now),
            updated_at: Set(now),
        };
        row.insert(conn).await.map_err(ServiceError::from_write)
    }

    pub async fn get<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<stock_movement::Model, ServiceError> {
        StockMovement::find_by_id(id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Stock movement {} not found", id)))
    }

    /// Full-record replace keeping identity and creation time.
    pub async fn replace<C: ConnectionTrait>(
        conn: &C,
        existing: &stock_movement::Model,
        movement: NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        let row = stock_movement::ActiveModel {
            id: Set(existing.id),
            warehouse_id: Set(movement.warehouse_id),
            product_id: Set(movement.product_id),
            movement_type: Set(movement.movement_type),
            quantity: Set(movement.quantity),
            unit_cost: Set(movement.unit_cost),
            from_warehouse_id: Set(movement.from_warehouse_id),
            reference_type: Set(movement.reference.map(|r| r.kind)),
            reference_id: Set(movement.reference.map(|r| r.id)),
            notes: Set(movement.notes),
            user_id: Set(movement.user_id),
            movement_date: Set(movement.movement_date),
            created_at: Set(existing.created_at),
            updated_at: Set(Utc::now()),
        };
        row.update(conn).await.map_err(ServiceError::from_write)
    }

    pub async fn delete<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<(), ServiceError> {
        let result = StockMovement::delete_by_id(id)
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Stock movement {} not found",
                id
            )));
        }
        Ok(())
    }

    /// Newest `movement_date` first.
    pub async fn list<C: ConnectionTrait>(
        conn: &C,
        query: &MovementQuery,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let mut select = StockMovement::find();

        if let Some(warehouse_id) = query.warehouse_id {
            select = select.filter(
                Condition::any()
                    .add(stock_movement::Column::WarehouseId.eq(warehouse_id))
                    .add(stock_movement::Column::FromWarehouseId.eq(warehouse_id)),
            );
        }
        if let Some(product_id) = query.product_id {
            select = select.filter(stock_movement::Column::ProductId.eq(product_id));
        }
        if let Some(movement_type) = query.movement_type {
            select = select.filter(stock_movement::Column::MovementType.eq(movement_type));
        }
        if let Some(since) = query.since {
            select = select.filter(stock_movement::Column::MovementDate.gte(since));
        }
        if let Some(until) = query.until {
            select = select.filter(stock_movement::Column::MovementDate.lt(until));
        }

        let paginator = select
            .order_by_desc(stock_movement::Column::MovementDate)
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(conn, limit.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((rows, total))
    }

    /// Every movement in the order it took effect.
    pub async fn replay_order<C: ConnectionTrait>(
        conn: &C,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        StockMovement::find()
            .order_by_asc(stock_movement::Column::MovementDate)
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }
}
