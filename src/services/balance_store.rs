use crate::entities::stock_balance::{self, Entity as StockBalance};
use crate::errors::ServiceError;
use crate::services::effects::{checked_quantity, BalanceDelta, Shortfall};
use crate::services::locks::BalanceKey;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Before/after quantities of one balance touched by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct BalanceChange {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub before: Decimal,
    pub after: Decimal,
}

impl BalanceChange {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.warehouse_id, self.product_id)
    }
}

/// Collapses successive changes to the same balance into one, keeping the
/// first `before` and the last `after`, in order of first appearance.
pub fn merge_changes(changes: impl IntoIterator<Item = BalanceChange>) -> Vec<BalanceChange> {
    let mut merged: Vec<BalanceChange> = Vec::new();
    for change in changes {
        match merged.iter_mut().find(|c| c.key() == change.key()) {
            Some(existing) => existing.after = change.after,
            None => merged.push(change),
        }
    }
    merged
}

#[derive(Debug, Clone, Default)]
pub struct BalanceFilter {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

/// Keyed (warehouse, product) quantities. Callers hold the matching
/// [`BalanceLocks`](crate::services::locks::BalanceLocks) and run inside a
/// transaction; every write is additionally version-checked.
pub struct BalanceStore;

impl BalanceStore {
    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        key: BalanceKey,
    ) -> Result<Option<stock_balance::Model>, ServiceError> {
        StockBalance::find()
            .filter(stock_balance::Column::WarehouseId.eq(key.warehouse_id))
            .filter(stock_balance::Column::ProductId.eq(key.product_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Returns the balance row, inserting it at quantity 0 when absent.
    pub async fn get_or_create<C: ConnectionTrait>(
        conn: &C,
        key: BalanceKey,
    ) -> Result<stock_balance::Model, ServiceError> {
        if let Some(existing) = Self::find(conn, key).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let row = stock_balance::ActiveModel {
            id: Set(Uuid::new_v4()),
            warehouse_id: Set(key.warehouse_id),
            product_id: Set(key.product_id),
            quantity: Set(Decimal::ZERO),
            reserved_quantity: Set(Decimal::ZERO),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        StockBalance::insert(row)
            .on_conflict(
                OnConflict::columns([
                    stock_balance::Column::WarehouseId,
                    stock_balance::Column::ProductId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(ServiceError::from_write)?;
        debug!(balance = %key, "Created stock balance");

        Self::find(conn, key).await?.ok_or_else(|| {
            ServiceError::InternalError(format!("stock balance {} vanished after insert", key))
        })
    }

    /// Adds a signed amount to the balance. Fails with `InsufficientStock`
    /// (worded per `shortfall`) when the result would be negative, and with a
    /// validation error when it would overflow the quantity column.
    pub async fn increment<C: ConnectionTrait>(
        conn: &C,
        key: BalanceKey,
        amount: Decimal,
        shortfall: Shortfall,
    ) -> Result<BalanceChange, ServiceError> {
        let balance = Self::get_or_create(conn, key).await?;
        let next = checked_quantity(balance.quantity, amount, shortfall).map_err(|e| {
            if matches!(e, ServiceError::InsufficientStock(_)) {
                metrics::counter!("stock_ledger.movements.insufficient_stock", 1);
            }
            e
        })?;

        let result = StockBalance::update_many()
            .col_expr(stock_balance::Column::Quantity, Expr::value(next))
            .col_expr(
                stock_balance::Column::Version,
                Expr::col(stock_balance::Column::Version).add(1),
            )
            .col_expr(stock_balance::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_balance::Column::Id.eq(balance.id))
            .filter(stock_balance::Column::Version.eq(balance.version))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            warn!(balance = %key, version = balance.version, "Stale stock balance version");
            return Err(ServiceError::ConcurrencyConflict(format!(
                "stock balance {} was modified concurrently",
                key
            )));
        }

        Ok(BalanceChange {
            warehouse_id: key.warehouse_id,
            product_id: key.product_id,
            before: balance.quantity,
            after: next,
        })
    }

    /// Removes `amount` (a magnitude) from the balance.
    pub async fn decrement<C: ConnectionTrait>(
        conn: &C,
        key: BalanceKey,
        amount: Decimal,
        shortfall: Shortfall,
    ) -> Result<BalanceChange, ServiceError> {
        Self::increment(conn, key, -amount, shortfall).await
    }

    /// Applies deltas in order; the first failure aborts the sequence.
    pub async fn apply<C: ConnectionTrait>(
        conn: &C,
        deltas: &[BalanceDelta],
    ) -> Result<Vec<BalanceChange>, ServiceError> {
        let mut changes = Vec::with_capacity(deltas.len());
        for d in deltas {
            let change = if d.delta.is_sign_negative() {
                Self::decrement(conn, d.key, d.delta.abs(), d.shortfall).await?
            } else {
                Self::increment(conn, d.key, d.delta, d.shortfall).await?
            };
            changes.push(change);
        }
        Ok(changes)
    }

    /// Sum of the product's quantity across all warehouses.
    pub async fn total_for_product<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let rows = StockBalance::find()
            .filter(stock_balance::Column::ProductId.eq(product_id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(rows.iter().map(|b| b.quantity).sum())
    }

    pub async fn list<C: ConnectionTrait>(
        conn: &C,
        filter: &BalanceFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_balance::Model>, u64), ServiceError> {
        let mut query = StockBalance::find();
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(stock_balance::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(stock_balance::Column::ProductId.eq(product_id));
        }

        let paginator = query
            .order_by_asc(stock_balance::Column::WarehouseId)
            .order_by_asc(stock_balance::Column::ProductId)
            .paginate(conn, limit.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((rows, total))
    }

    pub async fn all<C: ConnectionTrait>(
        conn: &C,
    ) -> Result<Vec<stock_balance::Model>, ServiceError> {
        StockBalance::find()
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn change(w: u128, before: Decimal, after: Decimal) -> BalanceChange {
        BalanceChange {
            warehouse_id: Uuid::from_u128(w),
            product_id: Uuid::from_u128(1),
            before,
            after,
        }
    }

    #[test]
    fn merge_keeps_first_before_and_last_after() {
        let merged = merge_changes([
            change(1, dec!(30), dec!(50)),
            change(2, dec!(0), dec!(5)),
            change(1, dec!(50), dec!(10)),
        ]);
        assert_eq!(
            merged,
            vec![change(1, dec!(30), dec!(10)), change(2, dec!(0), dec!(5))]
        );
    }
}
