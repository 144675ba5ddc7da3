use crate::entities::{
    product::{self, Entity as Product},
    warehouse::{self, Entity as Warehouse},
};
use crate::errors::ServiceError;
use crate::services::balance_store::BalanceStore;
use crate::services::effects::{effects_of, MovementShape};
use crate::services::locks::BalanceKey;
use crate::services::movement_ledger::MovementLedger;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ValuationFilter {
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockValuationRow {
    pub warehouse_id: Uuid,
    pub warehouse_code: String,
    pub warehouse_name: String,
    pub product_id: Uuid,
    pub sku: Option<String>,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockValuation {
    pub rows: Vec<StockValuationRow>,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LowStockItem {
    pub product_id: Uuid,
    pub sku: Option<String>,
    pub name: String,
    pub min_stock: Decimal,
    pub total_quantity: Decimal,
    pub shortfall: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BalanceMismatch {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    /// Quantity stored in the balance table (0 when the row is missing).
    pub recorded: Decimal,
    /// Quantity obtained by replaying the ledger.
    pub replayed: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub movements_replayed: usize,
    pub balances_checked: usize,
    pub mismatches: Vec<BalanceMismatch>,
}

/// Compares replayed quantities with recorded ones over the union of keys.
pub fn compare_balances(
    recorded: &HashMap<BalanceKey, Decimal>,
    replayed: &HashMap<BalanceKey, Decimal>,
) -> Vec<BalanceMismatch> {
    let mut keys: Vec<BalanceKey> = recorded.keys().chain(replayed.keys()).copied().collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let recorded = recorded.get(&key).copied().unwrap_or(Decimal::ZERO);
            let replayed = replayed.get(&key).copied().unwrap_or(Decimal::ZERO);
            (recorded != replayed).then_some(BalanceMismatch {
                warehouse_id: key.warehouse_id,
                product_id: key.product_id,
                recorded,
                replayed,
            })
        })
        .collect()
}

/// Read-only views over balances and the ledger. Never mutates.
#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn products_by_id(&self) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        Ok(Product::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect())
    }

    /// Quantity × product cost price per balance, ordered by warehouse code
    /// then product name.
    #[instrument(skip(self))]
    pub async fn stock_valuation(
        &self,
        filter: &ValuationFilter,
    ) -> Result<StockValuation, ServiceError> {
        let products = self.products_by_id().await?;
        let mut warehouses = Warehouse::find();
        if let Some(warehouse_id) = filter.warehouse_id {
            warehouses = warehouses.filter(warehouse::Column::Id.eq(warehouse_id));
        }
        let warehouses: HashMap<Uuid, warehouse::Model> = warehouses
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        let mut rows = Vec::new();
        for balance in BalanceStore::all(&*self.db).await? {
            let (Some(warehouse), Some(product)) = (
                warehouses.get(&balance.warehouse_id),
                products.get(&balance.product_id),
            ) else {
                continue;
            };
            let unit_cost = product.cost_price.unwrap_or(Decimal::ZERO);
            rows.push(StockValuationRow {
                warehouse_id: warehouse.id,
                warehouse_code: warehouse.code.clone(),
                warehouse_name: warehouse.name.clone(),
                product_id: product.id,
                sku: product.sku.clone(),
                product_name: product.name.clone(),
                quantity: balance.quantity,
                unit_cost,
                value: balance.quantity * unit_cost,
            });
        }
        rows.sort_by(|a, b| {
            (&a.warehouse_code, &a.product_name).cmp(&(&b.warehouse_code, &b.product_name))
        });

        Ok(StockValuation {
            total_quantity: rows.iter().map(|r| r.quantity).sum(),
            total_value: rows.iter().map(|r| r.value).sum(),
            rows,
        })
    }

    /// Active, tracked products whose stock across all warehouses is below
    /// their minimum.
    #[instrument(skip(self))]
    pub async fn low_stock(&self) -> Result<Vec<LowStockItem>, ServiceError> {
        let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
        for balance in BalanceStore::all(&*self.db).await? {
            *totals.entry(balance.product_id).or_default() += balance.quantity;
        }

        let products = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::TrackQuantity.eq(true))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut items: Vec<LowStockItem> = products
            .into_iter()
            .filter_map(|p| {
                let total = totals.get(&p.id).copied().unwrap_or(Decimal::ZERO);
                (total < p.min_stock).then(|| LowStockItem {
                    product_id: p.id,
                    shortfall: p.min_stock - total,
                    sku: p.sku,
                    name: p.name,
                    min_stock: p.min_stock,
                    total_quantity: total,
                })
            })
            .collect();
        items.sort_by(|a, b| b.shortfall.cmp(&a.shortfall));
        Ok(items)
    }

    /// Replays every movement of tracked products through the same effect
    /// rules the engine applies and compares the result with stored balances.
    #[instrument(skip(self))]
    pub async fn consistency_check(&self) -> Result<ConsistencyReport, ServiceError> {
        let products = self.products_by_id().await?;
        let tracked = |id: &Uuid| products.get(id).map_or(false, |p| p.track_quantity);

        let movements = MovementLedger::replay_order(&*self.db).await?;
        let mut replayed: HashMap<BalanceKey, Decimal> = HashMap::new();
        let mut movements_replayed = 0;
        for movement in movements.iter().filter(|m| tracked(&m.product_id)) {
            for effect in effects_of(&MovementShape::from(movement))? {
                *replayed.entry(effect.key).or_default() += effect.delta;
            }
            movements_replayed += 1;
        }

        let recorded: HashMap<BalanceKey, Decimal> = BalanceStore::all(&*self.db)
            .await?
            .into_iter()
            .filter(|b| tracked(&b.product_id))
            .map(|b| (BalanceKey::new(b.warehouse_id, b.product_id), b.quantity))
            .collect();

        let mismatches = compare_balances(&recorded, &replayed);
        if !mismatches.is_empty() {
            let products: HashSet<Uuid> = mismatches.iter().map(|m| m.product_id).collect();
            warn!(
                mismatches = mismatches.len(),
                products = products.len(),
                "Stock balances disagree with the movement ledger"
            );
        }

        Ok(ConsistencyReport {
            consistent: mismatches.is_empty(),
            movements_replayed,
            balances_checked: recorded.len(),
            mismatches,
        })
    }
}
