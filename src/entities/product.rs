use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Catalog product as far as the ledger cares: identity, the cost default for
/// movements and the stock thresholds.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "products")]
#[schema(as = Product)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub name: String,
    pub unit: String,
    /// When false the ledger records movements but maintains no balances.
    pub track_quantity: bool,
    pub is_active: bool,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub cost_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub selling_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub min_stock: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub max_stock: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_balance::Entity")]
    StockBalances,
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
}

impl Related<super::stock_balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockBalances.def()
    }
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
