use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Direction of a stock movement.
///
/// `In`, `Out` and `Transfer` carry an unsigned magnitude applied in a fixed
/// direction. `Adjustment` carries a signed delta applied as-is.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "in")]
    In,
    #[sea_orm(string_value = "out")]
    Out,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
}

/// Kind of document a movement originates from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceKind {
    #[sea_orm(string_value = "purchase_order")]
    PurchaseOrder,
    #[sea_orm(string_value = "manual")]
    Manual,
}

/// Link from a movement back to its originating document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl Reference {
    pub fn purchase_order(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::PurchaseOrder,
            id,
        }
    }
}

/// One ledger entry. `warehouse_id` is the destination for in, transfer and
/// adjustment, and the depleted warehouse for out.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "stock_movements")]
#[schema(as = StockMovement)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub unit_cost: Option<Decimal>,
    pub from_warehouse_id: Option<Uuid>,
    pub reference_type: Option<ReferenceKind>,
    pub reference_id: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub user_id: Option<Uuid>,
    pub movement_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn reference(&self) -> Option<Reference> {
        match (self.reference_type, self.reference_id) {
            (Some(kind), Some(id)) => Some(Reference { kind, id }),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
