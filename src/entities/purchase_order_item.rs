use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "purchase_order_items")]
#[schema(as = PurchaseOrderItem)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub received_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub total: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Quantity still expected from the supplier.
    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.received_quantity).max(Decimal::ZERO)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase_order::Entity",
        from = "Column::PurchaseOrderId",
        to = "super::purchase_order::Column::Id",
        on_delete = "Cascade"
    )]
    PurchaseOrder,
}

impl Related<super::purchase_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
