use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
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
pub enum PurchaseOrderStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn can_send(self) -> bool {
        matches!(self, Self::Draft)
    }

    pub fn can_receive(self) -> bool {
        matches!(self, Self::Draft | Self::Sent | Self::Partial)
    }

    pub fn can_cancel(self) -> bool {
        matches!(self, Self::Draft | Self::Sent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "purchase_orders")]
#[schema(as = PurchaseOrder)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub supplier_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub order_date: DateTime<Utc>,
    pub expected_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub total: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_order_item::Entity")]
    Items,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::purchase_order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::PurchaseOrderStatus::{self, *};
    use rstest::rstest;

    #[rstest]
    #[case(Draft, true, true, true)]
    #[case(Sent, false, true, true)]
    #[case(Partial, false, true, false)]
    #[case(Received, false, false, false)]
    #[case(Cancelled, false, false, false)]
    fn status_transitions(
        #[case] status: PurchaseOrderStatus,
        #[case] send: bool,
        #[case] receive: bool,
        #[case] cancel: bool,
    ) {
        assert_eq!(status.can_send(), send);
        assert_eq!(status.can_receive(), receive);
        assert_eq!(status.can_cancel(), cancel);
    }

    #[test]
    fn status_renders_as_stored_value() {
        assert_eq!(Partial.to_string(), "partial");
        assert_eq!(serde_json::to_string(&Cancelled).unwrap(), "\"cancelled\"");
    }
}
