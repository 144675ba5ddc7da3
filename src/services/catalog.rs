use crate::entities::{
    product::{self, Entity as Product},
    warehouse::{self, Entity as Warehouse},
};
use crate::errors::ServiceError;
use crate::services::effects::ensure_storable;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const DEFAULT_UNIT: &str = "pcs";

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateWarehouse {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProduct {
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    pub barcode: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 32))]
    pub unit: Option<String>,
    /// Defaults to true.
    pub track_quantity: Option<bool>,
    pub cost_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub min_stock: Option<Decimal>,
    pub max_stock: Option<Decimal>,
}

impl CreateProduct {
    fn check_amounts(&self) -> Result<(), ServiceError> {
        let amounts = [
            ("cost_price", self.cost_price),
            ("selling_price", self.selling_price),
            ("min_stock", self.min_stock),
            ("max_stock", self.max_stock),
        ];
        for (field, value) in amounts {
            let Some(value) = value else { continue };
            if value < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "{}: must not be negative",
                    field
                )));
            }
            ensure_storable(field, value)?;
        }
        if let (Some(min), Some(max)) = (self.min_stock, self.max_stock) {
            if max < min {
                return Err(ServiceError::ValidationError(
                    "max_stock: must not be below min_stock".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Minimal warehouse and product directory backing the ledger's foreign keys.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_warehouse(
        &self,
        request: CreateWarehouse,
    ) -> Result<warehouse::Model, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let saved = warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(request.code.trim().to_string()),
            name: Set(request.name),
            address: Set(request.address),
            is_active: Set(request.is_active.unwrap_or(true)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::from_write)?;

        info!(warehouse_id = %saved.id, "Warehouse created");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn list_warehouses(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<warehouse::Model>, u64), ServiceError> {
        let paginator = Warehouse::find()
            .order_by_asc(warehouse::Column::Code)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((rows, total))
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_product(
        &self,
        request: CreateProduct,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        request.check_amounts()?;

        let now = Utc::now();
        let saved = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(request.sku),
            barcode: Set(request.barcode),
            name: Set(request.name),
            unit: Set(request.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string())),
            track_quantity: Set(request.track_quantity.unwrap_or(true)),
            is_active: Set(true),
            cost_price: Set(request.cost_price),
            selling_price: Set(request.selling_price),
            min_stock: Set(request.min_stock.unwrap_or(Decimal::ZERO)),
            max_stock: Set(request.max_stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::from_write)?;

        info!(product_id = %saved.id, "Product created");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let paginator = Product::find()
            .order_by_asc(product::Column::Name)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn negative_prices_are_rejected() {
        let request = CreateProduct {
            name: "Widget".into(),
            cost_price: Some(dec!(-1)),
            ..Default::default()
        };
        assert_matches!(
            request.check_amounts(),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("cost_price")
        );

        let request = CreateProduct {
            name: "Widget".into(),
            selling_price: Some(Decimal::MAX),
            ..Default::default()
        };
        assert_matches!(
            request.check_amounts(),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("selling_price")
        );
    }

    #[test]
    fn max_stock_must_cover_min_stock() {
        let request = CreateProduct {
            name: "Widget".into(),
            min_stock: Some(dec!(10)),
            max_stock: Some(dec!(5)),
            ..Default::default()
        };
        assert_matches!(request.check_amounts(), Err(ServiceError::ValidationError(_)));
    }
}
