use super::{paginated, PageQuery};
use crate::{
    entities::stock_balance,
    handlers::AppState,
    services::balance_store::{BalanceFilter, BalanceStore},
    ApiResponse, ApiResult, PaginatedResponse,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub fn balances_routes() -> Router<AppState> {
    Router::new().route("/", get(list_balances))
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BalanceQuery {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

/// A stock balance with its derived available quantity.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceView {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    /// quantity - reserved_quantity
    pub available: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<stock_balance::Model> for BalanceView {
    fn from(balance: stock_balance::Model) -> Self {
        Self {
            available: balance.available(),
            warehouse_id: balance.warehouse_id,
            product_id: balance.product_id,
            quantity: balance.quantity,
            reserved_quantity: balance.reserved_quantity,
            updated_at: balance.updated_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/balances",
    params(BalanceQuery, PageQuery),
    responses(
        (status = 200, description = "Balances listed", body = ApiResponse<PaginatedResponse<BalanceView>>)
    ),
    tag = "balances"
)]
pub async fn list_balances(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
    Query(page_query): Query<PageQuery>,
) -> ApiResult<PaginatedResponse<BalanceView>> {
    let (page, limit) = page_query.resolve(&state);
    let filter = BalanceFilter {
        warehouse_id: query.warehouse_id,
        product_id: query.product_id,
    };
    let (rows, total) = BalanceStore::list(&*state.db, &filter, page, limit).await?;
    let items = rows.into_iter().map(BalanceView::from).collect();
    Ok(Json(ApiResponse::success(paginated(items, total, page, limit))))
}
