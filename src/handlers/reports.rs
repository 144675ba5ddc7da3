use crate::{
    handlers::AppState,
    services::reports::{ConsistencyReport, LowStockItem, StockValuation, ValuationFilter},
    ApiResponse, ApiResult,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

pub fn reports_routes() -> Router<AppState> {
    Router::new()
        .route("/stock-valuation", get(stock_valuation))
        .route("/low-stock", get(low_stock))
        .route("/consistency", get(consistency))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/stock-valuation",
    params(ValuationFilter),
    responses(
        (status = 200, description = "Stock value per balance", body = ApiResponse<StockValuation>)
    ),
    tag = "reports"
)]
pub async fn stock_valuation(
    State(state): State<AppState>,
    Query(filter): Query<ValuationFilter>,
) -> ApiResult<StockValuation> {
    let report = state.reports.stock_valuation(&filter).await?;
    Ok(Json(ApiResponse::success(report)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/low-stock",
    responses(
        (status = 200, description = "Products below their minimum stock", body = ApiResponse<Vec<LowStockItem>>)
    ),
    tag = "reports"
)]
pub async fn low_stock(State(state): State<AppState>) -> ApiResult<Vec<LowStockItem>> {
    let items = state.reports.low_stock().await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/consistency",
    responses(
        (status = 200, description = "Ledger replay compared with stored balances", body = ApiResponse<ConsistencyReport>)
    ),
    tag = "reports"
)]
pub async fn consistency(State(state): State<AppState>) -> ApiResult<ConsistencyReport> {
    let report = state.reports.consistency_check().await?;
    Ok(Json(ApiResponse::success(report)))
}
