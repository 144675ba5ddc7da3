use super::{created, paginated, PageQuery};
use crate::{
    entities::{product, warehouse},
    errors::ServiceError,
    handlers::AppState,
    services::catalog::{CreateProduct, CreateWarehouse},
    ApiResponse, ApiResult, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

pub fn warehouses_routes() -> Router<AppState> {
    Router::new().route("/", get(list_warehouses).post(create_warehouse))
}

pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product))
}

#[utoipa::path(
    post,
    path = "/api/v1/warehouses",
    request_body = CreateWarehouse,
    responses(
        (status = 201, description = "Warehouse created", body = ApiResponse<warehouse::Model>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already used", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn create_warehouse(
    State(state): State<AppState>,
    Json(payload): Json<CreateWarehouse>,
) -> Result<(StatusCode, Json<ApiResponse<warehouse::Model>>), ServiceError> {
    let warehouse = state.catalog.create_warehouse(payload).await?;
    Ok(created(warehouse))
}

#[utoipa::path(
    get,
    path = "/api/v1/warehouses",
    params(PageQuery),
    responses(
        (status = 200, description = "Warehouses listed", body = ApiResponse<PaginatedResponse<warehouse::Model>>)
    ),
    tag = "catalog"
)]
pub async fn list_warehouses(
    State(state): State<AppState>,
    Query(page_query): Query<PageQuery>,
) -> ApiResult<PaginatedResponse<warehouse::Model>> {
    let (page, limit) = page_query.resolve(&state);
    let (items, total) = state.catalog.list_warehouses(page, limit).await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, limit))))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProduct,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<product::Model>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "SKU already used", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProduct>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), ServiceError> {
    let product = state.catalog.create_product(payload).await?;
    Ok(created(product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(PageQuery),
    responses(
        (status = 200, description = "Products listed", body = ApiResponse<PaginatedResponse<product::Model>>)
    ),
    tag = "catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(page_query): Query<PageQuery>,
) -> ApiResult<PaginatedResponse<product::Model>> {
    let (page, limit) = page_query.resolve(&state);
    let (items, total) = state.catalog.list_products(page, limit).await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, limit))))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product fetched", body = ApiResponse<product::Model>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<product::Model> {
    let product = state.catalog.get_product(id).await?;
    Ok(Json(ApiResponse::success(product)))
}
