use super::{paginated, with_warnings, PageQuery};
use crate::{
    entities::purchase_order::{self, PurchaseOrderStatus},
    errors::ServiceError,
    handlers::AppState,
    middleware_helpers::actor::Actor,
    services::purchase_orders::{
        CreatePurchaseOrder, CreatedPurchaseOrder, PurchaseOrderOutcome, PurchaseOrderWithItems,
        ReceivedPurchaseOrder,
    },
    ApiResponse, ApiResult, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

pub fn purchase_orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_purchase_orders).post(create_purchase_order))
        .route("/:id", get(get_purchase_order))
        .route("/:id/send", post(send_purchase_order))
        .route("/:id/receive", post(receive_purchase_order))
        .route("/:id/cancel", post(cancel_purchase_order))
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PurchaseOrderQuery {
    pub status: Option<PurchaseOrderStatus>,
}

#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders",
    request_body = CreatePurchaseOrder,
    params(("x-user-id" = Option<Uuid>, Header, description = "Acting user")),
    responses(
        (status = 201, description = "Draft purchase order created", body = ApiResponse<CreatedPurchaseOrder>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order number already used", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn create_purchase_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreatePurchaseOrder>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedPurchaseOrder>>), ServiceError> {
    let order = state
        .purchase_orders
        .create(payload, actor.user_id())
        .await?;
    let warnings = order.warnings.clone();
    Ok((StatusCode::CREATED, Json(with_warnings(order, &warnings))))
}

#[utoipa::path(
    get,
    path = "/api/v1/purchase-orders",
    params(PurchaseOrderQuery, PageQuery),
    responses(
        (status = 200, description = "Purchase orders listed", body = ApiResponse<PaginatedResponse<purchase_order::Model>>)
    ),
    tag = "purchase-orders"
)]
pub async fn list_purchase_orders(
    State(state): State<AppState>,
    Query(query): Query<PurchaseOrderQuery>,
    Query(page_query): Query<PageQuery>,
) -> ApiResult<PaginatedResponse<purchase_order::Model>> {
    let (page, limit) = page_query.resolve(&state);
    let (items, total) = state
        .purchase_orders
        .list(query.status, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, limit))))
}

#[utoipa::path(
    get,
    path = "/api/v1/purchase-orders/{id}",
    params(("id" = Uuid, Path, description = "Purchase order ID")),
    responses(
        (status = 200, description = "Purchase order with its lines", body = ApiResponse<PurchaseOrderWithItems>),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn get_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<PurchaseOrderWithItems> {
    let order = state.purchase_orders.get(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/send",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID"),
        ("x-user-id" = Option<Uuid>, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Purchase order sent", body = ApiResponse<PurchaseOrderOutcome>),
        (status = 400, description = "Not a draft", body = crate::errors::ErrorResponse),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn send_purchase_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<PurchaseOrderOutcome> {
    let outcome = state.purchase_orders.send(id, actor.user_id()).await?;
    let warnings = outcome.warnings.clone();
    Ok(Json(with_warnings(outcome, &warnings)))
}

#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/receive",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID"),
        ("x-user-id" = Option<Uuid>, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "All outstanding lines received", body = ApiResponse<ReceivedPurchaseOrder>),
        (status = 400, description = "Order cannot be received in its status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn receive_purchase_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<ReceivedPurchaseOrder> {
    let received = state.purchase_orders.receive(id, actor.user_id()).await?;
    let warnings = received.warnings.clone();
    Ok(Json(with_warnings(received, &warnings)))
}

#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID"),
        ("x-user-id" = Option<Uuid>, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Purchase order cancelled", body = ApiResponse<PurchaseOrderOutcome>),
        (status = 400, description = "Order cannot be cancelled in its status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn cancel_purchase_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<PurchaseOrderOutcome> {
    let outcome = state.purchase_orders.cancel(id, actor.user_id()).await?;
    let warnings = outcome.warnings.clone();
    Ok(Json(with_warnings(outcome, &warnings)))
}
