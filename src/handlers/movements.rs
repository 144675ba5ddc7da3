use super::{paginated, with_warnings, PageQuery};
use crate::{
    entities::stock_movement,
    handlers::AppState,
    middleware_helpers::actor::Actor,
    services::ledger_engine::{
        AppliedMovement, DeletedMovement, EditedMovement, MovementFilter, MovementRequest,
    },
    ApiResponse, ApiResult, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

pub fn movements_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_movements).post(create_movement))
        .route(
            "/:id",
            get(get_movement).put(update_movement).delete(delete_movement),
        )
}

#[utoipa::path(
    post,
    path = "/api/v1/movements",
    request_body = MovementRequest,
    params(("x-user-id" = Option<Uuid>, Header, description = "Acting user")),
    responses(
        (status = 201, description = "Movement applied", body = ApiResponse<AppliedMovement>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "movements"
)]
pub async fn create_movement(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<MovementRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AppliedMovement>>), crate::errors::ServiceError> {
    let applied = state.engine.apply(payload, actor.user_id()).await?;
    let warnings = applied.warnings.clone();
    Ok((StatusCode::CREATED, Json(with_warnings(applied, &warnings))))
}

#[utoipa::path(
    get,
    path = "/api/v1/movements",
    params(MovementFilter, PageQuery),
    responses(
        (status = 200, description = "Movements listed, newest first", body = ApiResponse<PaginatedResponse<stock_movement::Model>>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse)
    ),
    tag = "movements"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    Query(filter): Query<MovementFilter>,
    Query(page_query): Query<PageQuery>,
) -> ApiResult<PaginatedResponse<stock_movement::Model>> {
    let (page, limit) = page_query.resolve(&state);
    let (items, total) = state.engine.list(&filter, page, limit).await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, limit))))
}

#[utoipa::path(
    get,
    path = "/api/v1/movements/{id}",
    params(("id" = Uuid, Path, description = "Movement ID")),
    responses(
        (status = 200, description = "Movement fetched", body = ApiResponse<stock_movement::Model>),
        (status = 404, description = "Movement not found", body = crate::errors::ErrorResponse)
    ),
    tag = "movements"
)]
pub async fn get_movement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<stock_movement::Model> {
    let movement = state.engine.get(id).await?;
    Ok(Json(ApiResponse::success(movement)))
}

#[utoipa::path(
    put,
    path = "/api/v1/movements/{id}",
    request_body = MovementRequest,
    params(
        ("id" = Uuid, Path, description = "Movement ID"),
        ("x-user-id" = Option<Uuid>, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Movement reversed and re-applied", body = ApiResponse<EditedMovement>),
        (status = 404, description = "Movement not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Reversal or new movement lacks stock", body = crate::errors::ErrorResponse)
    ),
    tag = "movements"
)]
pub async fn update_movement(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<MovementRequest>,
) -> ApiResult<EditedMovement> {
    let edited = state.engine.update(id, payload, actor.user_id()).await?;
    let warnings = edited.warnings.clone();
    Ok(Json(with_warnings(edited, &warnings)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/movements/{id}",
    params(
        ("id" = Uuid, Path, description = "Movement ID"),
        ("x-user-id" = Option<Uuid>, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Movement reversed and removed", body = ApiResponse<DeletedMovement>),
        (status = 404, description = "Movement not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Reversal lacks stock", body = crate::errors::ErrorResponse)
    ),
    tag = "movements"
)]
pub async fn delete_movement(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<DeletedMovement> {
    let deleted = state.engine.delete(id, actor.user_id()).await?;
    let warnings = deleted.warnings.clone();
    Ok(Json(with_warnings(deleted, &warnings)))
}
