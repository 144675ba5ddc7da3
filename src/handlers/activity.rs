use super::{paginated, PageQuery};
use crate::{
    entities::activity_log,
    handlers::AppState,
    services::audit::ActivityLogFilter,
    ApiResponse, ApiResult, PaginatedResponse,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

pub fn activity_routes() -> Router<AppState> {
    Router::new().route("/", get(list_activity_logs))
}

#[utoipa::path(
    get,
    path = "/api/v1/activity-logs",
    params(ActivityLogFilter, PageQuery),
    responses(
        (status = 200, description = "Audit trail, newest first", body = ApiResponse<PaginatedResponse<activity_log::Model>>)
    ),
    tag = "activity"
)]
pub async fn list_activity_logs(
    State(state): State<AppState>,
    Query(filter): Query<ActivityLogFilter>,
    Query(page_query): Query<PageQuery>,
) -> ApiResult<PaginatedResponse<activity_log::Model>> {
    let (page, limit) = page_query.resolve(&state);
    let (items, total) = state.activity.list(&filter, page, limit).await?;
    Ok(Json(ApiResponse::success(paginated(items, total, page, limit))))
}
