pub mod activity;
pub mod balances;
pub mod catalog;
pub mod health;
pub mod movements;
pub mod purchase_orders;
pub mod reports;

use crate::{ApiResponse, PaginatedResponse};
use axum::{http::StatusCode, Json};
use serde::Deserialize;
use utoipa::IntoParams;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Pagination query shared by list endpoints. Read alongside each endpoint's
/// own filter from the same query string.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    pub page: Option<u64>,
    /// Items per page, capped by configuration
    pub limit: Option<u64>,
}

impl PageQuery {
    /// Resolved (page, limit) for this request.
    pub fn resolve(&self, state: &AppState) -> (u64, u64) {
        (self.page.unwrap_or(1).max(1), state.config.page_limit(self.limit))
    }
}

pub fn paginated<T>(items: Vec<T>, total: u64, page: u64, limit: u64) -> PaginatedResponse<T> {
    PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit.max(1)),
    }
}

/// 201 with the standard envelope.
pub fn created<T>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Success envelope carrying any non-fatal warnings as the message.
pub fn with_warnings<T>(data: T, warnings: &[String]) -> ApiResponse<T> {
    let mut response = ApiResponse::success(data);
    if !warnings.is_empty() {
        response.message = Some(warnings.join("; "));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        let page = paginated(vec![1, 2, 3], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        assert_eq!(paginated::<u8>(vec![], 0, 1, 20).total_pages, 0);
    }

    #[test]
    fn warnings_become_the_message() {
        let response = with_warnings("ok", &["audit down".to_string()]);
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("audit down"));
        assert!(with_warnings("ok", &[]).message.is_none());
    }
}
