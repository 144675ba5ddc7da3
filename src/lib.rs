//! Stock ledger service library
//!
//! Multi-warehouse stock ledger: movements, balances, compensating reversal,
//! purchase receiving and the audit trail, served over HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{http::HeaderValue, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use services::{
    audit::{ActivityLogService, AuditSink, DbAuditSink},
    catalog::CatalogService,
    ledger_engine::LedgerEngine,
    purchase_orders::PurchaseOrderService,
    reports::ReportService,
};

/// Upper bound on a single request, lock waits and retries included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Option<events::EventSender>,
    pub engine: LedgerEngine,
    pub purchase_orders: PurchaseOrderService,
    pub activity: ActivityLogService,
    pub reports: ReportService,
    pub catalog: CatalogService,
}

impl AppState {
    /// Wires every service against `db`, auditing into `activity_logs`.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<events::EventSender>,
    ) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(DbAuditSink::new(db.clone()));
        Self::with_audit_sink(db, config, event_sender, audit)
    }

    pub fn with_audit_sink(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<events::EventSender>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let engine = LedgerEngine::new(
            db.clone(),
            config.ledger_settings(),
            audit,
            event_sender.clone(),
        );
        Self {
            purchase_orders: PurchaseOrderService::new(
                db.clone(),
                engine.clone(),
                event_sender.clone(),
            ),
            activity: ActivityLogService::new(db.clone()),
            reports: ReportService::new(db.clone()),
            catalog: CatalogService::new(db.clone()),
            engine,
            db,
            config,
            event_sender,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/movements", handlers::movements::movements_routes())
        .nest("/balances", handlers::balances::balances_routes())
        .nest(
            "/purchase-orders",
            handlers::purchase_orders::purchase_orders_routes(),
        )
        .nest("/activity-logs", handlers::activity::activity_routes())
        .nest("/reports", handlers::reports::reports_routes())
        .nest("/warehouses", handlers::catalog::warehouses_routes())
        .nest("/products", handlers::catalog::products_routes())
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None if cfg.is_development() => CorsLayer::permissive(),
        None => CorsLayer::new(),
    }
}

/// Full HTTP application: health, OpenAPI document and the v1 API behind the
/// request-id, tracing, compression, CORS and timeout layers.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
