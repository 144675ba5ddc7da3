#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use stock_ledger::{
    config::AppConfig,
    db,
    entities::stock_movement::MovementType,
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::AuditSink,
        balance_store::BalanceStore,
        catalog::{CreateProduct, CreateWarehouse},
        ledger_engine::{AppliedMovement, MovementRequest},
        locks::BalanceKey,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Application state over a fresh in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    router: Router,
    pub events: mpsc::Receiver<Event>,
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    // One connection keeps every query on the same in-memory database
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg
}

async fn connect(cfg: &AppConfig) -> Arc<sea_orm::DatabaseConnection> {
    let pool = db::establish_connection_from_app_config(cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    Arc::new(pool)
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = test_config();
        let db = connect(&cfg).await;
        let (tx, rx) = mpsc::channel(256);
        let state = AppState::new(db, cfg, Some(EventSender::new(tx)));
        Self::from_state(state, rx)
    }

    /// Same as [`TestApp::new`] with audit entries going to `audit`.
    pub async fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        let cfg = test_config();
        let db = connect(&cfg).await;
        let (tx, rx) = mpsc::channel(256);
        let state = AppState::with_audit_sink(db, cfg, Some(EventSender::new(tx)), audit);
        Self::from_state(state, rx)
    }

    fn from_state(state: AppState, events: mpsc::Receiver<Event>) -> Self {
        Self {
            router: stock_ledger::app(state.clone()),
            state,
            events,
        }
    }

    pub async fn warehouse(&self, code: &str) -> Uuid {
        self.state
            .catalog
            .create_warehouse(CreateWarehouse {
                code: code.to_string(),
                name: format!("Warehouse {}", code),
                address: None,
                is_active: None,
            })
            .await
            .expect("create warehouse")
            .id
    }

    pub async fn product(&self, name: &str) -> Uuid {
        self.product_with(CreateProduct {
            name: name.to_string(),
            cost_price: Some(Decimal::from(2)),
            ..Default::default()
        })
        .await
    }

    pub async fn product_with(&self, request: CreateProduct) -> Uuid {
        self.state
            .catalog
            .create_product(request)
            .await
            .expect("create product")
            .id
    }

    pub async fn apply(&self, request: MovementRequest) -> Result<AppliedMovement, ServiceError> {
        self.state.engine.apply(request, None).await
    }

    /// Current quantity, 0 when no balance row exists yet.
    pub async fn balance(&self, warehouse_id: Uuid, product_id: Uuid) -> Decimal {
        BalanceStore::find(
            &*self.state.db,
            BalanceKey::new(warehouse_id, product_id),
        )
        .await
        .expect("read balance")
        .map(|b| b.quantity)
        .unwrap_or(Decimal::ZERO)
    }

    /// Drains events published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Sends a request through the full router and returns status, headers
    /// and the parsed JSON body (Null when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, headers, json)
    }
}

pub fn movement(
    movement_type: MovementType,
    warehouse_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
) -> MovementRequest {
    MovementRequest {
        movement_type,
        warehouse_id,
        from_warehouse_id: None,
        product_id,
        quantity,
        unit_cost: None,
        movement_date: None,
        reference: None,
        notes: None,
    }
}

pub fn transfer(from: Uuid, to: Uuid, product_id: Uuid, quantity: Decimal) -> MovementRequest {
    MovementRequest {
        from_warehouse_id: Some(from),
        ..movement(MovementType::Transfer, to, product_id, quantity)
    }
}

/// Decimal from a JSON string or number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
