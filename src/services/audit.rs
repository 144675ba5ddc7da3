use crate::entities::activity_log::{self, Entity as ActivityLog};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use utoipa::IntoParams;
use uuid::Uuid;

pub const SUBJECT_STOCK_MOVEMENT: &str = "stock_movement";
pub const SUBJECT_PURCHASE_ORDER: &str = "purchase_order";

pub const ACTION_STOCK_UPDATE: &str = "stock_update";
pub const ACTION_STOCK_DELETE: &str = "stock_delete";
pub const ACTION_PO_CREATED: &str = "purchase_order_created";
pub const ACTION_PO_SENT: &str = "purchase_order_sent";
pub const ACTION_PO_RECEIVED: &str = "purchase_order_received";
pub const ACTION_PO_CANCELLED: &str = "purchase_order_cancelled";

/// Failure to persist an audit entry. Never fails the audited operation.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit write failed: {0}")]
    Storage(#[from] DbErr),
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// One audit record: what happened to which subject, with before/after
/// snapshots and the acting user.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: String,
    pub subject_type: &'static str,
    pub subject_id: Uuid,
    pub product_id: Option<Uuid>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub description: Option<String>,
    pub user_id: Option<Uuid>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Writes audit entries to `activity_logs`.
#[derive(Clone)]
pub struct DbAuditSink {
    db: Arc<DatabaseConnection>,
}

impl DbAuditSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for DbAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let row = activity_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            action: Set(entry.action),
            subject_type: Set(Some(entry.subject_type.to_string())),
            subject_id: Set(Some(entry.subject_id)),
            product_id: Set(entry.product_id),
            old_values: Set(entry.old_values),
            new_values: Set(entry.new_values),
            description: Set(entry.description),
            user_id: Set(entry.user_id),
            created_at: Set(Utc::now()),
        };
        row.insert(&*self.db).await?;
        Ok(())
    }
}

/// Records `entry` without failing the caller. Returns the warning to surface
/// when the write did not succeed.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) -> Option<String> {
    let action = entry.action.clone();
    let subject_id = entry.subject_id;
    match sink.record(entry).await {
        Ok(()) => None,
        Err(e) => {
            metrics::counter!("stock_ledger.audit_failures", 1);
            tracing::warn!(
                action = %action,
                subject_id = %subject_id,
                error = %e,
                "Audit entry was not recorded"
            );
            Some(format!("Audit entry for {} was not recorded: {}", action, e))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivityLogFilter {
    pub action: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

/// Read side of the audit trail.
#[derive(Clone)]
pub struct ActivityLogService {
    db: Arc<DatabaseConnection>,
}

impl ActivityLogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: &ActivityLogFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<activity_log::Model>, u64), ServiceError> {
        let db = &*self.db;
        let mut query = ActivityLog::find();

        if let Some(action) = &filter.action {
            query = query.filter(activity_log::Column::Action.eq(action.as_str()));
        }
        if let Some(subject_type) = &filter.subject_type {
            query = query.filter(activity_log::Column::SubjectType.eq(subject_type.as_str()));
        }
        if let Some(subject_id) = filter.subject_id {
            query = query.filter(activity_log::Column::SubjectId.eq(subject_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(activity_log::Column::ProductId.eq(product_id));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(activity_log::Column::UserId.eq(user_id));
        }

        let paginator = query
            .order_by_desc(activity_log::Column::CreatedAt)
            .paginate(db, limit.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((rows, total))
    }
}
