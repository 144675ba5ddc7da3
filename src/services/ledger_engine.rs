use crate::config::LedgerSettings;
use crate::entities::{
    product::{self, Entity as Product},
    stock_movement::{self, MovementType, Reference},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{
    record_best_effort, AuditEntry, AuditSink, ACTION_STOCK_DELETE, ACTION_STOCK_UPDATE,
    SUBJECT_STOCK_MOVEMENT,
};
use crate::services::balance_store::{merge_changes, BalanceChange, BalanceStore};
use crate::services::effects::{effects_of, ensure_storable, reversal_of, MovementShape};
use crate::services::locks::{BalanceKey, BalanceLocks};
use crate::services::movement_ledger::{MovementLedger, MovementQuery, NewMovement};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, DatabaseTransaction, EntityTrait, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Storage scale of quantity columns.
const QUANTITY_SCALE: u32 = 4;

/// A movement as submitted by a caller, before defaults are resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    /// Destination for in, transfer and adjustment; depleted warehouse for out.
    pub warehouse_id: Uuid,
    /// Source warehouse, required for transfers only.
    pub from_warehouse_id: Option<Uuid>,
    pub product_id: Uuid,
    /// Magnitude for in/out/transfer, signed delta for adjustment.
    #[schema(value_type = String, example = "12.5")]
    pub quantity: Decimal,
    /// Defaults to the product's cost price.
    pub unit_cost: Option<Decimal>,
    /// Business timestamp. Defaults to now.
    pub movement_date: Option<DateTime<Utc>>,
    pub reference: Option<Reference>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl MovementRequest {
    fn shape(&self) -> MovementShape {
        MovementShape {
            movement_type: self.movement_type,
            warehouse_id: self.warehouse_id,
            from_warehouse_id: self.from_warehouse_id,
            product_id: self.product_id,
            quantity: self.quantity,
        }
    }
}

/// Structural checks done before any storage access.
pub fn validate_request(request: &MovementRequest) -> Result<(), ServiceError> {
    request.validate()?;

    if request.quantity.scale() > QUANTITY_SCALE
        && request.quantity.normalize().scale() > QUANTITY_SCALE
    {
        return Err(ServiceError::ValidationError(format!(
            "quantity: at most {} decimal places are allowed",
            QUANTITY_SCALE
        )));
    }

    ensure_storable("quantity", request.quantity)?;

    match request.movement_type {
        MovementType::Adjustment => {
            if request.quantity.is_zero() {
                return Err(ServiceError::ValidationError(
                    "quantity: adjustment must be non-zero".to_string(),
                ));
            }
        }
        MovementType::In | MovementType::Out | MovementType::Transfer => {
            if request.quantity <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "quantity: must be greater than 0".to_string(),
                ));
            }
        }
    }

    match (request.movement_type, request.from_warehouse_id) {
        (MovementType::Transfer, None) => {
            return Err(ServiceError::ValidationError(
                "from_warehouse_id: required for transfer movements".to_string(),
            ))
        }
        (MovementType::Transfer, Some(from)) if from == request.warehouse_id => {
            return Err(ServiceError::ValidationError(
                "from_warehouse_id: must differ from warehouse_id".to_string(),
            ))
        }
        (MovementType::Transfer, Some(_)) => {}
        (_, Some(_)) => {
            return Err(ServiceError::ValidationError(
                "from_warehouse_id: only allowed for transfer movements".to_string(),
            ))
        }
        (_, None) => {}
    }

    if matches!(request.unit_cost, Some(cost) if cost < Decimal::ZERO) {
        return Err(ServiceError::ValidationError(
            "unit_cost: must not be negative".to_string(),
        ));
    }
    if let Some(cost) = request.unit_cost {
        ensure_storable("unit_cost", cost)?;
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppliedMovement {
    pub movement: stock_movement::Model,
    pub balances: Vec<BalanceChange>,
    /// Non-fatal problems, such as an audit entry that could not be written.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EditedMovement {
    pub previous: stock_movement::Model,
    pub movement: stock_movement::Model,
    pub balances: Vec<BalanceChange>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeletedMovement {
    pub movement: stock_movement::Model,
    pub balances: Vec<BalanceChange>,
    pub warnings: Vec<String>,
}

/// Ledger listing filter. Dates are calendar days in the business timezone,
/// both ends inclusive.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovementFilter {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub movement_type: Option<MovementType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// UTC instant at which `date` begins in `offset`.
pub fn day_start_utc(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = date.and_time(chrono::NaiveTime::MIN);
    Utc.from_utc_datetime(
        &(local_midnight - ChronoDuration::seconds(offset.local_minus_utc() as i64)),
    )
}

impl MovementFilter {
    pub fn to_query(&self, offset: FixedOffset) -> Result<MovementQuery, ServiceError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ServiceError::ValidationError(
                    "date_from: must not be after date_to".to_string(),
                ));
            }
        }
        Ok(MovementQuery {
            warehouse_id: self.warehouse_id,
            product_id: self.product_id,
            movement_type: self.movement_type,
            since: self.date_from.map(|d| day_start_utc(d, offset)),
            until: self
                .date_to
                .map(|d| day_start_utc(d, offset) + ChronoDuration::days(1)),
        })
    }
}

/// Result of applying a movement inside a caller-owned transaction.
pub(crate) struct Applied {
    pub movement: stock_movement::Model,
    pub balances: Vec<BalanceChange>,
    pub product: product::Model,
}

/// Applies and reverses stock movements against the balance store.
///
/// Per-balance locks are taken before the storage transaction begins, so a
/// transaction never waits on another one holding the same keys.
#[derive(Clone)]
pub struct LedgerEngine {
    db: Arc<DatabaseConnection>,
    locks: BalanceLocks,
    settings: LedgerSettings,
    audit: Arc<dyn AuditSink>,
    event_sender: Option<EventSender>,
}

impl LedgerEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: LedgerSettings,
        audit: Arc<dyn AuditSink>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            locks: BalanceLocks::new(settings.lock_timeout),
            settings,
            audit,
            event_sender,
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub(crate) fn locks(&self) -> &BalanceLocks {
        &self.locks
    }

    pub(crate) fn audit_sink(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    pub(crate) fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }

    /// Runs `operation`, replaying it when it fails with a retryable
    /// conflict, up to the configured number of extra attempts.
    pub(crate) async fn with_conflict_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut attempt_fn: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_retryable() && attempt < self.settings.max_conflict_retries => {
                    attempt += 1;
                    counter!("stock_ledger.conflict_retries", 1);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        error = %e,
                        "Retrying after concurrency conflict"
                    );
                    tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
                }
                other => return other,
            }
        }
    }

    async fn load_product(
        txn: &DatabaseTransaction,
        product_id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        Product::find_by_id(product_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    fn resolve(
        request: &MovementRequest,
        product: &product::Model,
        actor: Option<Uuid>,
        default_date: DateTime<Utc>,
    ) -> NewMovement {
        NewMovement {
            movement_type: request.movement_type,
            warehouse_id: request.warehouse_id,
            from_warehouse_id: request.from_warehouse_id,
            product_id: request.product_id,
            quantity: request.quantity,
            unit_cost: request.unit_cost.or(product.cost_price),
            reference: request.reference,
            notes: request.notes.clone(),
            user_id: actor,
            movement_date: request.movement_date.unwrap_or(default_date),
        }
    }

    /// Applies one movement inside `txn`. The caller must hold the locks for
    /// the request's balance keys.
    pub(crate) async fn apply_within(
        &self,
        txn: &DatabaseTransaction,
        request: &MovementRequest,
        actor: Option<Uuid>,
    ) -> Result<Applied, ServiceError> {
        let product = Self::load_product(txn, request.product_id).await?;

        let balances = if product.track_quantity {
            BalanceStore::apply(txn, &effects_of(&request.shape())?).await?
        } else {
            Vec::new()
        };

        let movement =
            MovementLedger::append(txn, Self::resolve(request, &product, actor, Utc::now()))
                .await?;

        Ok(Applied {
            movement,
            balances,
            product,
        })
    }

    /// Undoes the balance effect of a stored movement inside `txn`. Products
    /// that do not track quantity have nothing to undo.
    async fn reverse_within(
        &self,
        txn: &DatabaseTransaction,
        movement: &stock_movement::Model,
    ) -> Result<(product::Model, Vec<BalanceChange>), ServiceError> {
        let product = Self::load_product(txn, movement.product_id).await?;
        if !product.track_quantity {
            return Ok((product, Vec::new()));
        }
        let changes =
            BalanceStore::apply(txn, &reversal_of(&MovementShape::from(movement))?).await?;
        Ok((product, changes))
    }

    /// Applies a movement to the balance store and appends it to the ledger.
    #[instrument(skip(self, request), fields(movement_type = %request.movement_type, product_id = %request.product_id))]
    pub async fn apply(
        &self,
        request: MovementRequest,
        actor: Option<Uuid>,
    ) -> Result<AppliedMovement, ServiceError> {
        validate_request(&request)?;

        let applied = self
            .with_conflict_retry("apply", || async {
                let _guard = self.locks.acquire(request.shape().keys()).await?;
                let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
                let applied = self.apply_within(&txn, &request, actor).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok::<_, ServiceError>(applied)
            })
            .await?;

        counter!("stock_ledger.movements.applied", 1);
        info!(
            movement_id = %applied.movement.id,
            quantity = %applied.movement.quantity,
            "Stock movement applied"
        );

        let mut warnings = Vec::new();
        let entry = movement_audit_entry(&applied.movement, &applied.balances, actor);
        warnings.extend(record_best_effort(self.audit.as_ref(), entry).await);
        self.publish_applied(&applied).await;

        Ok(AppliedMovement {
            movement: applied.movement,
            balances: applied.balances,
            warnings,
        })
    }

    /// Edits a movement: reverses the stored effect, applies the new one and
    /// replaces the record, all in one transaction. When the reversal fails
    /// nothing changes.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        movement_id: Uuid,
        request: MovementRequest,
        actor: Option<Uuid>,
    ) -> Result<EditedMovement, ServiceError> {
        validate_request(&request)?;

        let (previous, movement, balances, product) = self
            .with_conflict_retry("update", || async {
                let snapshot = MovementLedger::get(&*self.db, movement_id).await?;
                let old_keys = MovementShape::from(&snapshot).keys();
                let keys = old_keys.iter().copied().chain(request.shape().keys());
                let _guard = self.locks.acquire(keys).await?;

                let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
                let previous = MovementLedger::get(&txn, movement_id).await?;
                ensure_same_keys(&old_keys, &previous)?;

                let (_, mut changes) = self.reverse_within(&txn, &previous).await?;

                let product = Self::load_product(&txn, request.product_id).await?;
                if product.track_quantity {
                    changes.extend(
                        BalanceStore::apply(&txn, &effects_of(&request.shape())?).await?,
                    );
                }

                let resolved = Self::resolve(
                    &request,
                    &product,
                    actor.or(previous.user_id),
                    previous.movement_date,
                );
                let movement = MovementLedger::replace(&txn, &previous, resolved).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;

                Ok::<_, ServiceError>((previous, movement, merge_changes(changes), product))
            })
            .await?;

        counter!("stock_ledger.movements.updated", 1);
        info!(movement_id = %movement.id, "Stock movement updated");

        let mut warnings = Vec::new();
        let entry = AuditEntry {
            action: ACTION_STOCK_UPDATE.to_string(),
            subject_type: SUBJECT_STOCK_MOVEMENT,
            subject_id: movement.id,
            product_id: Some(movement.product_id),
            old_values: serde_json::to_value(&previous).ok(),
            new_values: Some(json!({ "movement": &movement, "balances": &balances })),
            description: Some(format!(
                "{} of {} edited to {} of {}",
                previous.movement_type,
                previous.quantity.normalize(),
                movement.movement_type,
                movement.quantity.normalize()
            )),
            user_id: actor,
        };
        warnings.extend(record_best_effort(self.audit.as_ref(), entry).await);

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::MovementUpdated {
                movement_id: movement.id,
                product_id: movement.product_id,
            });
        }
        self.alert_if_below_minimum(&product, &balances).await;

        Ok(EditedMovement {
            previous,
            movement,
            balances,
            warnings,
        })
    }

    /// Reverses a movement's effect and removes it from the ledger.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        movement_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<DeletedMovement, ServiceError> {
        let (movement, balances, product) = self
            .with_conflict_retry("delete", || async {
                let snapshot = MovementLedger::get(&*self.db, movement_id).await?;
                let keys = MovementShape::from(&snapshot).keys();
                let _guard = self.locks.acquire(keys.iter().copied()).await?;

                let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
                let movement = MovementLedger::get(&txn, movement_id).await?;
                ensure_same_keys(&keys, &movement)?;

                let (product, changes) = self.reverse_within(&txn, &movement).await?;
                MovementLedger::delete(&txn, movement_id).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;

                Ok::<_, ServiceError>((movement, changes, product))
            })
            .await?;

        counter!("stock_ledger.movements.deleted", 1);
        info!(movement_id = %movement.id, "Stock movement deleted");

        let mut warnings = Vec::new();
        let entry = AuditEntry {
            action: ACTION_STOCK_DELETE.to_string(),
            subject_type: SUBJECT_STOCK_MOVEMENT,
            subject_id: movement.id,
            product_id: Some(movement.product_id),
            old_values: serde_json::to_value(&movement).ok(),
            new_values: Some(json!({ "balances": &balances })),
            description: Some(format!(
                "{} of {} deleted",
                movement.movement_type,
                movement.quantity.normalize()
            )),
            user_id: actor,
        };
        warnings.extend(record_best_effort(self.audit.as_ref(), entry).await);

        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::MovementDeleted {
                movement_id: movement.id,
                product_id: movement.product_id,
            });
        }
        self.alert_if_below_minimum(&product, &balances).await;

        Ok(DeletedMovement {
            movement,
            balances,
            warnings,
        })
    }

    #[instrument(skip(self))]
    pub async fn get(&self, movement_id: Uuid) -> Result<stock_movement::Model, ServiceError> {
        MovementLedger::get(&*self.db, movement_id).await
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: &MovementFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let query = filter.to_query(self.settings.business_offset)?;
        MovementLedger::list(&*self.db, &query, page, limit).await
    }

    /// Post-commit notifications for an applied movement.
    pub(crate) async fn publish_applied(&self, applied: &Applied) {
        if let Some(sender) = &self.event_sender {
            let movement = &applied.movement;
            sender.send_or_log(Event::MovementApplied {
                movement_id: movement.id,
                movement_type: movement.movement_type,
                product_id: movement.product_id,
                warehouse_id: movement.warehouse_id,
                from_warehouse_id: movement.from_warehouse_id,
                quantity: movement.quantity,
            });
        }
        self.alert_if_below_minimum(&applied.product, &applied.balances)
            .await;
    }

    async fn alert_if_below_minimum(&self, product: &product::Model, balances: &[BalanceChange]) {
        let decreased = balances.iter().any(|b| b.after < b.before);
        if !decreased || !product.track_quantity || product.min_stock <= Decimal::ZERO {
            return;
        }
        let Some(sender) = &self.event_sender else {
            return;
        };

        match BalanceStore::total_for_product(&*self.db, product.id).await {
            Ok(total) if total < product.min_stock => {
                sender.send_or_log(Event::StockBelowMinimum {
                    product_id: product.id,
                    total_quantity: total,
                    min_stock: product.min_stock,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(product_id = %product.id, error = %e, "Could not check minimum stock"),
        }
    }
}

/// A movement edited between the unlocked read and the locked re-read may
/// now touch balances we do not hold.
fn ensure_same_keys(
    locked: &[BalanceKey],
    movement: &stock_movement::Model,
) -> Result<(), ServiceError> {
    let current = MovementShape::from(movement).keys();
    if current.iter().all(|k| locked.contains(k)) {
        Ok(())
    } else {
        Err(ServiceError::ConcurrencyConflict(format!(
            "stock movement {} changed while waiting for locks",
            movement.id
        )))
    }
}

pub(crate) fn movement_audit_entry(
    movement: &stock_movement::Model,
    balances: &[BalanceChange],
    actor: Option<Uuid>,
) -> AuditEntry {
    AuditEntry {
        action: format!("stock_{}", movement.movement_type),
        subject_type: SUBJECT_STOCK_MOVEMENT,
        subject_id: movement.id,
        product_id: Some(movement.product_id),
        old_values: None,
        new_values: Some(json!({ "movement": movement, "balances": balances })),
        description: Some(format!(
            "{} of {}",
            movement.movement_type,
            movement.quantity.normalize()
        )),
        user_id: actor,
    }
}
