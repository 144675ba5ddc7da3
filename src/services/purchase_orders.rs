use crate::entities::{
    purchase_order::{self, Entity as PurchaseOrder, PurchaseOrderStatus},
    purchase_order_item::{self, Entity as PurchaseOrderItem},
    stock_movement::{self, MovementType, Reference},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{
    record_best_effort, AuditEntry, ACTION_PO_CANCELLED, ACTION_PO_CREATED, ACTION_PO_RECEIVED,
    ACTION_PO_SENT, SUBJECT_PURCHASE_ORDER,
};
use crate::services::balance_store::{merge_changes, BalanceChange};
use crate::services::effects::{ensure_storable, MAX_AMOUNT};
use crate::services::locks::BalanceKey;
use crate::services::ledger_engine::{
    movement_audit_entry, validate_request, Applied, LedgerEngine, MovementRequest,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePurchaseOrderItem {
    pub product_id: Uuid,
    #[schema(value_type = String, example = "10")]
    pub quantity: Decimal,
    #[schema(value_type = String, example = "5.00")]
    pub unit_price: Decimal,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePurchaseOrder {
    #[validate(length(min = 1, max = 64))]
    pub order_number: String,
    pub supplier_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub order_date: Option<DateTime<Utc>>,
    pub expected_date: Option<DateTime<Utc>>,
    pub tax_amount: Option<Decimal>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(min = 1))]
    pub items: Vec<CreatePurchaseOrderItem>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchaseOrderWithItems {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedPurchaseOrder {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
    /// Non-fatal problems, such as an audit entry that could not be written.
    pub warnings: Vec<String>,
}

/// Result of a send or cancel.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchaseOrderOutcome {
    pub order: purchase_order::Model,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReceivedPurchaseOrder {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
    /// One "in" movement per line that still had quantity outstanding.
    pub movements: Vec<stock_movement::Model>,
    pub balances: Vec<BalanceChange>,
    pub warnings: Vec<String>,
}

/// Order amounts derived from its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTotals {
    pub line_totals: Vec<Decimal>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Line totals, subtotal and total of an order. Fails when any amount would
/// not fit the order's amount columns.
pub fn compute_totals(
    items: &[CreatePurchaseOrderItem],
    tax_amount: Decimal,
) -> Result<OrderTotals, ServiceError> {
    let mut line_totals = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;
    for (index, item) in items.iter().enumerate() {
        let line_total = item
            .quantity
            .checked_mul(item.unit_price)
            .ok_or_else(|| too_large(&format!("items[{}].total", index)))?;
        ensure_storable(&format!("items[{}].total", index), line_total)?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or_else(|| too_large("subtotal"))?;
        line_totals.push(line_total);
    }
    ensure_storable("subtotal", subtotal)?;
    let total = subtotal
        .checked_add(tax_amount)
        .ok_or_else(|| too_large("total"))?;
    ensure_storable("total", total)?;

    Ok(OrderTotals {
        line_totals,
        subtotal,
        tax_amount,
        total,
    })
}

fn too_large(field: &str) -> ServiceError {
    ServiceError::ValidationError(format!("{}: must not exceed {}", field, MAX_AMOUNT))
}

fn validate_order(order: &CreatePurchaseOrder) -> Result<(), ServiceError> {
    order.validate()?;
    for (index, item) in order.items.iter().enumerate() {
        item.validate()?;
        if item.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "items[{}].quantity: must be greater than 0",
                index
            )));
        }
        if item.quantity.normalize().scale() > 4 {
            return Err(ServiceError::ValidationError(format!(
                "items[{}].quantity: at most 4 decimal places are allowed",
                index
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "items[{}].unit_price: must not be negative",
                index
            )));
        }
        ensure_storable(&format!("items[{}].quantity", index), item.quantity)?;
        ensure_storable(&format!("items[{}].unit_price", index), item.unit_price)?;
    }
    if let Some(tax) = order.tax_amount {
        if tax < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "tax_amount: must not be negative".to_string(),
            ));
        }
        ensure_storable("tax_amount", tax)?;
    }
    Ok(())
}

/// Purchase order lifecycle: draft, sent, received, or cancelled. Receiving
/// posts one "in" movement per outstanding line through the ledger engine.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DatabaseConnection>,
    engine: LedgerEngine,
    event_sender: Option<EventSender>,
}

impl PurchaseOrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        engine: LedgerEngine,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            engine,
            event_sender,
        }
    }

    async fn find_order<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        PurchaseOrder::find_by_id(id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", id)))
    }

    async fn find_items<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
        PurchaseOrderItem::find()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(order_id))
            .order_by_asc(purchase_order_item::Column::CreatedAt)
            .order_by_asc(purchase_order_item::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Moves the order from `from` to `to`, failing with a conflict when
    /// another request changed its status first.
    async fn set_status<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
        received_date: Option<DateTime<Utc>>,
    ) -> Result<(), ServiceError> {
        let mut update = PurchaseOrder::update_many()
            .col_expr(purchase_order::Column::Status, Expr::value(to.to_value()))
            .col_expr(purchase_order::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(date) = received_date {
            update = update.col_expr(purchase_order::Column::ReceivedDate, Expr::value(date));
        }
        let result = update
            .filter(purchase_order::Column::Id.eq(id))
            .filter(purchase_order::Column::Status.eq(from.to_value()))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "purchase order {} changed status concurrently",
                id
            )));
        }
        Ok(())
    }

    async fn audit(
        &self,
        action: &str,
        order: &purchase_order::Model,
        old: Option<&purchase_order::Model>,
        actor: Option<Uuid>,
    ) -> Option<String> {
        let entry = AuditEntry {
            action: action.to_string(),
            subject_type: SUBJECT_PURCHASE_ORDER,
            subject_id: order.id,
            product_id: None,
            old_values: old.and_then(|o| serde_json::to_value(o).ok()),
            new_values: serde_json::to_value(order).ok(),
            description: Some(format!("Purchase order {} {}", order.order_number, order.status)),
            user_id: actor,
        };
        record_best_effort(self.engine.audit_sink(), entry).await
    }

    /// Creates a draft order with its lines.
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    pub async fn create(
        &self,
        request: CreatePurchaseOrder,
        actor: Option<Uuid>,
    ) -> Result<CreatedPurchaseOrder, ServiceError> {
        validate_order(&request)?;
        let totals = compute_totals(&request.items, request.tax_amount.unwrap_or(Decimal::ZERO))?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let order = purchase_order::ActiveModel {
            id: Set(order_id),
            order_number: Set(request.order_number.trim().to_string()),
            supplier_id: Set(request.supplier_id),
            warehouse_id: Set(request.warehouse_id),
            status: Set(PurchaseOrderStatus::Draft),
            order_date: Set(request.order_date.unwrap_or(now)),
            expected_date: Set(request.expected_date),
            received_date: Set(None),
            subtotal: Set(totals.subtotal),
            tax_amount: Set(totals.tax_amount),
            total: Set(totals.total),
            notes: Set(request.notes.clone()),
            created_by: Set(actor),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from_write)?;

        let mut items = Vec::with_capacity(request.items.len());
        for (item, line_total) in request.items.iter().zip(totals.line_totals.iter()) {
            let saved = purchase_order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                received_quantity: Set(Decimal::ZERO),
                unit_price: Set(item.unit_price),
                total: Set(*line_total),
                notes: Set(item.notes.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::from_write)?;
            items.push(saved);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stock_ledger.purchase_orders.created", 1);
        info!(purchase_order_id = %order.id, lines = items.len(), "Purchase order created");
        let warnings: Vec<String> = self
            .audit(ACTION_PO_CREATED, &order, None, actor)
            .await
            .into_iter()
            .collect();
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::PurchaseOrderCreated(order.id));
        }

        Ok(CreatedPurchaseOrder {
            order,
            items,
            warnings,
        })
    }

    async fn transition(
        &self,
        id: Uuid,
        allowed: fn(PurchaseOrderStatus) -> bool,
        to: PurchaseOrderStatus,
        verb: &str,
    ) -> Result<(purchase_order::Model, purchase_order::Model), ServiceError> {
        self.engine
            .with_conflict_retry(verb, || async {
                let current = Self::find_order(&*self.db, id).await?;
                if !allowed(current.status) {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Cannot {} purchase order in status {}",
                        verb, current.status
                    )));
                }
                Self::set_status(&*self.db, id, current.status, to, None).await?;
                let updated = Self::find_order(&*self.db, id).await?;
                Ok::<_, ServiceError>((current, updated))
            })
            .await
    }

    /// draft → sent
    #[instrument(skip(self))]
    pub async fn send(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<PurchaseOrderOutcome, ServiceError> {
        let (previous, order) = self
            .transition(id, PurchaseOrderStatus::can_send, PurchaseOrderStatus::Sent, "send")
            .await?;
        info!(purchase_order_id = %id, "Purchase order sent");
        let warnings = self
            .audit(ACTION_PO_SENT, &order, Some(&previous), actor)
            .await
            .into_iter()
            .collect();
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::PurchaseOrderSent(id));
        }
        Ok(PurchaseOrderOutcome { order, warnings })
    }

    /// draft | sent → cancelled
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<PurchaseOrderOutcome, ServiceError> {
        let (previous, order) = self
            .transition(
                id,
                PurchaseOrderStatus::can_cancel,
                PurchaseOrderStatus::Cancelled,
                "cancel",
            )
            .await?;
        info!(purchase_order_id = %id, "Purchase order cancelled");
        let warnings = self
            .audit(ACTION_PO_CANCELLED, &order, Some(&previous), actor)
            .await
            .into_iter()
            .collect();
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::PurchaseOrderCancelled(id));
        }
        Ok(PurchaseOrderOutcome { order, warnings })
    }

    /// Receives everything still outstanding on the order in one transaction:
    /// either every line is posted and the order is `received`, or nothing
    /// changes.
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<ReceivedPurchaseOrder, ServiceError> {
        let (previous, order, items, applied) = self
            .engine
            .with_conflict_retry("receive", || async {
                let order = Self::find_order(&*self.db, id).await?;
                if !order.status.can_receive() {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Cannot receive purchase order in status {}",
                        order.status
                    )));
                }
                let items = Self::find_items(&*self.db, id).await?;

                let mut lines = Vec::new();
                for item in items.iter().filter(|i| i.remaining() > Decimal::ZERO) {
                    let request = MovementRequest {
                        movement_type: MovementType::In,
                        warehouse_id: order.warehouse_id,
                        from_warehouse_id: None,
                        product_id: item.product_id,
                        quantity: item.remaining(),
                        unit_cost: Some(item.unit_price),
                        movement_date: None,
                        reference: Some(Reference::purchase_order(order.id)),
                        notes: Some(format!("Purchase order {}", order.order_number)),
                    };
                    validate_request(&request)?;
                    lines.push((item, request));
                }

                let keys = lines
                    .iter()
                    .map(|(_, r)| BalanceKey::new(r.warehouse_id, r.product_id));
                let _guard = self.engine.locks().acquire(keys).await?;

                let txn = self
                    .engine
                    .db()
                    .begin()
                    .await
                    .map_err(ServiceError::db_error)?;
                let now = Utc::now();

                let mut applied: Vec<Applied> = Vec::with_capacity(lines.len());
                for (item, request) in &lines {
                    applied.push(self.engine.apply_within(&txn, request, actor).await?);
                    PurchaseOrderItem::update_many()
                        .col_expr(
                            purchase_order_item::Column::ReceivedQuantity,
                            Expr::value(item.quantity),
                        )
                        .col_expr(purchase_order_item::Column::UpdatedAt, Expr::value(now))
                        .filter(purchase_order_item::Column::Id.eq(item.id))
                        .exec(&txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                }

                Self::set_status(
                    &txn,
                    id,
                    order.status,
                    PurchaseOrderStatus::Received,
                    Some(now),
                )
                .await?;

                let updated = Self::find_order(&txn, id).await?;
                let updated_items = Self::find_items(&txn, id).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;

                Ok::<_, ServiceError>((order, updated, updated_items, applied))
            })
            .await?;

        counter!("stock_ledger.purchase_orders.received", 1);
        counter!("stock_ledger.movements.applied", applied.len() as u64);
        info!(
            purchase_order_id = %id,
            movements = applied.len(),
            "Purchase order received"
        );

        let mut warnings = Vec::new();
        for a in &applied {
            let entry = movement_audit_entry(&a.movement, &a.balances, actor);
            warnings.extend(record_best_effort(self.engine.audit_sink(), entry).await);
            self.engine.publish_applied(a).await;
        }
        let entry = AuditEntry {
            action: ACTION_PO_RECEIVED.to_string(),
            subject_type: SUBJECT_PURCHASE_ORDER,
            subject_id: order.id,
            product_id: None,
            old_values: serde_json::to_value(&previous).ok(),
            new_values: Some(json!({
                "order": &order,
                "movement_ids": applied.iter().map(|a| a.movement.id).collect::<Vec<_>>(),
            })),
            description: Some(format!("Purchase order {} received", order.order_number)),
            user_id: actor,
        };
        warnings.extend(record_best_effort(self.engine.audit_sink(), entry).await);

        let movement_ids: Vec<Uuid> = applied.iter().map(|a| a.movement.id).collect();
        if let Some(sender) = self.event_sender.as_ref().or(self.engine.event_sender()) {
            sender.send_or_log(Event::PurchaseOrderReceived {
                purchase_order_id: order.id,
                movement_ids,
            });
        }

        let balances = merge_changes(applied.iter().flat_map(|a| a.balances.iter().copied()));
        Ok(ReceivedPurchaseOrder {
            order,
            items,
            movements: applied.into_iter().map(|a| a.movement).collect(),
            balances,
            warnings,
        })
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<PurchaseOrderWithItems, ServiceError> {
        let order = Self::find_order(&*self.db, id).await?;
        let items = Self::find_items(&*self.db, id).await?;
        Ok(PurchaseOrderWithItems { order, items })
    }

    /// Newest order date first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        status: Option<PurchaseOrderStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<purchase_order::Model>, u64), ServiceError> {
        let mut query = PurchaseOrder::find();
        if let Some(status) = status {
            query = query.filter(purchase_order::Column::Status.eq(status.to_value()));
        }
        let paginator = query
            .order_by_desc(purchase_order::Column::OrderDate)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok((orders, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn item(quantity: Decimal, unit_price: Decimal) -> CreatePurchaseOrderItem {
        CreatePurchaseOrderItem {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            notes: None,
        }
    }

    fn order(items: Vec<CreatePurchaseOrderItem>) -> CreatePurchaseOrder {
        CreatePurchaseOrder {
            order_number: "PO-1001".into(),
            supplier_id: None,
            warehouse_id: Uuid::new_v4(),
            order_date: None,
            expected_date: None,
            tax_amount: Some(dec!(18)),
            notes: None,
            items,
        }
    }

    #[test]
    fn totals_sum_lines_plus_tax() {
        let totals = compute_totals(
            &[item(dec!(10), dec!(5)), item(dec!(3), dec!(20))],
            dec!(18),
        )
        .unwrap();
        assert_eq!(totals.line_totals, vec![dec!(50), dec!(60)]);
        assert_eq!(totals.subtotal, dec!(110));
        assert_eq!(totals.total, dec!(128));
    }

    #[test]
    fn order_needs_lines_with_positive_quantity() {
        assert_matches!(
            validate_order(&order(vec![])),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            validate_order(&order(vec![item(dec!(0), dec!(1))])),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].quantity")
        );
        assert_matches!(
            validate_order(&order(vec![item(dec!(1), dec!(-1))])),
            Err(ServiceError::ValidationError(msg)) if msg.contains("unit_price")
        );
        assert!(validate_order(&order(vec![item(dec!(2), dec!(0))])).is_ok());
    }

    #[test]
    fn amounts_must_fit_their_columns() {
        assert_matches!(
            validate_order(&order(vec![item(dec!(10000000000000000000), dec!(1))])),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].quantity")
        );
        assert_matches!(
            validate_order(&order(vec![item(dec!(1), Decimal::MAX)])),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].unit_price")
        );

        let mut taxed = order(vec![item(dec!(1), dec!(1))]);
        taxed.tax_amount = Some(Decimal::MAX);
        assert_matches!(
            validate_order(&taxed),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("tax_amount")
        );
    }

    #[test]
    fn totals_reject_overflowing_lines() {
        assert_matches!(
            compute_totals(&[item(Decimal::MAX, dec!(2))], dec!(0)),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].total")
        );
        assert_matches!(
            compute_totals(&[item(dec!(99999999999), dec!(99999))], dec!(0)),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].total")
        );
        assert_matches!(
            compute_totals(
                &[item(dec!(60000000000), dec!(1)), item(dec!(60000000000), dec!(1))],
                dec!(0)
            ),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("subtotal")
        );
        assert_matches!(
            compute_totals(&[item(dec!(60000000000), dec!(1))], dec!(60000000000)),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("total")
        );
    }
}
