//! Balance effects of a movement and of its reversal.
//!
//! Pure functions shared by the engine (which applies the deltas under lock)
//! and the consistency report (which replays them in memory).

use crate::entities::stock_movement::{self, MovementType};
use crate::errors::ServiceError;
use crate::services::locks::BalanceKey;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Which message a failed decrement surfaces to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    Outbound,
    TransferSource,
    Adjustment,
    ReverseRemoval,
    ReverseTarget,
}

impl Shortfall {
    pub fn message(self) -> &'static str {
        match self {
            Shortfall::Outbound | Shortfall::Adjustment => "Insufficient stock.",
            Shortfall::TransferSource => "Insufficient stock in source warehouse.",
            Shortfall::ReverseRemoval => "Cannot reverse movement: insufficient stock to remove.",
            Shortfall::ReverseTarget => {
                "Cannot reverse movement: insufficient stock in target warehouse."
            }
        }
    }
}

/// Signed change to one balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub key: BalanceKey,
    pub delta: Decimal,
    pub shortfall: Shortfall,
}

/// The parts of a movement that determine its balance effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementShape {
    pub movement_type: MovementType,
    pub warehouse_id: Uuid,
    pub from_warehouse_id: Option<Uuid>,
    pub product_id: Uuid,
    pub quantity: Decimal,
}

impl From<&stock_movement::Model> for MovementShape {
    fn from(movement: &stock_movement::Model) -> Self {
        Self {
            movement_type: movement.movement_type,
            warehouse_id: movement.warehouse_id,
            from_warehouse_id: movement.from_warehouse_id,
            product_id: movement.product_id,
            quantity: movement.quantity,
        }
    }
}

impl MovementShape {
    fn key(&self, warehouse_id: Uuid) -> BalanceKey {
        BalanceKey::new(warehouse_id, self.product_id)
    }

    fn source(&self) -> Result<Uuid, ServiceError> {
        self.from_warehouse_id.ok_or_else(|| {
            ServiceError::ValidationError(
                "from_warehouse_id is required for transfer movements".to_string(),
            )
        })
    }

    /// Balances touched by this movement (and equally by its reversal).
    pub fn keys(&self) -> Vec<BalanceKey> {
        match (self.movement_type, self.from_warehouse_id) {
            (MovementType::Transfer, Some(from)) => {
                vec![self.key(from), self.key(self.warehouse_id)]
            }
            _ => vec![self.key(self.warehouse_id)],
        }
    }
}

fn delta(key: BalanceKey, delta: Decimal, shortfall: Shortfall) -> BalanceDelta {
    BalanceDelta {
        key,
        delta,
        shortfall,
    }
}

/// Deltas applying `movement`, in application order. A transfer decrements
/// the source before incrementing the destination.
pub fn effects_of(movement: &MovementShape) -> Result<Vec<BalanceDelta>, ServiceError> {
    let target = movement.key(movement.warehouse_id);
    let qty = movement.quantity;
    Ok(match movement.movement_type {
        MovementType::In => vec![delta(target, qty, Shortfall::Outbound)],
        MovementType::Out => vec![delta(target, -qty, Shortfall::Outbound)],
        MovementType::Transfer => {
            let source = movement.key(movement.source()?);
            vec![
                delta(source, -qty, Shortfall::TransferSource),
                delta(target, qty, Shortfall::TransferSource),
            ]
        }
        MovementType::Adjustment => vec![delta(target, qty, Shortfall::Adjustment)],
    })
}

/// Deltas undoing `movement`, in application order. A transfer is returned
/// to its source before the destination is decremented.
pub fn reversal_of(movement: &MovementShape) -> Result<Vec<BalanceDelta>, ServiceError> {
    let target = movement.key(movement.warehouse_id);
    let qty = movement.quantity;
    Ok(match movement.movement_type {
        MovementType::In => vec![delta(target, -qty, Shortfall::ReverseRemoval)],
        MovementType::Out => vec![delta(target, qty, Shortfall::ReverseRemoval)],
        MovementType::Transfer => {
            let source = movement.key(movement.source()?);
            vec![
                delta(source, qty, Shortfall::ReverseTarget),
                delta(target, -qty, Shortfall::ReverseTarget),
            ]
        }
        MovementType::Adjustment => vec![delta(target, -qty, Shortfall::ReverseRemoval)],
    })
}

/// Largest magnitude a `decimal(15, 4)` column holds.
pub const MAX_AMOUNT: Decimal = dec!(99999999999.9999);

/// Rejects amounts the storage columns cannot hold.
pub fn ensure_storable(field: &str, value: Decimal) -> Result<(), ServiceError> {
    if value.abs() > MAX_AMOUNT {
        return Err(ServiceError::ValidationError(format!(
            "{}: must not exceed {}",
            field, MAX_AMOUNT
        )));
    }
    Ok(())
}

/// Resulting quantity of `current + change`, or `InsufficientStock` when it
/// would drop below zero.
pub fn checked_quantity(
    current: Decimal,
    change: Decimal,
    shortfall: Shortfall,
) -> Result<Decimal, ServiceError> {
    let next = current
        .checked_add(change)
        .filter(|next| *next <= MAX_AMOUNT)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "quantity: resulting balance must not exceed {}",
                MAX_AMOUNT
            ))
        })?;
    if next < Decimal::ZERO {
        return Err(ServiceError::InsufficientStock(format!(
            "{} (available {}, requested {})",
            shortfall.message(),
            current.normalize(),
            change.abs().normalize()
        )));
    }
    Ok(next)
}
