use crate::entities::stock_movement::MovementType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events published after ledger and receiving transactions commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Movement events
    MovementApplied {
        movement_id: Uuid,
        movement_type: MovementType,
        product_id: Uuid,
        warehouse_id: Uuid,
        from_warehouse_id: Option<Uuid>,
        quantity: Decimal,
    },
    MovementUpdated {
        movement_id: Uuid,
        product_id: Uuid,
    },
    MovementDeleted {
        movement_id: Uuid,
        product_id: Uuid,
    },

    // Purchase order events
    PurchaseOrderCreated(Uuid),
    PurchaseOrderSent(Uuid),
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        movement_ids: Vec<Uuid>,
    },
    PurchaseOrderCancelled(Uuid),

    // Stock level alerts
    StockBelowMinimum {
        product_id: Uuid,
        total_quantity: Decimal,
        min_stock: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without waiting for channel capacity. Failures are logged and
    /// never surface to the caller, whose transaction has already committed.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            metrics::counter!("stock_ledger.events.dropped", 1);
            warn!("Dropping event: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Stock alerts are raised at
/// warn level so they stand out in log aggregation.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockBelowMinimum {
                product_id,
                total_quantity,
                min_stock,
            } => {
                warn!(
                    product_id = %product_id,
                    total_quantity = %total_quantity,
                    min_stock = %min_stock,
                    "Stock fell below minimum"
                );
            }
            Event::PurchaseOrderReceived {
                purchase_order_id,
                movement_ids,
            } => {
                info!(
                    purchase_order_id = %purchase_order_id,
                    movements = movement_ids.len(),
                    "Purchase order received into stock"
                );
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}
