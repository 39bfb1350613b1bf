use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

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

    /// Sends an event, logging instead of failing. Used after a commit, where
    /// the caller's outcome must not depend on event delivery.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after pharmacy state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SaleRecorded {
        sale_id: Uuid,
        clinic_id: Uuid,
        total: Decimal,
        line_count: usize,
        sold_at: DateTime<Utc>,
    },
    SaleRejected {
        clinic_id: Uuid,
        code: String,
        reason: String,
    },
    StockReceived {
        clinic_id: Uuid,
        medicament_id: Uuid,
        lot_id: Uuid,
        quantity: i32,
    },
    LowStockDetected {
        clinic_id: Uuid,
        medicament_id: Uuid,
        lot_id: Uuid,
        remaining: i32,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::SaleRecorded {
                sale_id,
                clinic_id,
                total,
                line_count,
                sold_at,
            } => {
                info!(
                    %sale_id,
                    %clinic_id,
                    %total,
                    line_count,
                    sold_at = %sold_at.to_rfc3339(),
                    "sale recorded"
                );
            }
            Event::SaleRejected {
                clinic_id,
                code,
                reason,
            } => {
                info!(%clinic_id, code = %code, reason = %reason, "sale rejected");
            }
            Event::StockReceived {
                clinic_id,
                medicament_id,
                lot_id,
                quantity,
            } => {
                info!(%clinic_id, %medicament_id, %lot_id, quantity, "stock received");
            }
            Event::LowStockDetected {
                clinic_id,
                medicament_id,
                lot_id,
                remaining,
            } => {
                warn!(%clinic_id, %medicament_id, %lot_id, remaining, "lot running low");
            }
        }
    }

    info!("Event processing loop stopped");
}
