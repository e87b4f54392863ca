use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{errors::ServiceError, models::ItemStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a bounded channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Ledger writes are already committed when events go out, so a closed
    /// channel is only worth a warning.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping ledger event: {}", e);
        }
    }
}

/// Notifications emitted after a unit of work commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ReceiptCreated {
        store_id: String,
        receipt_id: Uuid,
        receipt_no: String,
        item_count: usize,
        at: DateTime<Utc>,
    },
    ItemStatusChanged {
        store_id: String,
        receipt_id: Uuid,
        item_index: usize,
        from: ItemStatus,
        to: ItemStatus,
        at: DateTime<Utc>,
    },
    ReceiptEdited {
        store_id: String,
        receipt_id: Uuid,
        added: usize,
        removed: usize,
        at: DateTime<Utc>,
    },
    ReceiptCancelled {
        store_id: String,
        receipt_id: Uuid,
        cancelled: usize,
        at: DateTime<Utc>,
    },
    ReceiptDeleted {
        store_id: String,
        receipt_id: Uuid,
        at: DateTime<Utc>,
    },
    ReceiptReset {
        store_id: String,
        receipt_id: Uuid,
        reset: usize,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn receipt_id(&self) -> Uuid {
        match self {
            Event::ReceiptCreated { receipt_id, .. }
            | Event::ItemStatusChanged { receipt_id, .. }
            | Event::ReceiptEdited { receipt_id, .. }
            | Event::ReceiptCancelled { receipt_id, .. }
            | Event::ReceiptDeleted { receipt_id, .. }
            | Event::ReceiptReset { receipt_id, .. } => *receipt_id,
        }
    }
}

/// Drains the channel, logging every event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ReceiptCreated {
                store_id,
                receipt_id,
                receipt_no,
                item_count,
                ..
            } => info!(
                store_id = %store_id,
                receipt_id = %receipt_id,
                receipt_no = %receipt_no,
                item_count,
                "Receipt created"
            ),
            Event::ItemStatusChanged {
                receipt_id,
                item_index,
                from,
                to,
                ..
            } => info!(
                receipt_id = %receipt_id,
                item_index,
                from = %from,
                to = %to,
                "Item status changed"
            ),
            Event::ReceiptEdited {
                receipt_id,
                added,
                removed,
                ..
            } => info!(receipt_id = %receipt_id, added, removed, "Receipt edited"),
            Event::ReceiptCancelled {
                receipt_id,
                cancelled,
                ..
            } => info!(receipt_id = %receipt_id, cancelled, "Receipt cancelled"),
            Event::ReceiptDeleted { receipt_id, .. } => {
                info!(receipt_id = %receipt_id, "Receipt deleted")
            }
            Event::ReceiptReset {
                receipt_id, reset, ..
            } => info!(receipt_id = %receipt_id, reset, "Receipt reset to pending"),
        }
    }

    info!("Event processing loop stopped");
}
