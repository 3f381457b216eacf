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

    /// Creates a sender together with the receiving end of a bounded channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes an event without failing the caller; a closed or full
    /// channel is logged and the event dropped.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            warn!(error = %err, "Dropping domain event");
        }
    }
}

/// Domain events published by the storefront services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        user_id: Uuid,
        product_id: Uuid,
    },
    CartItemRemoved {
        user_id: Uuid,
        product_id: Uuid,
        removed: u64,
    },
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_minor: i64,
    },
    PaymentSubmitted {
        request_id: String,
        order_id: String,
    },
    PaymentFailed {
        request_id: String,
        order_id: String,
        reason: String,
    },
}

/// Drains the event channel, logging each event. Returns once every sender
/// has been dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CartItemAdded {
                user_id,
                product_id,
            } => info!(%user_id, %product_id, "cart item added"),
            Event::CartItemRemoved {
                user_id,
                product_id,
                removed,
            } => info!(%user_id, %product_id, removed, "cart items removed"),
            Event::OrderCreated {
                order_id,
                user_id,
                total_minor,
            } => info!(%order_id, %user_id, total_minor, "order created"),
            Event::PaymentSubmitted {
                request_id,
                order_id,
            } => info!(%request_id, %order_id, "payment submitted"),
            Event::PaymentFailed {
                request_id,
                order_id,
                reason,
            } => warn!(%request_id, %order_id, %reason, "payment failed"),
        }
    }

    info!("Event processing loop stopped");
}
