use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::order::OrderStatus;

/// Events emitted after a successful state mutation. Consumers (currently
/// just the logging processor) run outside the request path; a failed send
/// never rolls back the committed change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    ReviewCreated {
        review_id: Uuid,
        medicine_id: Uuid,
    },
    ReviewReplyCreated {
        reply_id: Uuid,
        parent_review_id: Uuid,
    },
    ReviewDeleted(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel with the sender already wrapped.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel until every sender is dropped. Notification
/// fan-out (push, email) hangs off this loop in deployments that enable it.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, from = %old_status, to = %new_status, "order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(order_id = %order_id, "order cancelled");
            }
            Event::ReviewCreated {
                review_id,
                medicine_id,
            } => {
                info!(review_id = %review_id, medicine_id = %medicine_id, "review created");
            }
            Event::ReviewReplyCreated {
                reply_id,
                parent_review_id,
            } => {
                info!(reply_id = %reply_id, parent_review_id = %parent_review_id, "review reply created");
            }
            Event::ReviewDeleted(review_id) => {
                info!(review_id = %review_id, "review deleted");
            }
        }
    }
    warn!("event channel closed; processor shutting down");
}
