// ============================================================================
// Notification dispatch
// ============================================================================
//
// The notification service is a black box: the orchestrator only needs
// `send_order_confirmation` and treats any failure as non-fatal.
//
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::order::Order;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification rejected: {0}")]
    Rejected(String),

    #[error("notification service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        recipient: &str,
        order_id: Uuid,
        details: &Value,
    ) -> Result<(), NotificationError>;
}

/// Confirmation payload handed to the notifier.
pub fn order_details(order: &Order) -> Value {
    let items: Vec<Value> = order
        .items
        .iter()
        .map(|item| {
            json!({
                "product_id": item.product_id,
                "name": item.name,
                "quantity": item.quantity,
                "price": item.price,
                "variant": item.variant,
            })
        })
        .collect();

    json!({
        "order_id": order.id,
        "total": order.total,
        "status": order.status,
        "item_count": order.items.len(),
        "items": items,
        "created_at": order.created_at,
    })
}

/// Writes confirmations to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_order_confirmation(
        &self,
        recipient: &str,
        order_id: Uuid,
        details: &Value,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            recipient = %recipient,
            order_id = %order_id,
            details = %details,
            "📧 Order confirmation"
        );
        Ok(())
    }
}

/// Test double that remembers every confirmation and can be told to fail or
/// stall.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Uuid)>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
    }

    pub fn sent(&self) -> Vec<(String, Uuid)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(
        &self,
        recipient: &str,
        order_id: Uuid,
        _details: &Value,
    ) -> Result<(), NotificationError> {
        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Unavailable("smtp relay down".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((recipient.to_string(), order_id));
        Ok(())
    }
}
