//! Outbound notifications after material payment and order changes
//!
//! Transport is owned by the wider platform. This module only defines the
//! capability and a default that records the event in the logs.

use crate::payments::status::PaymentStatus;
use crate::payments::types::{Order, Payment};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    PaymentCompleted,
    PaymentFailed,
    PaymentRefunded,
    OrderConfirmed,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::PaymentCompleted => "payment_completed",
            NotificationEvent::PaymentFailed => "payment_failed",
            NotificationEvent::PaymentRefunded => "payment_refunded",
            NotificationEvent::OrderConfirmed => "order_confirmed",
        }
    }

    /// Event worth announcing when a payment enters `status`
    pub fn for_payment_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Completed => Some(NotificationEvent::PaymentCompleted),
            PaymentStatus::Failed => Some(NotificationEvent::PaymentFailed),
            PaymentStatus::Refunded => Some(NotificationEvent::PaymentRefunded),
            PaymentStatus::Pending | PaymentStatus::Processing => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub order_id: Uuid,
    pub order_reference: String,
    pub payment_id: Option<Uuid>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
}

impl Notification {
    pub fn new(event: NotificationEvent, order: &Order, payment: Option<&Payment>) -> Self {
        Self {
            event,
            order_id: order.id,
            order_reference: order.reference.clone(),
            payment_id: payment.map(|p| p.id),
            recipient_email: order.owner.as_ref().and_then(|o| o.email.clone()),
            recipient_phone: order
                .owner
                .as_ref()
                .and_then(|o| o.phone_number.clone())
                .or_else(|| payment.and_then(|p| p.phone_number.clone())),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Unavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Default notifier: writes the event to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            event = notification.event.as_str(),
            order_id = %notification.order_id,
            order_reference = %notification.order_reference,
            payment_id = ?notification.payment_id,
            "Notification emitted"
        );
        Ok(())
    }
}

/// Send a notification; failures are logged and swallowed so they can never
/// undo a payment write that already happened.
pub async fn dispatch(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification).await {
        warn!(
            event = notification.event.as_str(),
            order_reference = %notification.order_reference,
            "Notification failed: {}",
            e
        );
    }
}
