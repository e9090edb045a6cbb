//! Reconciliation entry points: gateway webhook, client confirmation and
//! read-only verification.
//!
//! All three resolve the same order/payment pair and apply the same rules:
//! the success indicator captured at intent creation is the integrity gate,
//! status changes go through the store's serialized `reconcile`, and a
//! completed payment drives the order synchronizer. Work that follows a
//! committed write (order sync, notifications, cache) is logged on failure
//! and never turns the response into an error.

use crate::cache::{keys, PaymentViewCache};
use crate::database::repository::{
    OrderStore, PaymentStore, Reconciliation, ReconciliationResult, TransitionOutcome,
};
use crate::error::{AppError, AppResult};
use crate::payments::notification::{dispatch, Notification, NotificationEvent, Notifier};
use crate::payments::order_sync::OrderStatusSynchronizer;
use crate::payments::status::PaymentStatus;
use crate::payments::types::{GatewayEvent, GatewayEventSource, Order, Payment, PaymentView};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MISSING_SUCCESS_INDICATOR: &str = "Payment verification failed: missing successIndicator";
pub const INVALID_RESULT_INDICATOR: &str = "Invalid resultIndicator";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookOrder {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookTransaction {
    #[serde(default)]
    pub id: Option<String>,
}

/// Notification posted by the hosted-checkout gateway
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub order: Option<WebhookOrder>,
    #[serde(default)]
    pub transaction: Option<WebhookTransaction>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub result_indicator: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    pub order_id: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    Confirmed(PaymentView),
    NotCompleted {
        message: String,
        status: PaymentStatus,
    },
}

#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Verified(PaymentView),
    Rejected {
        error: String,
        status: PaymentStatus,
    },
}

/// Compare indicators without short-circuiting on the first differing byte
pub fn indicators_match(stored: &str, received: &str) -> bool {
    if stored.len() != received.len() {
        return false;
    }
    stored
        .as_bytes()
        .iter()
        .zip(received.as_bytes().iter())
        .fold(0, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Check a received indicator against the stored one.
///
/// `Ok(())` when they match; otherwise the message explaining why not.
fn check_indicator(payment: &Payment, received: &str) -> Result<(), &'static str> {
    match payment.success_indicator.as_deref() {
        None => Err(MISSING_SUCCESS_INDICATOR),
        Some(stored) if indicators_match(stored, received) => Ok(()),
        Some(_) => Err(INVALID_RESULT_INDICATOR),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct ReconciliationService {
    payments: Arc<dyn PaymentStore>,
    orders: Arc<dyn OrderStore>,
    synchronizer: OrderStatusSynchronizer,
    notifier: Arc<dyn Notifier>,
    cache: Option<PaymentViewCache>,
}

impl ReconciliationService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let synchronizer = OrderStatusSynchronizer::new(orders.clone(), notifier.clone());
        Self {
            payments,
            orders,
            synchronizer,
            notifier,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: PaymentViewCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Order by reference, falling back to its UUID
    pub async fn resolve_order(&self, lookup: &str) -> AppResult<Order> {
        let lookup = lookup.trim();
        if let Some(order) = self.orders.find_by_reference(lookup).await? {
            return Ok(order);
        }
        if let Ok(id) = Uuid::parse_str(lookup) {
            if let Some(order) = self.orders.find_by_id(id).await? {
                return Ok(order);
            }
        }
        Err(AppError::not_found("Order", lookup))
    }

    async fn payment_for(&self, order: &Order) -> AppResult<Payment> {
        self.payments
            .find_by_order_id(order.id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment", order.reference.clone()))
    }

    /// Payment known to the gateway by `id`: the order id it was handed at
    /// intent time, else the transaction id currently stored.
    async fn find_gateway_payment(&self, id: &str) -> AppResult<Option<Payment>> {
        if let Some(payment) = self.payments.find_by_gateway_order_id(id).await? {
            return Ok(Some(payment));
        }
        Ok(self.payments.find_by_transaction_id(id).await?)
    }

    /// Order named by a webhook: by reference, else through the payment the
    /// gateway knows under that id.
    async fn resolve_webhook_order(&self, reference: &str) -> AppResult<Order> {
        if let Some(order) = self.orders.find_by_reference(reference).await? {
            return Ok(order);
        }
        if let Some(payment) = self.find_gateway_payment(reference).await? {
            if let Some(order) = self.orders.find_by_id(payment.order_id).await? {
                return Ok(order);
            }
        }
        Err(AppError::not_found("Order", reference))
    }

    pub async fn handle_webhook(&self, body: &[u8]) -> AppResult<WebhookAck> {
        let mut raw: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| AppError::validation(format!("Malformed webhook body: {}", e)))?;
        let payload: WebhookPayload = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::validation(format!("Malformed webhook body: {}", e)))?;

        let reference = non_empty(payload.order.as_ref().and_then(|o| o.id.as_deref()))
            .ok_or_else(|| AppError::validation("Webhook is missing order.id"))?
            .to_string();

        let order = self.resolve_webhook_order(&reference).await?;
        let payment = self.payment_for(&order).await?;

        if let (Some(received), Some(_)) = (
            non_empty(payload.result_indicator.as_deref()),
            payment.success_indicator.as_deref(),
        ) {
            if let Err(reason) = check_indicator(&payment, received) {
                warn!(
                    payment_id = %payment.id,
                    order_reference = %order.reference,
                    "Webhook rejected: {}",
                    reason
                );
                return Err(AppError::integrity_mismatch(reason));
            }
        }

        let target = non_empty(payload.result.as_deref()).map(PaymentStatus::from_gateway_result);
        if let Some(object) = raw.as_object_mut() {
            object.insert(
                "webhook_received_at".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }

        let previous_transaction_id = payment.transaction_id.clone();
        let result = self
            .payments
            .reconcile(
                payment.id,
                Reconciliation {
                    target,
                    transaction_id: non_empty(
                        payload.transaction.as_ref().and_then(|t| t.id.as_deref()),
                    )
                    .map(str::to_string),
                    event: GatewayEvent::new(GatewayEventSource::Webhook, raw),
                },
            )
            .await?;

        info!(
            payment_id = %result.payment.id,
            order_reference = %order.reference,
            result = payload.result.as_deref().unwrap_or(""),
            outcome = ?result.outcome,
            "Webhook reconciled"
        );

        self.after_write(&order, &result, &previous_transaction_id).await;

        let (success, message) = match result.outcome {
            TransitionOutcome::Applied { to, .. } => (true, format!("Payment status updated to {}", to)),
            TransitionOutcome::Unchanged => (true, "Payment status unchanged".to_string()),
            TransitionOutcome::NotRequested => (true, "Webhook recorded".to_string()),
            TransitionOutcome::Rejected { current, requested } => (
                false,
                format!("Payment is {}; {} ignored", current, requested),
            ),
        };

        Ok(WebhookAck {
            success,
            message,
            order_id: order.reference,
            status: result.payment.status,
        })
    }

    pub async fn confirm(&self, order_lookup: &str, result_indicator: Option<&str>) -> AppResult<ConfirmOutcome> {
        let order = self.resolve_order(order_lookup).await?;
        let payment = self.payment_for(&order).await?;

        if let (true, Some(received)) = (
            payment.method.is_hosted_checkout(),
            non_empty(result_indicator),
        ) {
            if let Err(reason) = check_indicator(&payment, received) {
                warn!(payment_id = %payment.id, order_reference = %order.reference, "Confirmation rejected: {}", reason);
                return Err(if reason == MISSING_SUCCESS_INDICATOR {
                    AppError::validation(reason)
                } else {
                    AppError::integrity_mismatch(reason)
                });
            }

            let previous_transaction_id = payment.transaction_id.clone();
            let result = self
                .payments
                .reconcile(
                    payment.id,
                    Reconciliation {
                        target: Some(PaymentStatus::Completed),
                        transaction_id: None,
                        event: GatewayEvent::new(
                            GatewayEventSource::Confirmation,
                            serde_json::json!({
                                "result_indicator_verified": true,
                                "confirmed_at": Utc::now().to_rfc3339(),
                            }),
                        ),
                    },
                )
                .await?;
            self.after_write(&order, &result, &previous_transaction_id).await;

            return if result.payment.is_successful() {
                Ok(ConfirmOutcome::Confirmed(self.view(&result.payment, &order).await))
            } else {
                Ok(ConfirmOutcome::NotCompleted {
                    message: format!("Payment is {} and cannot be completed", result.payment.status),
                    status: result.payment.status,
                })
            };
        }

        if payment.is_successful() {
            if self.sync_order(&order, &payment).await {
                self.invalidate(&payment, &order, &[]).await;
            }
            return Ok(ConfirmOutcome::Confirmed(self.view(&payment, &order).await));
        }

        if payment.requires_manual_processing() && payment.status == PaymentStatus::Pending {
            info!(
                payment_id = %payment.id,
                method = %payment.method,
                "Mobile money payment still awaiting approval on the payer's handset"
            );
        }
        Ok(ConfirmOutcome::NotCompleted {
            message: "Payment not completed yet".to_string(),
            status: payment.status,
        })
    }

    /// Read-only check of a redirect's `resultIndicator`
    pub async fn verify(&self, order_lookup: &str, result_indicator: Option<&str>) -> AppResult<VerifyOutcome> {
        let order = self.resolve_order(order_lookup).await?;
        let payment = self.payment_for(&order).await?;

        if let (true, Some(received)) = (
            payment.method.is_hosted_checkout(),
            non_empty(result_indicator),
        ) {
            if let Err(reason) = check_indicator(&payment, received) {
                return Ok(VerifyOutcome::Rejected {
                    error: reason.to_string(),
                    status: payment.status,
                });
            }
        }

        Ok(VerifyOutcome::Verified(PaymentView::new(&payment, &order)))
    }

    pub async fn payment_by_order(&self, order_lookup: &str) -> AppResult<PaymentView> {
        let order = self.resolve_order(order_lookup).await?;
        let key = keys::payment_by_order(order.id);
        if let Some(view) = self.cached(&key).await {
            return Ok(view);
        }

        let payment = self.payment_for(&order).await?;
        let view = PaymentView::new(&payment, &order);
        self.store_cached(&key, &view).await;
        Ok(view)
    }

    pub async fn payment_by_transaction(&self, transaction_id: &str) -> AppResult<PaymentView> {
        let transaction_id = transaction_id.trim();
        let key = keys::payment_by_transaction(transaction_id);
        if let Some(view) = self.cached(&key).await {
            return Ok(view);
        }

        let payment = match self.payments.find_by_transaction_id(transaction_id).await? {
            Some(payment) => payment,
            None => self
                .payments
                .find_by_gateway_order_id(transaction_id)
                .await?
                .ok_or_else(|| AppError::not_found("Payment", transaction_id))?,
        };
        let order = self
            .orders
            .find_by_id(payment.order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order", payment.order_id.to_string()))?;
        let view = PaymentView::new(&payment, &order);
        self.store_cached(&key, &view).await;
        Ok(view)
    }

    /// Side effects of a committed reconciliation. Failures are logged only.
    async fn after_write(&self, order: &Order, result: &ReconciliationResult, previous_transaction_id: &str) {
        let payment = &result.payment;

        if result.transaction_id_conflict {
            warn!(
                payment_id = %payment.id,
                "Reported transaction id already belongs to another payment; kept {}",
                payment.transaction_id
            );
        }
        if let TransitionOutcome::Rejected { current, requested } = result.outcome {
            warn!(
                payment_id = %payment.id,
                current = %current,
                requested = %requested,
                "Payment status change refused"
            );
        }

        if let TransitionOutcome::Applied { to, .. } = result.outcome {
            if let Some(event) = NotificationEvent::for_payment_status(to) {
                dispatch(self.notifier.as_ref(), Notification::new(event, order, Some(payment))).await;
            }
        }

        if payment.is_successful() {
            self.sync_order(order, payment).await;
        }

        // After the order sync, so no view with the old order status survives
        let replaced = [previous_transaction_id];
        let stale = if previous_transaction_id != payment.transaction_id {
            &replaced[..]
        } else {
            &[]
        };
        self.invalidate(payment, order, stale).await;
    }

    /// Confirm the order for a completed payment; true when this call moved it
    async fn sync_order(&self, order: &Order, payment: &Payment) -> bool {
        match self.synchronizer.update_order_after_payment(order, payment).await {
            Ok(changed) => changed,
            Err(e) => {
                error!(
                    order_reference = %order.reference,
                    payment_id = %payment.id,
                    "Order synchronization failed after payment write: {}",
                    e
                );
                false
            }
        }
    }

    async fn invalidate(&self, payment: &Payment, order: &Order, stale_ids: &[&str]) {
        if let Some(cache) = &self.cache {
            cache.invalidate(payment, order, stale_ids).await;
        }
    }

    /// Projection with the order as it is now
    async fn view(&self, payment: &Payment, order: &Order) -> PaymentView {
        match self.orders.find_by_id(order.id).await {
            Ok(Some(current)) => PaymentView::new(payment, &current),
            Ok(None) => PaymentView::new(payment, order),
            Err(e) => {
                warn!(order_reference = %order.reference, "Could not refresh order: {}", e);
                PaymentView::new(payment, order)
            }
        }
    }

    async fn cached(&self, key: &str) -> Option<PaymentView> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    async fn store_cached(&self, key: &str, view: &PaymentView) {
        if let Some(cache) = &self.cache {
            cache.put(key, view).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentMethod;
    use rust_decimal_macros::dec;

    #[test]
    fn test_indicators_match() {
        assert!(indicators_match("abc123", "abc123"));
        assert!(!indicators_match("abc123", "abc124"));
        assert!(!indicators_match("abc123", "abc12"));
        assert!(!indicators_match("", "x"));
    }

    #[test]
    fn test_check_indicator_reasons() {
        let mut payment = Payment::new(Uuid::new_v4(), PaymentMethod::Mpgs, dec!(10), None);
        assert_eq!(check_indicator(&payment, "x"), Err(MISSING_SUCCESS_INDICATOR));

        payment.success_indicator = Some("good".to_string());
        assert_eq!(check_indicator(&payment, "bad"), Err(INVALID_RESULT_INDICATOR));
        assert_eq!(check_indicator(&payment, "good"), Ok(()));
    }

    #[test]
    fn test_webhook_payload_tolerates_missing_fields() {
        let payload: WebhookPayload =
            serde_json::from_value(serde_json::json!({"order": {"id": "ORD-1"}})).unwrap();
        assert_eq!(payload.order.unwrap().id.as_deref(), Some("ORD-1"));
        assert!(payload.result.is_none());
        assert!(payload.transaction.is_none());
    }
}
