use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::{
    apply_reconciliation, OrderStore, PaymentStore, Reconciliation, ReconciliationResult,
};
use crate::payments::status::PaymentStatus;
use crate::payments::types::{GatewayEvent, Order, OrderStatus, Payment};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct PaymentState {
    payments: HashMap<Uuid, Payment>,
    events: HashMap<Uuid, Vec<GatewayEvent>>,
}

impl PaymentState {
    fn transaction_id_taken(&self, transaction_id: &str, except: Uuid) -> bool {
        self.payments
            .values()
            .any(|p| p.id != except && p.transaction_id == transaction_id)
    }

    fn gateway_order_id_taken(&self, gateway_order_id: &str, except: Uuid) -> bool {
        self.payments
            .values()
            .any(|p| p.id != except && p.gateway_order_id.as_deref() == Some(gateway_order_id))
    }
}

/// A thread-safe in-memory payment store.
///
/// Every write holds the map's write lock for the whole read-check-write, which
/// gives the same per-payment serialization the Postgres store gets from
/// `SELECT ... FOR UPDATE`.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<PaymentState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> DbResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DbResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn find_by_gateway_order_id(&self, gateway_order_id: &str) -> DbResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned())
    }

    async fn save_intent(&self, payment: &Payment, event: GatewayEvent) -> DbResult<Payment> {
        let mut state = self.state.write().await;

        if let Some(gateway_order_id) = payment.gateway_order_id.as_deref() {
            if state.gateway_order_id_taken(gateway_order_id, payment.id) {
                return Err(DatabaseError::new(DatabaseErrorKind::UniqueConstraintViolation {
                    column: "gateway_order_id".to_string(),
                    value: gateway_order_id.to_string(),
                }));
            }
        }

        if state.transaction_id_taken(&payment.transaction_id, payment.id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueConstraintViolation {
                column: "transaction_id".to_string(),
                value: payment.transaction_id.clone(),
            }));
        }
        if state
            .payments
            .values()
            .any(|p| p.id != payment.id && p.order_id == payment.order_id)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueConstraintViolation {
                column: "order_id".to_string(),
                value: payment.order_id.to_string(),
            }));
        }

        let saved = match state.payments.get(&payment.id) {
            Some(existing) if existing.status != PaymentStatus::Pending => {
                return Err(DatabaseError::conflict(
                    "Payment",
                    format!("payment {} is already {}", existing.id, existing.status),
                ));
            }
            Some(existing) => Payment {
                transaction_id: payment.transaction_id.clone(),
                amount: payment.amount,
                method: payment.method,
                phone_number: payment.phone_number.clone(),
                success_indicator: payment.success_indicator.clone(),
                gateway_order_id: payment.gateway_order_id.clone(),
                version: existing.version + 1,
                ..existing.clone()
            },
            None => Payment {
                version: 0,
                ..payment.clone()
            },
        };

        state.payments.insert(saved.id, saved.clone());
        state.events.entry(saved.id).or_default().push(event);
        Ok(saved)
    }

    async fn reconcile(
        &self,
        payment_id: Uuid,
        reconciliation: Reconciliation,
    ) -> DbResult<ReconciliationResult> {
        let mut state = self.state.write().await;

        let mut payment = state.payments.get(&payment_id).cloned().ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Payment".to_string(),
                id: payment_id.to_string(),
            })
        })?;

        let taken = reconciliation
            .transaction_id
            .as_deref()
            .map(|id| state.transaction_id_taken(id.trim(), payment_id))
            .unwrap_or(false);

        let (outcome, transaction_id_conflict) =
            apply_reconciliation(&mut payment, &reconciliation, taken, Utc::now());

        state.payments.insert(payment_id, payment.clone());
        state
            .events
            .entry(payment_id)
            .or_default()
            .push(reconciliation.event);

        Ok(ReconciliationResult {
            payment,
            outcome,
            transaction_id_conflict,
        })
    }

    async fn gateway_events(&self, payment_id: Uuid) -> DbResult<Vec<GatewayEvent>> {
        let state = self.state.read().await;
        Ok(state.events.get(&payment_id).cloned().unwrap_or_default())
    }
}

/// A thread-safe in-memory order store.
///
/// Counts confirmations so callers can assert the payment-driven transition
/// happened exactly once.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
    confirmations: Arc<RwLock<HashMap<Uuid, u32>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }

    /// Number of times `confirm_if_pending` actually moved this order
    pub async fn confirmation_count(&self, order_id: Uuid) -> u32 {
        self.confirmations
            .read()
            .await
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.values().find(|o| o.reference == reference).cloned())
    }

    async fn confirm_if_pending(&self, order_id: Uuid) -> DbResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Confirmed;
                *self
                    .confirmations
                    .write()
                    .await
                    .entry(order_id)
                    .or_insert(0) += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Order".to_string(),
                id: order_id.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repository::TransitionOutcome;
    use crate::payments::types::{GatewayEventSource, PaymentMethod};
    use rust_decimal_macros::dec;

    fn event() -> GatewayEvent {
        GatewayEvent::new(GatewayEventSource::IntentCreated, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_save_intent_keeps_one_payment_per_order() {
        let store = InMemoryPaymentStore::new();
        let order_id = Uuid::new_v4();
        let first = Payment::new(order_id, PaymentMethod::Mpgs, dec!(100), None);
        store.save_intent(&first, event()).await.unwrap();

        let second = Payment::new(order_id, PaymentMethod::Mpgs, dec!(100), None);
        let err = store.save_intent(&second, event()).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_save_intent_rejects_processed_payment() {
        let store = InMemoryPaymentStore::new();
        let payment = Payment::new(Uuid::new_v4(), PaymentMethod::Mpgs, dec!(100), None);
        store.save_intent(&payment, event()).await.unwrap();
        store
            .reconcile(
                payment.id,
                Reconciliation {
                    target: Some(PaymentStatus::Completed),
                    transaction_id: None,
                    event: event(),
                },
            )
            .await
            .unwrap();

        let err = store.save_intent(&payment, event()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_reconcile_appends_to_gateway_log() {
        let store = InMemoryPaymentStore::new();
        let payment = Payment::new(Uuid::new_v4(), PaymentMethod::Mpgs, dec!(100), None);
        store.save_intent(&payment, event()).await.unwrap();

        let result = store
            .reconcile(
                payment.id,
                Reconciliation {
                    target: Some(PaymentStatus::Completed),
                    transaction_id: Some("GW-1".to_string()),
                    event: GatewayEvent::new(GatewayEventSource::Webhook, serde_json::json!({"result": "SUCCESS"})),
                },
            )
            .await
            .unwrap();

        assert!(result.outcome.is_applied());
        assert_eq!(result.payment.transaction_id, "GW-1");
        let events = store.gateway_events(payment.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].source, GatewayEventSource::Webhook);

        let again = store
            .reconcile(
                payment.id,
                Reconciliation {
                    target: Some(PaymentStatus::Completed),
                    transaction_id: None,
                    event: event(),
                },
            )
            .await
            .unwrap();
        assert_eq!(again.outcome, TransitionOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_gateway_order_id_survives_transaction_id_replacement() {
        let store = InMemoryPaymentStore::new();
        let mut payment = Payment::new(Uuid::new_v4(), PaymentMethod::Mpgs, dec!(100), None);
        payment.gateway_order_id = Some(payment.transaction_id.clone());
        store.save_intent(&payment, event()).await.unwrap();

        store
            .reconcile(
                payment.id,
                Reconciliation {
                    target: None,
                    transaction_id: Some("1".to_string()),
                    event: event(),
                },
            )
            .await
            .unwrap();

        assert!(store
            .find_by_transaction_id(&payment.transaction_id)
            .await
            .unwrap()
            .is_none());
        let found = store
            .find_by_gateway_order_id(&payment.transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, payment.id);
        assert_eq!(found.transaction_id, "1");

        let mut other = Payment::new(Uuid::new_v4(), PaymentMethod::Mpgs, dec!(100), None);
        other.gateway_order_id = payment.gateway_order_id.clone();
        let err = store.save_intent(&other, event()).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_confirm_if_pending_is_idempotent() {
        let store = InMemoryOrderStore::new();
        let order = Order {
            id: Uuid::new_v4(),
            reference: "ORD-1".to_string(),
            status: OrderStatus::Pending,
            total_amount: dec!(20000),
            owner: None,
        };
        store.insert(order.clone()).await;

        assert!(store.confirm_if_pending(order.id).await.unwrap());
        assert!(!store.confirm_if_pending(order.id).await.unwrap());
        assert_eq!(store.confirmation_count(order.id).await, 1);
    }
}
