use crate::database::repository::OrderStore;
use crate::error::AppResult;
use crate::payments::notification::{dispatch, Notification, NotificationEvent, Notifier};
use crate::payments::types::{Order, Payment};
use std::sync::Arc;
use tracing::{debug, info};

/// Moves an order out of `pending` once its payment completed.
///
/// The only place in this subsystem that changes an order's status. The
/// store performs the move as a compare-and-set, so concurrent callers
/// (webhook racing an explicit confirm) confirm the order exactly once.
#[derive(Clone)]
pub struct OrderStatusSynchronizer {
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
}

impl OrderStatusSynchronizer {
    pub fn new(orders: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { orders, notifier }
    }

    /// Returns whether this call performed the `pending -> confirmed` move
    pub async fn update_order_after_payment(&self, order: &Order, payment: &Payment) -> AppResult<bool> {
        let changed = self.orders.confirm_if_pending(order.id).await?;

        if changed {
            info!(
                order_id = %order.id,
                order_reference = %order.reference,
                payment_id = %payment.id,
                "Order moved from pending to confirmed"
            );
            dispatch(
                self.notifier.as_ref(),
                Notification::new(NotificationEvent::OrderConfirmed, order, Some(payment)),
            )
            .await;
        } else {
            debug!(order_reference = %order.reference, "Order already left pending");
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::in_memory::InMemoryOrderStore;
    use crate::payments::notification::TracingNotifier;
    use crate::payments::types::{OrderStatus, PaymentMethod};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_confirms_once_and_leaves_other_statuses_alone() {
        let store = InMemoryOrderStore::new();
        let pending = Order {
            id: Uuid::new_v4(),
            reference: "ORD-1".to_string(),
            status: OrderStatus::Pending,
            total_amount: dec!(500),
            owner: None,
        };
        let shipped = Order {
            id: Uuid::new_v4(),
            reference: "ORD-2".to_string(),
            status: OrderStatus::Shipped,
            ..pending.clone()
        };
        store.insert(pending.clone()).await;
        store.insert(shipped.clone()).await;

        let sync = OrderStatusSynchronizer::new(Arc::new(store.clone()), Arc::new(TracingNotifier));
        let payment = Payment::new(pending.id, PaymentMethod::Mpgs, dec!(500), None);

        assert!(sync.update_order_after_payment(&pending, &payment).await.unwrap());
        assert!(!sync.update_order_after_payment(&pending, &payment).await.unwrap());
        assert!(!sync.update_order_after_payment(&shipped, &payment).await.unwrap());

        assert_eq!(store.confirmation_count(pending.id).await, 1);
        let shipped_now = store.find_by_id(shipped.id).await.unwrap().unwrap();
        assert_eq!(shipped_now.status, OrderStatus::Shipped);
    }
}
