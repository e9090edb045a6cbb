use crate::database::error::DbResult;
use crate::payments::status::PaymentStatus;
use crate::payments::types::{GatewayEvent, Order, Payment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A reconciliation to apply atomically to one payment
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Status reported for the payment, if any
    pub target: Option<PaymentStatus>,
    /// Gateway-issued transaction id that should replace the stored one
    pub transaction_id: Option<String>,
    /// Raw payload appended to the payment's gateway log
    pub event: GatewayEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Payment already was in the requested status
    Unchanged,
    /// The state machine refused the move; nothing about the status changed
    Rejected {
        current: PaymentStatus,
        requested: PaymentStatus,
    },
    NotRequested,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub payment: Payment,
    pub outcome: TransitionOutcome,
    /// Set when the reported transaction id already belongs to another payment
    pub transaction_id_conflict: bool,
}

/// Store for the `Payment` aggregate. Single source of truth for payment status.
///
/// Implementations serialize every write to a given payment: `reconcile`
/// runs its read-check-write while holding the row (or the whole map)
/// exclusively.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>>;

    async fn find_by_order_id(&self, order_id: Uuid) -> DbResult<Option<Payment>>;

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DbResult<Option<Payment>>;

    /// Payment whose intent handed the gateway this order id
    async fn find_by_gateway_order_id(&self, gateway_order_id: &str) -> DbResult<Option<Payment>>;

    /// Insert a payment, or refresh one that is still `pending`, together with
    /// its intent event. The caller's intent fields (method, amount, phone,
    /// success indicator, gateway order id) replace the stored ones. Fails with
    /// a conflict when the stored payment already left `pending`.
    async fn save_intent(&self, payment: &Payment, event: GatewayEvent) -> DbResult<Payment>;

    /// Lock the payment, apply the transition through the state machine,
    /// optionally overwrite the transaction id, append the event, commit.
    async fn reconcile(
        &self,
        payment_id: Uuid,
        reconciliation: Reconciliation,
    ) -> DbResult<ReconciliationResult>;

    /// Append-only gateway log, oldest first
    async fn gateway_events(&self, payment_id: Uuid) -> DbResult<Vec<GatewayEvent>>;
}

/// Partial order store. Orders are owned by the wider platform; this
/// subsystem only reads them and moves them out of `pending`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Order>>;

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Order>>;

    /// Conditional `pending -> confirmed`. Returns true only for the call
    /// that performed the transition.
    async fn confirm_if_pending(&self, order_id: Uuid) -> DbResult<bool>;
}

/// Apply a reconciliation to a payment the caller holds exclusively.
///
/// Shared by every store so the rules live in one place.
pub fn apply_reconciliation(
    payment: &mut Payment,
    reconciliation: &Reconciliation,
    transaction_id_taken: bool,
    now: DateTime<Utc>,
) -> (TransitionOutcome, bool) {
    let outcome = match reconciliation.target {
        None => TransitionOutcome::NotRequested,
        Some(target) if target == payment.status => TransitionOutcome::Unchanged,
        Some(target) => {
            let from = payment.status;
            if payment.try_transition(target, now) {
                TransitionOutcome::Applied { from, to: target }
            } else {
                TransitionOutcome::Rejected {
                    current: from,
                    requested: target,
                }
            }
        }
    };

    let mut conflict = false;
    if let Some(transaction_id) = reconciliation
        .transaction_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        if transaction_id_taken {
            conflict = true;
        } else {
            payment.transaction_id = transaction_id.to_string();
        }
    }

    payment.version += 1;
    (outcome, conflict)
}
