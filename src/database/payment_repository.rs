use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::{
    apply_reconciliation, PaymentStore, Reconciliation, ReconciliationResult,
};
use crate::database::transaction::DatabaseTransaction;
use crate::payments::status::PaymentStatus;
use crate::payments::types::{GatewayEvent, GatewayEventSource, Payment};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, order_id, transaction_id, amount, method, status, phone_number, \
     success_indicator, gateway_order_id, created_at, processed_at, version";

/// Row shape of the `payments` table
#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    transaction_id: String,
    amount: Decimal,
    method: String,
    status: String,
    phone_number: Option<String>,
    success_indicator: Option<String>,
    gateway_order_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
    version: i64,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let method = row
            .method
            .parse()
            .map_err(|_| DatabaseError::corrupt_row("payment", format!("unknown method '{}'", row.method)))?;
        let status = PaymentStatus::from_str(&row.status)
            .ok_or_else(|| DatabaseError::corrupt_row("payment", format!("unknown status '{}'", row.status)))?;

        Ok(Payment {
            id: row.id,
            transaction_id: row.transaction_id,
            amount: row.amount,
            method,
            status,
            created_at: row.created_at,
            processed_at: row.processed_at,
            success_indicator: row.success_indicator,
            gateway_order_id: row.gateway_order_id,
            order_id: row.order_id,
            phone_number: row.phone_number,
            version: row.version,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct GatewayEventRow {
    source: String,
    payload: serde_json::Value,
    received_at: chrono::DateTime<chrono::Utc>,
}

/// Postgres-backed payment store
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn select_by(filter: &str) -> String {
        format!("SELECT {} FROM payments WHERE {} = $1", PAYMENT_COLUMNS, filter)
    }

    async fn insert_event(
        conn: &mut PgConnection,
        payment_id: Uuid,
        event: &GatewayEvent,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO payment_gateway_events (id, payment_id, source, payload, received_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(event.source.as_str())
        .bind(&event.payload)
        .bind(event.received_at)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&Self::select_by("id"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&Self::select_by("order_id"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&Self::select_by("transaction_id"))
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_gateway_order_id(&self, gateway_order_id: &str) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&Self::select_by("gateway_order_id"))
            .bind(gateway_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn save_intent(&self, payment: &Payment, event: GatewayEvent) -> DbResult<Payment> {
        let mut tx = DatabaseTransaction::begin(&self.pool).await?;

        // The WHERE on the conflict branch refuses to touch a payment that left pending.
        let sql = format!(
            "INSERT INTO payments
             (id, order_id, transaction_id, amount, method, status, phone_number, success_indicator,
              gateway_order_id, created_at, processed_at, version, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, NOW())
             ON CONFLICT (id) DO UPDATE SET
                 transaction_id = EXCLUDED.transaction_id,
                 amount = EXCLUDED.amount,
                 method = EXCLUDED.method,
                 phone_number = EXCLUDED.phone_number,
                 success_indicator = EXCLUDED.success_indicator,
                 gateway_order_id = EXCLUDED.gateway_order_id,
                 version = payments.version + 1,
                 updated_at = NOW()
             WHERE payments.status = 'pending'
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(payment.order_id)
            .bind(&payment.transaction_id)
            .bind(payment.amount)
            .bind(payment.method.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.phone_number)
            .bind(&payment.success_indicator)
            .bind(&payment.gateway_order_id)
            .bind(payment.created_at)
            .bind(payment.processed_at)
            .fetch_optional(tx.conn()?)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let saved: Payment = match row {
            Some(row) => row.try_into()?,
            None => {
                return Err(DatabaseError::conflict(
                    "Payment",
                    format!("payment {} is no longer pending", payment.id),
                ))
            }
        };

        Self::insert_event(tx.conn()?, saved.id, &event).await?;
        tx.commit().await?;

        debug!(payment_id = %saved.id, transaction_id = %saved.transaction_id, "Payment intent persisted");
        Ok(saved)
    }

    async fn reconcile(
        &self,
        payment_id: Uuid,
        reconciliation: Reconciliation,
    ) -> DbResult<ReconciliationResult> {
        let mut tx = DatabaseTransaction::begin(&self.pool).await?;

        let sql = format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .fetch_optional(tx.conn()?)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| {
                DatabaseError::new(DatabaseErrorKind::NotFound {
                    entity: "Payment".to_string(),
                    id: payment_id.to_string(),
                })
            })?;
        let mut payment: Payment = row.try_into()?;

        let taken = match reconciliation
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(transaction_id) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM payments WHERE transaction_id = $1 AND id <> $2)",
            )
            .bind(transaction_id)
            .bind(payment_id)
            .fetch_one(tx.conn()?)
            .await
            .map_err(DatabaseError::from_sqlx)?,
            None => false,
        };

        let (outcome, transaction_id_conflict) =
            apply_reconciliation(&mut payment, &reconciliation, taken, Utc::now());

        sqlx::query(
            "UPDATE payments
             SET status = $1, processed_at = $2, transaction_id = $3, version = $4, updated_at = NOW()
             WHERE id = $5",
        )
        .bind(payment.status.as_str())
        .bind(payment.processed_at)
        .bind(&payment.transaction_id)
        .bind(payment.version)
        .bind(payment_id)
        .execute(tx.conn()?)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Self::insert_event(tx.conn()?, payment_id, &reconciliation.event).await?;
        tx.commit().await?;

        Ok(ReconciliationResult {
            payment,
            outcome,
            transaction_id_conflict,
        })
    }

    async fn gateway_events(&self, payment_id: Uuid) -> DbResult<Vec<GatewayEvent>> {
        let rows = sqlx::query_as::<_, GatewayEventRow>(
            "SELECT source, payload, received_at FROM payment_gateway_events
             WHERE payment_id = $1 ORDER BY seq ASC",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter()
            .map(|row| {
                let source = GatewayEventSource::from_str(&row.source).ok_or_else(|| {
                    DatabaseError::corrupt_row("gateway event", format!("unknown source '{}'", row.source))
                })?;
                Ok(GatewayEvent {
                    source,
                    payload: row.payload,
                    received_at: row.received_at,
                })
            })
            .collect()
    }
}
