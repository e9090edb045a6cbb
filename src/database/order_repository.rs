use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::OrderStore;
use crate::payments::types::{Customer, Order, OrderStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

const ORDER_SELECT: &str = "SELECT o.id, o.reference, o.status, o.total_amount,
            c.id AS customer_id, c.email AS customer_email, c.phone_number AS customer_phone
     FROM orders o
     LEFT JOIN customers c ON c.id = o.customer_id";

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    reference: String,
    status: String,
    total_amount: Decimal,
    customer_id: Option<Uuid>,
    customer_email: Option<String>,
    customer_phone: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::from_str(&row.status).ok_or_else(|| {
            DatabaseError::corrupt_row("order", format!("unknown status '{}'", row.status))
        })?;

        Ok(Order {
            id: row.id,
            reference: row.reference,
            status,
            total_amount: row.total_amount,
            owner: row.customer_id.map(|id| Customer {
                id,
                email: row.customer_email,
                phone_number: row.customer_phone,
            }),
        })
    }
}

/// Read access to the platform's orders plus the one write this
/// subsystem owns: moving a paid order out of `pending`.
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Order>> {
        let sql = format!("{} WHERE o.id = $1", ORDER_SELECT);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Order>> {
        let sql = format!("{} WHERE o.reference = $1", ORDER_SELECT);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Order::try_from)
            .transpose()
    }

    async fn confirm_if_pending(&self, order_id: Uuid) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'confirmed', updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 1 {
            info!(order_id = %order_id, "Order confirmed after payment");
            return Ok(true);
        }

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if exists {
            Ok(false)
        } else {
            Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Order".to_string(),
                id: order_id.to_string(),
            }))
        }
    }
}
