use crate::database::error::{DatabaseError, DatabaseErrorKind};
use sqlx::Transaction as SqlxTransaction;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::{debug, error as log_error};

/// Database transaction wrapper for atomic operations
///
/// Dropping it without calling `commit` rolls the transaction back, so an
/// early `?` return never leaves a half-applied reconciliation behind.
pub struct DatabaseTransaction {
    transaction: Option<SqlxTransaction<'static, Postgres>>,
}

impl DatabaseTransaction {
    /// Begin a new transaction
    pub async fn begin(pool: &PgPool) -> Result<Self, DatabaseError> {
        debug!("Beginning database transaction");

        let transaction = pool.begin().await.map_err(|e| {
            log_error!("Failed to begin transaction: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> Result<(), DatabaseError> {
        match self.transaction.take() {
            Some(tx) => {
                debug!("Committing transaction");
                tx.commit().await.map_err(|e| {
                    log_error!("Failed to commit transaction: {}", e);
                    DatabaseError::from_sqlx(e)
                })
            }
            None => Err(Self::completed()),
        }
    }

    /// Connection to run queries on inside the transaction
    pub fn conn(&mut self) -> Result<&mut PgConnection, DatabaseError> {
        self.transaction
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(Self::completed)
    }

    fn completed() -> DatabaseError {
        DatabaseError::new(DatabaseErrorKind::TransactionError {
            message: "Transaction already completed".to_string(),
        })
    }
}
