//! Transaction Module
//!
//! Wraps a pooled `may_postgres` connection in an explicit `BEGIN` / `COMMIT` block.
//! A transaction that is dropped without `commit()` or `rollback()` is rolled
//! back, so an early `?` return inside a unit of work never leaves writes behind.

use crate::executor::{Executor, StoreError};
use crate::pool::PooledConnection;
use may_postgres::types::ToSql;
use may_postgres::{Error as PostgresError, Row};
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed (default)
    #[default]
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    /// Convert to PostgreSQL SQL syntax
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction error type
#[derive(Debug)]
pub enum TransactionError {
    /// PostgreSQL error from may_postgres
    PostgresError(PostgresError),
    /// Transaction already committed or rolled back
    TransactionClosed,
    /// Other transaction errors
    Other(String),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            TransactionError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            TransactionError::Other(s) => write!(f, "Transaction error: {s}"),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<PostgresError> for TransactionError {
    fn from(err: PostgresError) -> Self {
        TransactionError::PostgresError(err)
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::PostgresError(e) => StoreError::from(e),
            TransactionError::TransactionClosed => StoreError::Other("Transaction closed".to_string()),
            TransactionError::Other(s) => StoreError::Other(s),
        }
    }
}

/// A database transaction over a pooled connection
///
/// The connection goes back to the pool once the transaction is finished or
/// dropped. A connection whose rollback failed on drop is discarded instead.
///
/// # Examples
///
/// ```no_run
/// use stacks::config::DatabaseConfig;
/// use stacks::executor::Executor;
/// use stacks::pool::ConnectionPool;
/// use stacks::transaction::{IsolationLevel, Transaction};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::new(&DatabaseConfig::default())?;
/// let tx = Transaction::begin(pool.acquire()?, IsolationLevel::ReadCommitted)?;
/// tx.execute("UPDATE trays SET scanned_for_shelving = $1 WHERE id = $2", &[&true, &42i64])?;
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'a> {
    conn: Option<PooledConnection<'a>>,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Start a transaction on `conn` with the given isolation level
    ///
    /// # Errors
    ///
    /// Returns `TransactionError` if `BEGIN` fails.
    pub fn begin(conn: PooledConnection<'a>, isolation_level: IsolationLevel) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let sql = format!("BEGIN ISOLATION LEVEL {}", isolation_level.to_sql());
        conn.client().execute(sql.as_str(), &[]).map_err(TransactionError::from)?;

        Ok(Self {
            conn: Some(conn),
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been closed or `COMMIT` fails.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.closed = true;
        self.conn().client().execute("COMMIT", &[]).map_err(TransactionError::from)?;
        Ok(())
    }

    /// Roll back the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been closed or `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.closed = true;
        self.conn().client().execute("ROLLBACK", &[]).map_err(TransactionError::from)?;
        Ok(())
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn conn(&self) -> &PooledConnection<'a> {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("transaction connection released before drop"),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Other("Transaction is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.conn().client().execute("ROLLBACK", &[]) {
                log::warn!("rollback of abandoned transaction failed: {e}");
                if let Some(conn) = self.conn.take() {
                    conn.discard();
                }
            }
        }
    }
}

impl Executor for Transaction<'_> {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        self.ensure_open()?;
        self.conn().execute(query, params)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        self.ensure_open()?;
        self.conn().query_one(query, params)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        self.conn().query_all(query, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_to_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.to_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_transaction_error_display() {
        let err = TransactionError::TransactionClosed;
        assert!(err.to_string().contains("Transaction has already been committed"));

        let err = TransactionError::Other("test error".to_string());
        assert!(err.to_string().contains("Transaction error"));
    }

    #[test]
    fn test_transaction_error_conversion() {
        let store_err: StoreError = TransactionError::TransactionClosed.into();
        assert!(store_err.to_string().contains("Transaction closed"));
    }
}
