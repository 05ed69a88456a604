//! Executor Module
//!
//! Provides the `Executor` trait that abstracts database execution over `may_postgres`.
//!
//! Every statement the PostgreSQL store issues goes through this trait, so the
//! pooled connection and the transaction wrapper share the same span, metric
//! and error handling.

use may_postgres::error::SqlState;
use may_postgres::types::ToSql;
use may_postgres::{Error as PostgresError, Row};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Storage layer error type
#[derive(Debug)]
pub enum StoreError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(PostgresError),
    /// A unique constraint rejected the write (SQLSTATE 23505)
    UniqueViolation(String),
    /// No pooled connection could be acquired
    Pool(String),
    /// Query execution error
    Query(String),
    /// Row parsing/conversion error
    Parse(String),
    /// Other storage errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            StoreError::UniqueViolation(s) => write!(f, "Unique constraint violated: {s}"),
            StoreError::Pool(s) => write!(f, "Pool error: {s}"),
            StoreError::Query(s) => write!(f, "Query error: {s}"),
            StoreError::Parse(s) => write!(f, "Parse error: {s}"),
            StoreError::Other(s) => write!(f, "Storage error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            let constraint = err
                .as_db_error()
                .and_then(|db| db.constraint())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            StoreError::UniqueViolation(constraint)
        } else {
            StoreError::Postgres(err)
        }
    }
}

/// Trait for executing database operations
///
/// Implemented by [`crate::pool::PooledConnection`] and
/// [`crate::transaction::Transaction`].
///
/// # Examples
///
/// ```no_run
/// use stacks::executor::{Executor, StoreError};
///
/// fn occupied(executor: &dyn Executor, shelf_id: i64) -> Result<i64, StoreError> {
///     let row = executor.query_one(
///         "SELECT COUNT(*) FROM shelf_positions WHERE shelf_id = $1",
///         &[&shelf_id],
///     )?;
///     Ok(row.get(0))
/// }
/// ```
pub trait Executor {
    /// Execute a SQL statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError>;

    /// Execute a query that must return exactly one row
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or does not return exactly one row.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError>;

    /// Execute a query that returns at most one row
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or returns more than one row.
    fn query_opt(&self, query: &str, params: &[&dyn ToSql]) -> Result<Option<Row>, StoreError> {
        let mut rows = self.query_all(query, params)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(StoreError::Query(format!("expected at most one row, got {n}"))),
        }
    }

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError>;
}

/// Run `f` inside the query span and record its duration and failure metrics.
pub(crate) fn instrumented<T, F>(query: &str, f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, PostgresError>,
{
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_query_span(query).entered();
    #[cfg(not(feature = "tracing"))]
    let _ = query;

    let start = Instant::now();
    let result = f().map_err(|e| {
        #[cfg(feature = "metrics")]
        METRICS.record_query_error();
        StoreError::from(e)
    });

    let duration = start.elapsed();
    #[cfg(feature = "metrics")]
    METRICS.record_query_duration(duration);
    log::trace!("query finished in {duration:?}: {query}");

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Query("test error".to_string());
        assert!(err.to_string().contains("Query error"));

        let err = StoreError::Parse("bad column".to_string());
        assert!(err.to_string().contains("Parse error"));

        let err = StoreError::Pool("timed out".to_string());
        assert!(err.to_string().contains("Pool error"));
    }

    #[test]
    fn test_unique_violation_display_names_constraint() {
        let err = StoreError::UniqueViolation("uq_trays_shelf_position".to_string());
        let display = err.to_string();
        assert!(display.contains("Unique constraint"));
        assert!(display.contains("uq_trays_shelf_position"));
    }
}
