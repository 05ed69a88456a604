//! Exclusive lock on the migration state table
//!
//! Taken inside each migration's transaction and released by its commit or
//! rollback, so concurrent migrators apply every version exactly once.

use crate::executor::{Executor, StoreError};
use crate::migration::MigrationError;
use may_postgres::error::SqlState;

/// Lock `stacks_migrations` for the rest of the current transaction
///
/// Readers (`status`) are not blocked; a second migrator waits up to
/// `timeout_seconds`.
///
/// # Errors
///
/// Returns `MigrationError::LockTimeout` if the lock is not granted in time.
pub fn lock_state_table(executor: &dyn Executor, timeout_seconds: u64) -> Result<(), MigrationError> {
    executor.execute(&format!("SET LOCAL lock_timeout = '{timeout_seconds}s'"), &[])?;
    match executor.execute("LOCK TABLE stacks_migrations IN EXCLUSIVE MODE", &[]) {
        Ok(_) => Ok(()),
        Err(StoreError::Postgres(e)) if e.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) => {
            Err(MigrationError::LockTimeout(format!(
                "stacks_migrations still locked after {timeout_seconds} seconds"
            )))
        }
        Err(e) => Err(e.into()),
    }
}
