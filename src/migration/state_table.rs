//! Migration state table management

use crate::executor::{Executor, StoreError};

pub const STATE_TABLE: &str = "stacks_migrations";

/// Create `stacks_migrations` if it does not exist yet
///
/// # Errors
///
/// Returns `StoreError` if the DDL fails.
pub fn initialize_state_table(executor: &dyn Executor) -> Result<(), StoreError> {
    executor.execute(
        r#"
        CREATE TABLE IF NOT EXISTS stacks_migrations (
            version BIGINT PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            checksum VARCHAR(64) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            execution_time_ms BIGINT,
            success BOOLEAN NOT NULL DEFAULT true
        )
        "#,
        &[],
    )?;
    Ok(())
}
