//! `MigrationRecord` - Represents entries in the `stacks_migrations` state table

use crate::executor::StoreError;
use chrono::{DateTime, Utc};

/// A row of `stacks_migrations`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: i64,

    pub name: String,

    /// `SHA-256` checksum of the migration's statements
    pub checksum: String,

    pub applied_at: DateTime<Utc>,

    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,

    pub success: bool,
}

impl MigrationRecord {
    /// Create a `MigrationRecord` from a database row
    ///
    /// Expected columns: `version`, `name`, `checksum`, `applied_at`, `execution_time_ms`, `success`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Parse` if a column is missing or has an unexpected type.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, StoreError> {
        let parse = |e: may_postgres::Error| StoreError::Parse(format!("stacks_migrations row: {e}"));
        Ok(Self {
            version: row.try_get("version").map_err(parse)?,
            name: row.try_get("name").map_err(parse)?,
            checksum: row.try_get("checksum").map_err(parse)?,
            applied_at: row.try_get("applied_at").map_err(parse)?,
            execution_time_ms: row.try_get("execution_time_ms").map_err(parse)?,
            success: row.try_get("success").map_err(parse)?,
        })
    }
}
