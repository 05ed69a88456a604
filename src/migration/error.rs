//! Migration-specific error types

use crate::executor::StoreError;
use crate::transaction::TransactionError;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Database execution error
    Database(StoreError),
    /// An applied migration's statements changed after it ran
    ChecksumMismatch {
        version: i64,
        name: String,
        stored: String,
        current: String,
    },
    /// The state table lock could not be taken in time
    LockTimeout(String),
    /// Migration failed during execution
    ExecutionFailed {
        version: i64,
        name: String,
        error: String,
    },
    /// The database records a version this build does not know
    UnknownVersion { version: i64, name: String },
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Database error: {e}"),
            MigrationError::ChecksumMismatch {
                version,
                name,
                stored,
                current,
            } => {
                write!(
                    f,
                    "Migration '{name}' (version {version}) has been modified after being applied.\n\
                     Stored checksum: {stored}\n\
                     Current checksum: {current}"
                )
            }
            MigrationError::LockTimeout(msg) => {
                write!(
                    f,
                    "Migration lock timeout: {msg}\n\
                     Another process may be running migrations against stacks_migrations."
                )
            }
            MigrationError::ExecutionFailed { version, name, error } => {
                write!(f, "Migration '{name}' (version {version}) failed during execution: {error}")
            }
            MigrationError::UnknownVersion { version, name } => {
                write!(
                    f,
                    "Applied migration '{name}' (version {version}) is not part of this build.\n\
                     Suggestion: deploy a build that includes it"
                )
            }
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<StoreError> for MigrationError {
    fn from(error: StoreError) -> Self {
        MigrationError::Database(error)
    }
}

impl From<TransactionError> for MigrationError {
    fn from(error: TransactionError) -> Self {
        MigrationError::Database(error.into())
    }
}
