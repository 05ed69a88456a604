//! Checksum calculation for migrations

use sha2::{Digest, Sha256};

/// Hex SHA-256 over the statements, each terminated by a newline
///
/// Used to detect a migration that was edited after it was applied.
#[must_use]
pub fn calculate_checksum(statements: &[String]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.trim().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
