//! Migration trait definition

use super::checksum::calculate_checksum;

/// A numbered, forward-only schema change
///
/// Statements run in order inside one transaction. Versions must be positive
/// and unique; they are applied in ascending order.
pub trait Migration: Send + Sync {
    /// Human-readable identifier
    fn name(&self) -> &str;

    fn version(&self) -> i64;

    /// SQL statements, executed one at a time
    fn statements(&self) -> Vec<String>;

    /// SHA-256 of the statements; stored when the migration is applied
    fn checksum(&self) -> String {
        calculate_checksum(&self.statements())
    }
}
