//! Migration status tracking

use crate::migration::MigrationRecord;

/// Applied and pending migrations of one database
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<PendingMigration>,
}

/// A built-in migration not yet recorded in the state table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(applied: Vec<MigrationRecord>, pending: Vec<PendingMigration>) -> Self {
        Self { applied, pending }
    }

    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn latest_applied_version(&self) -> Option<i64> {
        self.applied.iter().map(|m| m.version).max()
    }

    #[must_use]
    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|m| m.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_status_versions() {
        let applied = vec![MigrationRecord {
            version: 1,
            name: "inventory_schema".to_string(),
            checksum: "x".to_string(),
            applied_at: Utc::now(),
            execution_time_ms: Some(12),
            success: true,
        }];
        let pending = vec![PendingMigration {
            version: 2,
            name: "occupancy_constraints".to_string(),
            checksum: "y".to_string(),
        }];
        let status = MigrationStatus::new(applied, pending);
        assert!(!status.is_up_to_date());
        assert_eq!(status.latest_applied_version(), Some(1));
        assert_eq!(status.next_pending_version(), Some(2));
    }
}
