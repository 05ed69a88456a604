//! Migrator - applies the compiled-in migrations in version order

use crate::executor::Executor;
use crate::migration::builtin;
use crate::migration::lock::lock_state_table;
use crate::migration::state_table::initialize_state_table;
use crate::migration::{Migration, MigrationError, MigrationRecord, MigrationStatus, PendingMigration};
use crate::pool::ConnectionPool;
use crate::transaction::{IsolationLevel, Transaction};
use std::collections::BTreeSet;
use std::time::Instant;

/// Ordered registry of migrations plus the logic to apply them
pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
}

impl Migrator {
    /// Registry over `migrations`, sorted by version
    #[must_use]
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Self {
        migrations.sort_by_key(|m| m.version());
        Self { migrations }
    }

    /// The inventory schema shipped with this crate
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin::migrations())
    }

    #[must_use]
    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Applied vs pending migrations
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the state table cannot be read.
    pub fn status(&self, executor: &dyn Executor) -> Result<MigrationStatus, MigrationError> {
        initialize_state_table(executor)?;
        let applied = Self::query_applied_migrations(executor)?;
        let versions: BTreeSet<i64> = applied.iter().map(|r| r.version).collect();

        let pending = self
            .migrations
            .iter()
            .filter(|m| !versions.contains(&m.version()))
            .map(|m| PendingMigration {
                version: m.version(),
                name: m.name().to_string(),
                checksum: m.checksum(),
            })
            .collect();

        Ok(MigrationStatus::new(applied, pending))
    }

    /// Compare every applied migration with the compiled-in one
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` when statements changed after being applied,
    /// `UnknownVersion` when the database is ahead of this build.
    pub fn validate_checksums(&self, executor: &dyn Executor) -> Result<(), MigrationError> {
        let status = self.status(executor)?;
        for record in &status.applied {
            let Some(migration) = self.migrations.iter().find(|m| m.version() == record.version) else {
                return Err(MigrationError::UnknownVersion {
                    version: record.version,
                    name: record.name.clone(),
                });
            };
            let current = migration.checksum();
            if current != record.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: record.version,
                    name: record.name.clone(),
                    stored: record.checksum.clone(),
                    current,
                });
            }
        }
        Ok(())
    }

    /// Apply every pending migration, each in its own transaction
    ///
    /// Returns the number of migrations applied by this call.
    ///
    /// # Errors
    ///
    /// Checksum validation errors, `LockTimeout`, or `ExecutionFailed`. A failed
    /// migration is rolled back completely; earlier ones stay applied.
    pub fn up(&self, pool: &ConnectionPool, lock_timeout_seconds: u64) -> Result<usize, MigrationError> {
        {
            let conn = pool.acquire()?;
            self.validate_checksums(&conn)?;
        }

        let mut applied = 0;
        for migration in &self.migrations {
            let tx = Transaction::begin(pool.acquire()?, IsolationLevel::ReadCommitted)?;
            lock_state_table(&tx, lock_timeout_seconds)?;

            let recorded = tx.query_opt(
                "SELECT version FROM stacks_migrations WHERE version = $1",
                &[&migration.version()],
            )?;
            if recorded.is_some() {
                tx.rollback()?;
                continue;
            }

            Self::apply(&tx, migration.as_ref())?;
            tx.commit()?;
            applied += 1;
        }
        Ok(applied)
    }

    fn apply(executor: &dyn Executor, migration: &dyn Migration) -> Result<(), MigrationError> {
        let start = Instant::now();
        log::info!("applying migration {} ({})", migration.version(), migration.name());

        for statement in migration.statements() {
            executor
                .execute(&statement, &[])
                .map_err(|e| MigrationError::ExecutionFailed {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    error: e.to_string(),
                })?;
        }

        let execution_time_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        executor.execute(
            "INSERT INTO stacks_migrations (version, name, checksum, execution_time_ms, success) \
             VALUES ($1, $2, $3, $4, true)",
            &[
                &migration.version(),
                &migration.name(),
                &migration.checksum(),
                &execution_time_ms,
            ],
        )?;
        log::info!(
            "migration {} ({}) applied in {execution_time_ms} ms",
            migration.version(),
            migration.name()
        );
        Ok(())
    }

    fn query_applied_migrations(executor: &dyn Executor) -> Result<Vec<MigrationRecord>, MigrationError> {
        let rows = executor.query_all(
            "SELECT version, name, checksum, applied_at, execution_time_ms, success \
             FROM stacks_migrations ORDER BY version ASC",
            &[],
        )?;
        rows.iter()
            .map(|row| MigrationRecord::from_row(row).map_err(MigrationError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Numbered(i64);

    impl Migration for Numbered {
        fn name(&self) -> &str {
            "numbered"
        }

        fn version(&self) -> i64 {
            self.0
        }

        fn statements(&self) -> Vec<String> {
            vec![format!("SELECT {}", self.0)]
        }
    }

    #[test]
    fn test_registry_is_sorted_by_version() {
        let migrator = Migrator::new(vec![Box::new(Numbered(3)), Box::new(Numbered(1)), Box::new(Numbered(2))]);
        let versions: Vec<i64> = migrator.migrations().iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_builtin_versions_are_unique_and_positive() {
        let migrator = Migrator::builtin();
        let versions: Vec<i64> = migrator.migrations().iter().map(|m| m.version()).collect();
        let unique: BTreeSet<i64> = versions.iter().copied().collect();
        assert_eq!(unique.len(), versions.len());
        assert!(versions.iter().all(|v| *v > 0));
    }
}
