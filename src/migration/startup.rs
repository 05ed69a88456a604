//! In-process migration execution on application start

use crate::config::MigrationConfig;
use crate::migration::{MigrationError, Migrator};
use crate::pool::ConnectionPool;

/// Apply pending built-in migrations if `run_on_startup` is set
///
/// Fails fast: an application should not start against a schema it could not
/// bring up to date. Returns the number of migrations applied.
///
/// # Errors
///
/// Any [`MigrationError`] from validation, locking or execution.
pub fn startup_migrations(pool: &ConnectionPool, config: &MigrationConfig) -> Result<usize, MigrationError> {
    if !config.run_on_startup {
        log::debug!("migrations on startup disabled");
        return Ok(0);
    }

    let applied = Migrator::builtin().up(pool, config.lock_timeout_seconds)?;
    if applied > 0 {
        log::info!("Applied {applied} migration(s) on startup");
    } else {
        log::debug!("No pending migrations to apply");
    }
    Ok(applied)
}
