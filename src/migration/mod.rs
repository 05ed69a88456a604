//! Schema migrations for the inventory database
//!
//! Migrations are compiled into the crate. Each one is a numbered list of SQL
//! statements; the `stacks_migrations` table records which versions have been
//! applied together with a SHA-256 checksum of their statements, so an edited
//! migration is caught before anything else runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use stacks::config::StacksConfig;
//! use stacks::migration::Migrator;
//! use stacks::pool::ConnectionPool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StacksConfig::load()?;
//! let pool = ConnectionPool::new(&config.database)?;
//! let applied = Migrator::builtin().up(&pool, config.migrations.lock_timeout_seconds)?;
//! println!("applied {applied} migration(s)");
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod checksum;
pub mod error;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod record;
pub mod startup;
pub mod state_table;
pub mod status;

pub use error::MigrationError;
pub use migration::Migration;
pub use migrator::Migrator;
pub use record::MigrationRecord;
pub use startup::startup_migrations;
pub use status::{MigrationStatus, PendingMigration};
