//! # Stacks
//!
//! Shelf assignment and job lifecycle for a high-density library storage
//! facility, on the `may` coroutine runtime and PostgreSQL.
//!
//! - [`allocator`] places trays and non-tray items on empty, compatible shelf positions
//! - [`transition`] accumulates job run time across status changes
//! - [`capacity`] computes shelf occupancy and available space
//! - [`location`] walks the building / module / aisle / side / ladder / shelf hierarchy
//! - [`reassign`] moves a container to a scanned shelf position
//! - [`queue`] orders refile jobs, pick lists and the refile queue for retrieval
//! - [`jobs`] creates shelving jobs, applies job updates and runs completion cascades
//!
//! Every operation works through [`store::InventoryStore`]; see [`store`] for
//! the PostgreSQL and in-process implementations.

pub mod allocator;
pub mod barcodes;
pub mod capacity;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod location;
pub mod metrics;
pub mod migration;
pub mod model;
pub mod params;
pub mod pool;
pub mod queue;
pub mod reassign;
pub mod store;
pub mod test_helpers;
pub mod transaction;
pub mod transition;

pub use error::InventoryError;
pub use store::memory::MemoryStore;
pub use store::postgres::PgDatabase;
pub use store::{with_transaction, Database, InventoryStore, UnitOfWork};
