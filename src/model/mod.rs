//! Inventory rows as plain Rust values
//!
//! These types carry no persistence logic; both store implementations read
//! and write them through [`crate::store::InventoryStore`].

pub mod barcode;
pub mod container;
pub mod discrepancy;
pub mod ids;
pub mod job;
pub mod location;

pub use barcode::{Barcode, BarcodeType};
pub use container::{Container, ContainerKind, ContainerRef, Item, ItemStatus};
pub use discrepancy::{DiscrepancyKind, NewDiscrepancy, ShelvingDiscrepancy};
pub use ids::*;
pub use job::{Job, JobDetails, JobDraft, JobKind, JobStatus, ShelvingOrigin};
pub use location::{Aisle, Building, Ladder, Module, Shelf, ShelfPosition, ShelfType, Side, SideOrientation};
