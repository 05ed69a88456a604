//! Location hierarchy rows
//!
//! Building 1-* Module 1-* Aisle 1-* Side 1-* Ladder 1-* Shelf 1-* ShelfPosition.
//! Children reference their parent by id only. Aisles can also hang directly
//! off a building, without a module.

use super::ids::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: BuildingId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub building_id: BuildingId,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aisle {
    pub id: AisleId,
    pub module_id: Option<ModuleId>,
    /// Set for aisles attached directly to a building
    pub building_id: Option<BuildingId>,
    /// Id of the aisle-number reference row; the default walk order
    pub number_id: i64,
    pub number: i32,
    pub sort_priority: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideOrientation {
    Left,
    Right,
}

impl SideOrientation {
    /// Single letter used in position addresses
    #[must_use]
    pub fn initial(self) -> char {
        match self {
            SideOrientation::Left => 'L',
            SideOrientation::Right => 'R',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Side {
    pub id: SideId,
    pub aisle_id: AisleId,
    pub orientation: SideOrientation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ladder {
    pub id: LadderId,
    pub side_id: SideId,
    pub number_id: i64,
    pub number: i32,
    pub sort_priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfType {
    pub id: ShelfTypeId,
    pub size_class_id: SizeClassId,
    pub max_capacity: i32,
}

/// A shelf. Available space is never stored; see [`crate::capacity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelf {
    pub id: ShelfId,
    pub ladder_id: LadderId,
    pub shelf_type_id: ShelfTypeId,
    pub owner_id: OwnerId,
    pub barcode_id: Option<BarcodeId>,
    pub number_id: i64,
    pub number: i32,
    pub sort_priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfPosition {
    pub id: ShelfPositionId,
    pub shelf_id: ShelfId,
    /// Ordinal within the shelf, 1..=max_capacity
    pub number: i32,
}
