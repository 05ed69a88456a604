//! Location graph
//!
//! Read-only walks up the hierarchy from a shelf position. Each walk is a
//! strict inner join: the first missing link fails with `NotFound` naming the
//! level and id that could not be resolved.

use crate::error::InventoryError;
use crate::model::*;
use crate::store::InventoryStore;
use serde::Serialize;

/// Physical walk order of a shelf: `(aisle, ladder, shelf)`, each level's
/// `sort_priority` falling back to its number id
pub type SortKey = (i64, i64, i64);

#[must_use]
pub fn sort_key(aisle: &Aisle, ladder: &Ladder, shelf: &Shelf) -> SortKey {
    (
        aisle.sort_priority.unwrap_or(aisle.number_id),
        ladder.sort_priority.unwrap_or(ladder.number_id),
        shelf.sort_priority.unwrap_or(shelf.number_id),
    )
}

/// Everything between a shelf position and its aisle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub position: ShelfPosition,
    pub shelf: Shelf,
    pub ladder: Ladder,
    pub side: Side,
    pub aisle: Aisle,
}

impl ResolvedLocation {
    #[must_use]
    pub fn sort_key(&self) -> SortKey {
        sort_key(&self.aisle, &self.ladder, &self.shelf)
    }
}

fn missing(level: &str, id: impl std::fmt::Display) -> InventoryError {
    InventoryError::NotFound(format!("{level} ID {id} Not Found"))
}

/// Walk ShelfPosition → Shelf → Ladder → Side → Aisle
///
/// # Errors
///
/// `NotFound` at the first level that does not exist.
pub fn resolve_location<S>(store: &S, position_id: ShelfPositionId) -> Result<ResolvedLocation, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let position = store
        .shelf_position(position_id)?
        .ok_or_else(|| missing("Shelf Position", position_id))?;
    let shelf = store.shelf(position.shelf_id)?.ok_or_else(|| missing("Shelf", position.shelf_id))?;
    let ladder = store.ladder(shelf.ladder_id)?.ok_or_else(|| missing("Ladder", shelf.ladder_id))?;
    let side = store.side(ladder.side_id)?.ok_or_else(|| missing("Side", ladder.side_id))?;
    let aisle = store.aisle(side.aisle_id)?.ok_or_else(|| missing("Aisle", side.aisle_id))?;

    Ok(ResolvedLocation {
        position,
        shelf,
        ladder,
        side,
        aisle,
    })
}

/// The module a shelf position belongs to
///
/// # Errors
///
/// `NotFound` at the first missing level, including an aisle that hangs
/// directly off a building and so has no module.
pub fn resolve_module<S>(store: &S, position_id: ShelfPositionId) -> Result<Module, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let location = resolve_location(store, position_id)?;
    module_of(store, &location.aisle)
}

fn module_of<S>(store: &S, aisle: &Aisle) -> Result<Module, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let module_id = aisle
        .module_id
        .ok_or_else(|| InventoryError::NotFound(format!("Module Not Found for Aisle ID {}", aisle.id)))?;
    store.module(module_id)?.ok_or_else(|| missing("Module", module_id))
}

/// The building a shelf position belongs to, through its module or directly through its aisle
///
/// # Errors
///
/// `NotFound` at the first missing level.
pub fn resolve_building<S>(store: &S, position_id: ShelfPositionId) -> Result<Building, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let location = resolve_location(store, position_id)?;
    building_of(store, &location.aisle)
}

fn building_of<S>(store: &S, aisle: &Aisle) -> Result<Building, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let building_id = match aisle.building_id {
        Some(id) => id,
        None => module_of(store, aisle)?.building_id,
    };
    store.building(building_id)?.ok_or_else(|| missing("Building", building_id))
}

/// Printable addresses of a shelf position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionAddress {
    /// `{building}-{module}-{aisle}-{L|R}-{ladder}-{shelf}-{position}` using names and numbers
    pub human: String,
    /// Same layout using row ids
    pub internal: String,
}

/// Build both addresses of a shelf position
///
/// Aisles attached directly to a building have no module; that segment is
/// left empty in both forms.
///
/// # Errors
///
/// `NotFound` at the first missing level.
pub fn position_address<S>(store: &S, position_id: ShelfPositionId) -> Result<PositionAddress, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let location = resolve_location(store, position_id)?;
    let module = match location.aisle.module_id {
        Some(_) => Some(module_of(store, &location.aisle)?),
        None => None,
    };
    let building = building_of(store, &location.aisle)?;

    let human = format!(
        "{}-{}-{}-{}-{}-{}-{}",
        building.name,
        module.as_ref().map(|m| m.number.as_str()).unwrap_or_default(),
        location.aisle.number,
        location.side.orientation.initial(),
        location.ladder.number,
        location.shelf.number,
        location.position.number,
    );
    let internal = format!(
        "{}-{}-{}-{}-{}-{}-{}",
        building.id,
        module.as_ref().map(|m| m.id.to_string()).unwrap_or_default(),
        location.aisle.id,
        location.side.id,
        location.ladder.id,
        location.shelf.id,
        location.position.id,
    );

    Ok(PositionAddress { human, internal })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{with_transaction, Database};
    use crate::test_helpers::LayoutBuilder;

    #[test]
    fn test_resolve_location_and_module() {
        let layout = LayoutBuilder::new().shelf(2, 1, 5).build();
        let position = layout.positions[0];

        with_transaction(&layout.store, |s| {
            let location = resolve_location(s, position)?;
            assert_eq!(location.shelf.id, layout.shelves[0]);
            let module = resolve_module(s, position)?;
            assert_eq!(module.id, layout.module);
            let building = resolve_building(s, position)?;
            assert_eq!(building.id, layout.building);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_missing_ladder_is_reported_by_level() {
        let layout = LayoutBuilder::new().shelf(1, 1, 5).build();
        let position = layout.positions[0];
        let ladder_id = layout.store.snapshot().unwrap().shelves[&layout.shelves[0]].ladder_id;
        layout.store.edit(|t| t.ladders.remove(&ladder_id)).unwrap();

        let session = layout.store.begin().unwrap();
        let err = resolve_location(&session, position).unwrap_err();
        assert_eq!(err, InventoryError::NotFound(format!("Ladder ID {ladder_id} Not Found")));
    }

    #[test]
    fn test_missing_position_is_not_found() {
        let layout = LayoutBuilder::new().build();
        let session = layout.store.begin().unwrap();
        let err = resolve_module(&session, ShelfPositionId(999)).unwrap_err();
        assert_eq!(err, InventoryError::NotFound("Shelf Position ID 999 Not Found".into()));
    }

    #[test]
    fn test_position_address_formats() {
        let layout = LayoutBuilder::new().shelf(1, 1, 5).build();
        let position = layout.positions[0];
        let session = layout.store.begin().unwrap();

        let address = position_address(&session, position).unwrap();
        assert_eq!(address.human, "Main-1-1-L-1-1-1");
        assert_eq!(address.internal.split('-').count(), 7);
        assert!(address.internal.ends_with(&format!("-{position}")));
    }

    #[test]
    fn test_sort_priority_overrides_number() {
        let aisle = Aisle {
            id: AisleId(1),
            module_id: None,
            building_id: Some(BuildingId(1)),
            number_id: 40,
            number: 4,
            sort_priority: Some(2),
        };
        let ladder = Ladder {
            id: LadderId(1),
            side_id: SideId(1),
            number_id: 7,
            number: 7,
            sort_priority: None,
        };
        let shelf = Shelf {
            id: ShelfId(1),
            ladder_id: LadderId(1),
            shelf_type_id: ShelfTypeId(1),
            owner_id: OwnerId(1),
            barcode_id: None,
            number_id: 3,
            number: 3,
            sort_priority: Some(0),
        };
        assert_eq!(sort_key(&aisle, &ladder, &shelf), (2, 7, 0));
    }
}
