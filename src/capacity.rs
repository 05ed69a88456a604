//! Shelf capacity ledger
//!
//! Capacity is never stored. `available_space` is always
//! `max_capacity - occupied positions`, recomputed from the positions the
//! containers actually reference, so there is no counter to drift.

use crate::error::InventoryError;
use crate::model::*;
use crate::store::InventoryStore;
use serde::Serialize;

/// Capacity of one shelf as of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShelfCapacity {
    pub shelf_id: ShelfId,
    pub max_capacity: i32,
    pub occupied: u32,
}

impl ShelfCapacity {
    /// Free slots; negative only if the shelf is over-full
    #[must_use]
    pub fn available_space(&self) -> i64 {
        i64::from(self.max_capacity) - i64::from(self.occupied)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.available_space() <= 0
    }
}

/// Read the capacity of `shelf_id`
///
/// # Errors
///
/// `NotFound` if the shelf or its shelf type does not exist.
pub fn shelf_capacity<S>(store: &S, shelf_id: ShelfId) -> Result<ShelfCapacity, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let shelf = store
        .shelf(shelf_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Shelf ID {shelf_id} Not Found")))?;
    let shelf_type = store
        .shelf_type(shelf.shelf_type_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Shelf Type ID {} Not Found", shelf.shelf_type_id)))?;

    Ok(ShelfCapacity {
        shelf_id,
        max_capacity: shelf_type.max_capacity,
        occupied: store.occupied_count(shelf_id)?,
    })
}

/// Reject placement onto a full shelf
///
/// # Errors
///
/// `Validation` when `available_space <= 0`.
pub fn ensure_room(capacity: &ShelfCapacity) -> Result<(), InventoryError> {
    if capacity.is_full() {
        return Err(InventoryError::Validation(format!(
            "Shelf ID {} has no available space",
            capacity.shelf_id
        )));
    }
    Ok(())
}

/// Change in available space caused by moving one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityDelta {
    /// Shelf gaining one free slot
    pub vacated: Option<ShelfId>,
    /// Shelf losing one free slot
    pub occupied: Option<ShelfId>,
}

impl CapacityDelta {
    /// Delta for a container moving from `old` (if placed) onto `new`
    ///
    /// Moves within one shelf leave its space unchanged.
    #[must_use]
    pub fn for_move(old: Option<ShelfId>, new: ShelfId) -> Self {
        match old {
            Some(old) if old == new => Self::default(),
            old => Self {
                vacated: old,
                occupied: Some(new),
            },
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.vacated.is_none() && self.occupied.is_none()
    }

    /// Change applied to `shelf`: +1 for the vacated shelf, -1 for the newly occupied one
    #[must_use]
    pub fn change_for(&self, shelf: ShelfId) -> i64 {
        let mut change = 0;
        if self.vacated == Some(shelf) {
            change += 1;
        }
        if self.occupied == Some(shelf) {
            change -= 1;
        }
        change
    }
}

/// A position held by more than one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedPosition {
    pub position_id: ShelfPositionId,
    pub occupants: Vec<ContainerRef>,
}

/// Every position referenced by more than one container, ascending by position id
///
/// An empty result means the at-most-one-occupant rule holds.
///
/// # Errors
///
/// Propagates storage failures.
pub fn audit_occupancy<S>(store: &S) -> Result<Vec<SharedPosition>, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let shared: Vec<SharedPosition> = store
        .shared_positions()?
        .into_iter()
        .map(|(position_id, occupants)| SharedPosition { position_id, occupants })
        .collect();
    if !shared.is_empty() {
        log::warn!("{} shelf position(s) have more than one occupant", shared.len());
    }
    Ok(shared)
}

/// Occupancy of one position in a [`CapacityAudit`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionOccupancy {
    pub position_id: ShelfPositionId,
    pub number: i32,
    pub occupants: Vec<ContainerRef>,
}

/// Capacity of a shelf together with what sits on each of its positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityAudit {
    pub capacity: ShelfCapacity,
    pub available_space: i64,
    pub positions: Vec<PositionOccupancy>,
}

/// Build a [`CapacityAudit`] for `shelf_id`
///
/// Positions are probed by number from 1 to `max_capacity`; missing numbers are skipped.
///
/// # Errors
///
/// `NotFound` if the shelf or its shelf type does not exist.
pub fn audit_capacity<S>(store: &S, shelf_id: ShelfId) -> Result<CapacityAudit, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let capacity = shelf_capacity(store, shelf_id)?;
    let mut positions = Vec::new();
    for number in 1..=capacity.max_capacity {
        if let Some(position) = store.position_on_shelf(shelf_id, number)? {
            positions.push(PositionOccupancy {
                position_id: position.id,
                number,
                occupants: store.occupants(position.id)?,
            });
        }
    }

    Ok(CapacityAudit {
        available_space: capacity.available_space(),
        capacity,
        positions,
    })
}
