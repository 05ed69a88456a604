//! Shelving scenarios on the in-memory store
//!
//! Covers allocation against a full shelf, freeing a position through
//! reassignment, scope narrowing, and a randomised run that checks the
//! capacity and single-occupant invariants after every operation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stacks::allocator::{allocate_batch, AllocationRequest, BuildingScopeMode, LocationScope};
use stacks::capacity::{audit_occupancy, shelf_capacity};
use stacks::error::InventoryError;
use stacks::model::*;
use stacks::reassign::{reassign_container, ReassignRequest};
use stacks::store::{Database, InventoryStore};
use stacks::test_helpers::{Layout, LayoutBuilder};

fn trays(job: JobId, scope: LocationScope, ids: &[i64]) -> AllocationRequest {
    AllocationRequest {
        kind: ContainerKind::Tray,
        containers: ids.iter().copied().map(ContainerId).collect(),
        shelving_job_id: job,
        scope,
        mode: BuildingScopeMode::Modules,
    }
}

fn ladder_scope(layout: &Layout, ladder: usize) -> LocationScope {
    LocationScope {
        ladder_id: Some(layout.ladders[ladder]),
        ..LocationScope::building(layout.building)
    }
}

fn tray_position(layout: &Layout, id: i64) -> Option<ShelfPositionId> {
    layout.store.snapshot().unwrap().trays[&ContainerId(id)].shelf_position_id
}

fn available(layout: &Layout, shelf: ShelfId) -> i64 {
    let session = layout.store.begin().unwrap();
    shelf_capacity(&session, shelf).unwrap().available_space()
}

#[test]
fn test_full_shelf_frees_up_after_reassignment() {
    // Ladder 0: the target shelf and a same-size shelf for another owner.
    // Ladder 1: somewhere else for the first tray to go.
    let layout = LayoutBuilder::new()
        .shelf(1, 5, 1)
        .shelf(2, 5, 1)
        .ladder()
        .shelf(1, 5, 1)
        .build();
    let (target, elsewhere) = (layout.shelves[0], layout.shelves[2]);
    layout.tray(100, 1, 5);
    layout.tray(101, 1, 5);
    let job = layout.shelving_job();

    allocate_batch(&layout.store, &trays(job, ladder_scope(&layout, 0), &[100]), 3).unwrap();
    assert_eq!(tray_position(&layout, 100), Some(layout.positions[0]));
    assert_eq!(available(&layout, target), 0);

    let err = allocate_batch(&layout.store, &trays(job, ladder_scope(&layout, 0), &[101]), 3).unwrap_err();
    assert_eq!(
        err,
        InventoryError::NotFound(
            "No available positions on shelves for owner id 1 at size class 5 needed for container with barcode T101"
                .into()
        )
    );
    assert_eq!(tray_position(&layout, 101), None);

    let mut request = ReassignRequest::new(job, 1);
    request.trayed = Some(true);
    request.container_id = Some(ContainerId(100));
    request.shelf_id = Some(elsewhere);
    reassign_container(&layout.store, &request, 3).unwrap();
    assert_eq!(available(&layout, target), 1);
    assert_eq!(available(&layout, elsewhere), 0);

    allocate_batch(&layout.store, &trays(job, ladder_scope(&layout, 0), &[101]), 3).unwrap();
    assert_eq!(tray_position(&layout, 101), Some(layout.positions[0]));
}

#[test]
fn test_failed_batch_places_nothing() {
    let layout = LayoutBuilder::new().shelf(1, 5, 1).shelf(2, 5, 1).build();
    layout.tray(100, 1, 5);
    layout.tray(101, 1, 5);
    let job = layout.shelving_job();

    let scope = LocationScope::building(layout.building);
    assert!(allocate_batch(&layout.store, &trays(job, scope, &[100, 101]), 3).is_err());

    let tables = layout.store.snapshot().unwrap();
    for id in [100, 101] {
        let tray = &tables.trays[&ContainerId(id)];
        assert_eq!(tray.shelf_position_id, None);
        assert_eq!(tray.shelf_position_proposed_id, None);
        assert_eq!(tray.shelving_job_id, None);
    }
}

#[test]
fn test_ladder_scope_wins_over_building() {
    let layout = LayoutBuilder::new()
        .shelf(1, 5, 1)
        .aisle()
        .aisle_priority(-1)
        .shelf(1, 5, 1)
        .build();
    layout.tray(100, 1, 5);
    let job = layout.shelving_job();

    // The second aisle walks first, but the ladder narrows to the first one.
    allocate_batch(&layout.store, &trays(job, ladder_scope(&layout, 0), &[100]), 3).unwrap();
    assert_eq!(tray_position(&layout, 100), Some(layout.positions[0]));
}

#[test]
fn test_missing_scope_is_bad_request() {
    let layout = LayoutBuilder::new().shelf(1, 5, 1).build();
    layout.tray(100, 1, 5);
    let job = layout.shelving_job();

    let err = allocate_batch(&layout.store, &trays(job, LocationScope::default(), &[100]), 3).unwrap_err();
    assert!(matches!(err, InventoryError::BadRequest(_)), "{err}");
}

fn check_invariants(layout: &Layout) {
    let session = layout.store.begin().unwrap();
    assert!(audit_occupancy(&session).unwrap().is_empty());
    for shelf in &layout.shelves {
        let capacity = shelf_capacity(&session, *shelf).unwrap();
        assert!(capacity.available_space() >= 0, "{capacity:?}");
        assert_eq!(
            i64::from(capacity.occupied) + capacity.available_space(),
            i64::from(capacity.max_capacity)
        );
    }
}

#[test]
fn test_random_operations_keep_one_occupant_per_position() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let layout = LayoutBuilder::new()
        .shelf(1, 5, 3)
        .shelf(2, 5, 2)
        .ladder()
        .shelf(1, 6, 2)
        .aisle()
        .shelf(2, 6, 3)
        .shelf(1, 5, 2)
        .build();
    let job = layout.shelving_job();
    let ids: Vec<i64> = (100..124).collect();
    for id in &ids {
        layout.tray(*id, rng.gen_range(1..=2), rng.gen_range(5..=6));
    }

    for _ in 0..60 {
        if rng.gen_bool(0.5) {
            let batch: Vec<i64> = (0..rng.gen_range(1..=3))
                .map(|_| ids[rng.gen_range(0..ids.len())])
                .collect();
            let _ = allocate_batch(&layout.store, &trays(job, LocationScope::building(layout.building), &batch), 3);
        } else {
            let shelf = layout.shelves[rng.gen_range(0..layout.shelves.len())];
            let mut request = ReassignRequest::new(job, rng.gen_range(1..=3));
            request.trayed = Some(true);
            request.container_id = Some(ContainerId(ids[rng.gen_range(0..ids.len())]));
            request.shelf_id = Some(shelf);
            let _ = reassign_container(&layout.store, &request, 3);
        }
        check_invariants(&layout);
    }

    let session = layout.store.begin().unwrap();
    let placed = ids
        .iter()
        .filter(|id| {
            session
                .container(ContainerRef::tray(**id))
                .unwrap()
                .is_some_and(|c| c.is_placed())
        })
        .count();
    assert!(placed > 0);
}
