//! Job lifecycle scenarios on the in-memory store

use chrono::{TimeDelta, Utc};
use stacks::config::{AllocationConfig, CascadeConfig};
use stacks::error::InventoryError;
use stacks::jobs::cascade::CascadeDispatcher;
use stacks::jobs::{create_shelving_job, update_job, ShelvingJobRequest};
use stacks::model::*;
use stacks::store::{Database, JobMember, UnitOfWork};
use stacks::test_helpers::LayoutBuilder;
use stacks::transition::JobUpdate;

#[test]
fn test_run_time_accumulates_across_transitions() {
    let layout = LayoutBuilder::new().build();
    let job = layout.job(JobDetails::Refile);
    let t0 = Utc::now();
    layout
        .store
        .edit(|t| {
            if let Some(j) = t.jobs.get_mut(&(JobKind::Refile, job)) {
                j.create_dt = t0 - TimeDelta::seconds(5);
            }
        })
        .unwrap();

    let running = update_job(&layout.store, JobKind::Refile, job, &JobUpdate::status(JobStatus::Running, t0), None).unwrap();
    assert_eq!(running.run_time, TimeDelta::seconds(5));
    assert_eq!(running.last_transition, Some(t0));

    let t1 = t0 + TimeDelta::seconds(10);
    let paused = update_job(&layout.store, JobKind::Refile, job, &JobUpdate::status(JobStatus::Paused, t1), None).unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.run_time, TimeDelta::seconds(15));
    assert_eq!(paused.last_transition, Some(t1));
}

#[test]
fn test_completed_job_rejects_further_status_changes() {
    let layout = LayoutBuilder::new().build();
    let job = layout.job(JobDetails::Refile);
    let now = Utc::now();
    update_job(&layout.store, JobKind::Refile, job, &JobUpdate::status(JobStatus::Completed, now), None).unwrap();

    let err = update_job(&layout.store, JobKind::Refile, job, &JobUpdate::status(JobStatus::Running, now), None).unwrap_err();
    assert!(matches!(err, InventoryError::Validation(_)), "{err}");
}

#[test]
fn test_completing_withdraw_job_vacates_positions() {
    let layout = LayoutBuilder::new().shelf(1, 5, 2).build();
    layout.place_non_tray(20, layout.positions[0]);
    layout.place_tray(10, layout.positions[1]);
    layout.item(30, Some(10));
    let job = layout.job(JobDetails::Withdraw);

    let mut session = layout.store.begin().unwrap();
    for member in [
        JobMember::Container(ContainerRef::non_tray(20)),
        JobMember::Container(ContainerRef::tray(10)),
        JobMember::Item(ItemId(30)),
    ] {
        session.add_job_member(JobKind::Withdraw, job, member).unwrap();
    }
    session.commit().unwrap();

    update_job(&layout.store, JobKind::Withdraw, job, &JobUpdate::status(JobStatus::Completed, Utc::now()), None).unwrap();

    let tables = layout.store.snapshot().unwrap();
    let non_tray = &tables.non_trays[&ContainerId(20)];
    assert_eq!(non_tray.status, ItemStatus::Withdrawn);
    assert_eq!(non_tray.shelf_position_id, None);
    assert_eq!(non_tray.barcode_id, None);
    let moved = non_tray.withdrawn_barcode_id.unwrap();
    assert!(tables.barcodes[&moved].withdrawn);

    assert_eq!(tables.trays[&ContainerId(10)].shelf_position_id, None);
    let item = &tables.items[&ItemId(30)];
    assert_eq!(item.status, ItemStatus::Withdrawn);
    assert!(item.withdrawal_dt.is_some());
}

#[test]
fn test_accession_to_shelving_through_cascades() {
    let layout = LayoutBuilder::new().shelf(3, 5, 2).build();
    layout.tray(10, 1, 5);
    layout.tray(11, 1, 5);
    let accession = layout.job(JobDetails::Accession {
        trayed: true,
        owner_id: Some(OwnerId(3)),
        size_class_id: Some(SizeClassId(5)),
    });
    layout
        .store
        .edit(|t| {
            for id in [10, 11] {
                if let Some(tray) = t.trays.get_mut(&ContainerId(id)) {
                    tray.accession_job_id = Some(accession);
                }
            }
        })
        .unwrap();

    let dispatcher = CascadeDispatcher::start(layout.store.clone(), &CascadeConfig::default());
    update_job(
        &layout.store,
        JobKind::Accession,
        accession,
        &JobUpdate::status(JobStatus::Completed, Utc::now()),
        Some(&dispatcher),
    )
    .unwrap();
    dispatcher.shutdown();

    let tables = layout.store.snapshot().unwrap();
    let verification = tables
        .jobs
        .values()
        .find(|j| matches!(j.details, JobDetails::Verification { accession_job_id: Some(a), .. } if a == accession))
        .map(|j| j.id)
        .unwrap();
    assert_eq!(tables.trays[&ContainerId(10)].owner_id, Some(OwnerId(3)));

    update_job(
        &layout.store,
        JobKind::Verification,
        verification,
        &JobUpdate::status(JobStatus::Completed, Utc::now()),
        None,
    )
    .unwrap();

    let request = ShelvingJobRequest {
        origin: ShelvingOrigin::Verification,
        building_id: layout.building,
        user_id: Some(UserId(2)),
        verification_jobs: vec![verification],
        module_id: None,
        aisle_id: None,
        side_id: None,
        ladder_id: None,
    };
    let shelving = create_shelving_job(&layout.store, &request, &AllocationConfig::default()).unwrap();

    let tables = layout.store.snapshot().unwrap();
    for id in [10, 11] {
        let tray = &tables.trays[&ContainerId(id)];
        assert_eq!(tray.shelving_job_id, Some(shelving.id));
        assert!(tray.is_placed());
    }
    let linked = &tables.jobs[&(JobKind::Verification, verification)];
    assert!(matches!(linked.details, JobDetails::Verification { shelving_job_id: Some(s), .. } if s == shelving.id));

    let err = create_shelving_job(&layout.store, &request, &AllocationConfig::default()).unwrap_err();
    assert!(matches!(err, InventoryError::Validation(ref m) if m.contains("already been shelved")), "{err}");
}
