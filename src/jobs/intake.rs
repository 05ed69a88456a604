//! Scanning barcodes into refile and withdraw jobs
//!
//! Both intakes take the barcode values a technician scanned. Refile intake is
//! all-or-nothing: every value must resolve, and each entry leaves the refile
//! queue as it joins the job. Withdraw intake screens each value on its own
//! and reports the ones it refused instead of failing the batch.

use crate::error::InventoryError;
use crate::model::*;
use crate::store::{with_transaction, Database, InventoryStore, JobMember, JobMembers};
use chrono::Utc;
use serde::Serialize;

const NO_BARCODES: &str = "At least one barcode value must be provided";

/// Outcome of [`add_to_withdraw_job`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WithdrawIntake {
    /// Members newly associated with the job
    #[serde(skip)]
    pub added: JobMembers,
    /// Scanned values that were refused, in scan order, each reported once
    pub errored_barcodes: Vec<String>,
}

fn open_job<S>(session: &S, kind: JobKind, id: JobId) -> Result<Job, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let job = session
        .job(kind, id)?
        .ok_or_else(|| InventoryError::NotFound(format!("{kind} ID {id} Not Found")))?;
    if job.status.is_terminal() {
        return Err(InventoryError::Validation(format!(
            "{kind} ID {id} is already {} and cannot take new members",
            job.status
        )));
    }
    Ok(job)
}

/// Scan values in order with repeats dropped
fn distinct(barcode_values: &[String]) -> Vec<&str> {
    let mut seen = Vec::with_capacity(barcode_values.len());
    for value in barcode_values {
        if !seen.contains(&value.as_str()) {
            seen.push(value.as_str());
        }
    }
    seen
}

/// Move scanned items and non-tray items from the refile queue into a refile job
///
/// Each value is looked up as an item first, then as a non-tray item. Matches
/// join the job and lose their `scanned_for_refile_queue` flag, whether or
/// not they were queued. Re-adding a member is a no-op.
///
/// # Errors
///
/// - `BadRequest` for an empty list
/// - `NotFound` for an unknown job or a value that names no item or non-tray item
/// - `Validation` if the job is already `Completed` or `Cancelled`
pub fn add_to_refile_job<S>(session: &mut S, job_id: JobId, barcode_values: &[String]) -> Result<JobMembers, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if barcode_values.is_empty() {
        return Err(InventoryError::BadRequest(NO_BARCODES.to_string()));
    }
    open_job(&*session, JobKind::Refile, job_id)?;

    let mut added = JobMembers::default();
    for value in distinct(barcode_values) {
        if let Some(mut item) = session.item_by_barcode(value)? {
            session.add_job_member(JobKind::Refile, job_id, JobMember::Item(item.id))?;
            item.scanned_for_refile_queue = false;
            session.save_item(&item)?;
            added.items.push(item.id);
            continue;
        }
        let mut container = session
            .container_by_barcode(ContainerKind::NonTray, value)?
            .ok_or_else(|| {
                InventoryError::NotFound(format!("No items or non-tray items were found with barcode {value}"))
            })?;
        session.add_job_member(JobKind::Refile, job_id, JobMember::Container(container.reference()))?;
        container.scanned_for_refile_queue = false;
        session.save_container(&container)?;
        added.containers.push(container.reference());
    }

    log::info!(
        "refile job {job_id}: {} item(s) and {} non-tray item(s) taken off the refile queue",
        added.items.len(),
        added.containers.len()
    );
    Ok(added)
}

/// Create a refile job holding the scanned values, as one unit of work
///
/// # Errors
///
/// As [`add_to_refile_job`]; no job is stored when it fails.
pub fn create_refile_job<D>(db: &D, barcode_values: &[String], user_id: Option<UserId>) -> Result<Job, InventoryError>
where
    D: Database,
{
    if barcode_values.is_empty() {
        return Err(InventoryError::BadRequest(NO_BARCODES.to_string()));
    }
    with_transaction(db, |session| {
        let job = session.insert_job(JobDraft::new(JobDetails::Refile, user_id, Utc::now()))?;
        add_to_refile_job(session, job.id, barcode_values)?;
        Ok(job)
    })
}

/// Why a member cannot join a withdraw job, if it cannot
fn withdraw_refusal<S>(session: &S, job_id: JobId, member: JobMember, status: ItemStatus) -> Result<Option<&'static str>, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    match status {
        ItemStatus::Requested => return Ok(Some("requested")),
        ItemStatus::Withdrawn => return Ok(Some("already withdrawn")),
        _ => {}
    }
    for other in session.jobs_with_member(JobKind::Withdraw, member)? {
        if other == job_id {
            continue;
        }
        let claimed = session
            .job(JobKind::Withdraw, other)?
            .is_some_and(|job| job.status != JobStatus::Cancelled);
        if claimed {
            return Ok(Some("held by another withdraw job"));
        }
    }
    Ok(None)
}

/// Add one item or non-tray item unless refused; `Ok(false)` means refused
fn admit<S>(session: &mut S, job_id: JobId, member: JobMember, status: ItemStatus, added: &mut JobMembers) -> Result<bool, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if let Some(reason) = withdraw_refusal(&*session, job_id, member, status)? {
        log::debug!("withdraw job {job_id} refused {member:?}: {reason}");
        return Ok(false);
    }
    if session.jobs_with_member(JobKind::Withdraw, member)?.contains(&job_id) {
        return Ok(true);
    }
    session.add_job_member(JobKind::Withdraw, job_id, member)?;
    match member {
        JobMember::Container(c) => added.containers.push(c),
        JobMember::Item(i) => added.items.push(i),
    }
    Ok(true)
}

/// Screen scanned values into a withdraw job
///
/// A value may name an item, a non-tray item or a tray; a tray joins the job
/// together with every item inside it. Refused, and reported in
/// `errored_barcodes`:
/// - values that name nothing
/// - items and non-tray items that are `Requested` or already `Withdrawn`
/// - items and non-tray items held by another withdraw job that was not cancelled
///
/// A tray is reported when any of its items is refused; its other items are
/// still added. Re-scanning a member of this job is a no-op.
///
/// # Errors
///
/// - `BadRequest` for an empty list
/// - `NotFound` for an unknown job
/// - `Validation` if the job is already `Completed` or `Cancelled`
pub fn add_to_withdraw_job<S>(session: &mut S, job_id: JobId, barcode_values: &[String]) -> Result<WithdrawIntake, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if barcode_values.is_empty() {
        return Err(InventoryError::BadRequest(NO_BARCODES.to_string()));
    }
    open_job(&*session, JobKind::Withdraw, job_id)?;

    let mut intake = WithdrawIntake::default();
    for value in distinct(barcode_values) {
        let accepted = if let Some(item) = session.item_by_barcode(value)? {
            admit(session, job_id, JobMember::Item(item.id), item.status, &mut intake.added)?
        } else if let Some(container) = session.container_by_barcode(ContainerKind::NonTray, value)? {
            let member = JobMember::Container(container.reference());
            admit(session, job_id, member, container.status, &mut intake.added)?
        } else if let Some(tray) = session.container_by_barcode(ContainerKind::Tray, value)? {
            let member = JobMember::Container(tray.reference());
            if !session.jobs_with_member(JobKind::Withdraw, member)?.contains(&job_id) {
                session.add_job_member(JobKind::Withdraw, job_id, member)?;
                intake.added.containers.push(tray.reference());
            }
            let mut all_items = true;
            for id in session.tray_items(tray.id)? {
                let Some(item) = session.item(id)? else {
                    continue;
                };
                all_items &= admit(session, job_id, JobMember::Item(id), item.status, &mut intake.added)?;
            }
            all_items
        } else {
            false
        };
        if !accepted {
            intake.errored_barcodes.push(value.to_string());
        }
    }

    log::info!(
        "withdraw job {job_id}: {} container(s) and {} item(s) added, {} barcode(s) refused",
        intake.added.containers.len(),
        intake.added.items.len(),
        intake.errored_barcodes.len()
    );
    Ok(intake)
}

/// [`add_to_withdraw_job`] as its own unit of work
///
/// # Errors
///
/// As [`add_to_withdraw_job`].
pub fn add_withdraw_barcodes<D>(db: &D, job_id: JobId, barcode_values: &[String]) -> Result<WithdrawIntake, InventoryError>
where
    D: Database,
{
    with_transaction(db, |session| add_to_withdraw_job(session, job_id, barcode_values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::UnitOfWork;
    use crate::test_helpers::{Layout, LayoutBuilder};

    fn values(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|v| (*v).to_string()).collect()
    }

    fn queue(layout: &Layout) {
        layout
            .store
            .edit(|t| {
                t.items.values_mut().for_each(|i| i.scanned_for_refile_queue = true);
                t.non_trays.values_mut().for_each(|c| c.scanned_for_refile_queue = true);
            })
            .unwrap();
    }

    fn set_item_status(store: &MemoryStore, id: i64, status: ItemStatus) {
        store
            .edit(|t| {
                if let Some(item) = t.items.get_mut(&ItemId(id)) {
                    item.status = status;
                }
            })
            .unwrap();
    }

    #[test]
    fn test_refile_intake_needs_barcodes() {
        let layout = LayoutBuilder::new().build();
        let job = layout.job(JobDetails::Refile);
        let mut session = layout.store.begin().unwrap();
        assert_eq!(
            add_to_refile_job(&mut session, job, &[]),
            Err(InventoryError::BadRequest("At least one barcode value must be provided".into()))
        );
        drop(session);
        assert!(matches!(
            create_refile_job(&layout.store, &[], None),
            Err(InventoryError::BadRequest(_))
        ));
    }

    #[test]
    fn test_refile_intake_empties_the_queue() {
        let layout = LayoutBuilder::new().build();
        layout.item(30, None);
        layout.item(31, None);
        layout.non_tray(20, 1, 5);
        queue(&layout);

        let job = create_refile_job(&layout.store, &values(&["I30", "N20", "I30"]), Some(UserId(3))).unwrap();

        let session = layout.store.begin().unwrap();
        let members = session.job_members(JobKind::Refile, job.id).unwrap();
        assert_eq!(members.items, vec![ItemId(30)]);
        assert_eq!(members.containers, vec![ContainerRef::non_tray(20)]);
        let remaining = session.refile_queue().unwrap();
        assert_eq!(remaining.items, vec![ItemId(31)]);
        assert!(remaining.containers.is_empty());
    }

    #[test]
    fn test_refile_intake_unknown_barcode_adds_nothing() {
        let layout = LayoutBuilder::new().build();
        layout.item(30, None);
        layout.tray(10, 1, 5);
        queue(&layout);
        let jobs_before = layout.store.snapshot().unwrap().jobs.len();

        let err = create_refile_job(&layout.store, &values(&["I30", "T10"]), None).unwrap_err();
        assert_eq!(
            err,
            InventoryError::NotFound("No items or non-tray items were found with barcode T10".into())
        );

        let tables = layout.store.snapshot().unwrap();
        assert_eq!(tables.jobs.len(), jobs_before);
        assert!(tables.items[&ItemId(30)].scanned_for_refile_queue);
    }

    #[test]
    fn test_refile_intake_rejects_closed_job() {
        let layout = LayoutBuilder::new().build();
        layout.item(30, None);
        let job = layout.job(JobDetails::Refile);
        layout
            .store
            .edit(|t| {
                if let Some(j) = t.jobs.get_mut(&(JobKind::Refile, job)) {
                    j.status = JobStatus::Completed;
                }
            })
            .unwrap();

        let mut session = layout.store.begin().unwrap();
        let err = add_to_refile_job(&mut session, job, &values(&["I30"])).unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
        let err = add_to_refile_job(&mut session, JobId(9999), &values(&["I30"])).unwrap_err();
        assert_eq!(err, InventoryError::NotFound("Refile Job ID 9999 Not Found".into()));
    }

    #[test]
    fn test_withdraw_intake_needs_barcodes() {
        let layout = LayoutBuilder::new().build();
        let job = layout.job(JobDetails::Withdraw);
        assert_eq!(
            add_withdraw_barcodes(&layout.store, job, &[]),
            Err(InventoryError::BadRequest("At least one barcode value must be provided".into()))
        );
    }

    #[test]
    fn test_withdraw_intake_refuses_requested_and_unknown() {
        let layout = LayoutBuilder::new().build();
        layout.item(30, None);
        layout.item(31, None);
        layout.non_tray(20, 1, 5);
        set_item_status(&layout.store, 31, ItemStatus::Requested);
        layout
            .store
            .edit(|t| {
                if let Some(c) = t.non_trays.get_mut(&ContainerId(20)) {
                    c.status = ItemStatus::Requested;
                }
            })
            .unwrap();
        let job = layout.job(JobDetails::Withdraw);

        let intake = add_withdraw_barcodes(&layout.store, job, &values(&["I30", "I31", "N20", "X404"])).unwrap();
        assert_eq!(intake.errored_barcodes, values(&["I31", "N20", "X404"]));
        assert_eq!(intake.added.items, vec![ItemId(30)]);
        assert!(intake.added.containers.is_empty());
    }

    #[test]
    fn test_withdraw_intake_refuses_members_of_other_jobs() {
        let layout = LayoutBuilder::new().build();
        layout.item(30, None);
        layout.item(31, None);
        let first = layout.job(JobDetails::Withdraw);
        let cancelled = layout.job(JobDetails::Withdraw);
        add_withdraw_barcodes(&layout.store, first, &values(&["I30"])).unwrap();
        add_withdraw_barcodes(&layout.store, cancelled, &values(&["I31"])).unwrap();
        layout
            .store
            .edit(|t| {
                if let Some(j) = t.jobs.get_mut(&(JobKind::Withdraw, cancelled)) {
                    j.status = JobStatus::Cancelled;
                }
            })
            .unwrap();

        let second = layout.job(JobDetails::Withdraw);
        let intake = add_withdraw_barcodes(&layout.store, second, &values(&["I30", "I31"])).unwrap();
        assert_eq!(intake.errored_barcodes, values(&["I30"]));
        assert_eq!(intake.added.items, vec![ItemId(31)]);

        set_item_status(&layout.store, 31, ItemStatus::Withdrawn);
        let third = layout.job(JobDetails::Withdraw);
        let intake = add_withdraw_barcodes(&layout.store, third, &values(&["I31"])).unwrap();
        assert_eq!(intake.errored_barcodes, values(&["I31"]));
    }

    #[test]
    fn test_withdraw_intake_expands_trays() {
        let layout = LayoutBuilder::new().build();
        layout.tray(10, 1, 5);
        layout.item(30, Some(10));
        layout.item(31, Some(10));
        set_item_status(&layout.store, 31, ItemStatus::Requested);
        let job = layout.job(JobDetails::Withdraw);

        let intake = add_withdraw_barcodes(&layout.store, job, &values(&["T10"])).unwrap();
        assert_eq!(intake.errored_barcodes, values(&["T10"]));
        assert_eq!(intake.added.containers, vec![ContainerRef::tray(10)]);
        assert_eq!(intake.added.items, vec![ItemId(30)]);
    }

    #[test]
    fn test_withdraw_intake_is_idempotent() {
        let layout = LayoutBuilder::new().build();
        layout.tray(10, 1, 5);
        layout.item(30, Some(10));
        layout.item(32, None);
        let job = layout.job(JobDetails::Withdraw);

        add_withdraw_barcodes(&layout.store, job, &values(&["T10", "I32"])).unwrap();
        let again = add_withdraw_barcodes(&layout.store, job, &values(&["T10", "I32", "I30"])).unwrap();
        assert!(again.errored_barcodes.is_empty());
        assert!(again.added.is_empty());

        let session = layout.store.begin().unwrap();
        let members = session.job_members(JobKind::Withdraw, job).unwrap();
        assert_eq!(members.containers, vec![ContainerRef::tray(10)]);
        assert_eq!(members.items, vec![ItemId(30), ItemId(32)]);
        session.rollback().unwrap();
    }
}
