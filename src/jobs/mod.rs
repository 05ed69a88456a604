//! Job flows that span several components
//!
//! Shelving-job creation runs job insert and every allocation in one unit of
//! work, so a failed allocation leaves no job behind. Job updates apply the
//! transition tracker, complete withdraw jobs in place, and hand accession
//! and verification completions to the [`cascade::CascadeDispatcher`] once the
//! update has committed.

pub mod cascade;
pub mod intake;

pub use intake::{add_to_refile_job, add_to_withdraw_job, add_withdraw_barcodes, create_refile_job, WithdrawIntake};

use crate::allocator::{allocate, AllocationRequest, LocationScope};
use crate::config::AllocationConfig;
use crate::error::InventoryError;
use crate::model::*;
use crate::store::{retry_on_conflict, with_transaction, Database, InventoryStore};
use crate::transition::{apply_transition, JobUpdate};
use cascade::{CascadeDispatcher, CascadeTask};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Input for [`create_shelving_job`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShelvingJobRequest {
    pub origin: ShelvingOrigin,
    pub building_id: BuildingId,
    pub user_id: Option<UserId>,
    /// Required and non-empty for `Verification` origin; ignored for `Direct`
    #[serde(default)]
    pub verification_jobs: Vec<JobId>,
    pub module_id: Option<ModuleId>,
    pub aisle_id: Option<AisleId>,
    pub side_id: Option<SideId>,
    pub ladder_id: Option<LadderId>,
}

impl ShelvingJobRequest {
    fn scope(&self) -> LocationScope {
        LocationScope {
            building_id: Some(self.building_id),
            module_id: self.module_id,
            aisle_id: self.aisle_id,
            side_id: self.side_id,
            ladder_id: self.ladder_id,
        }
    }
}

fn checked_verification_job<S>(session: &S, id: JobId) -> Result<Job, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let job = session
        .job(JobKind::Verification, id)?
        .ok_or_else(|| InventoryError::NotFound(format!("verification_job_id {id} not found.")))?;
    if job.status != JobStatus::Completed {
        return Err(InventoryError::Validation(format!(
            "verification_job_id {id} 's job status must be 'Completed'."
        )));
    }
    if let JobDetails::Verification {
        shelving_job_id: Some(shelved_by),
        ..
    } = job.details
    {
        return Err(InventoryError::Validation(format!(
            "verification_job_id {id} has already been shelved during shelving job {shelved_by}"
        )));
    }
    Ok(job)
}

/// Insert a shelving job and place every container of its verification jobs, inside an open session
///
/// Verification jobs are processed in the order given: trays first, then
/// non-tray items, then the verification job is linked to the new shelving job.
///
/// # Errors
///
/// - `Validation` for a `Verification` origin without jobs, a job that is not
///   `Completed`, or a job already linked to a shelving job
/// - `NotFound` for an unknown verification job or an allocation shortfall
pub fn create_shelving_job_in<S>(
    session: &mut S,
    request: &ShelvingJobRequest,
    allocation: &AllocationConfig,
    now: DateTime<Utc>,
) -> Result<Job, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if request.origin == ShelvingOrigin::Verification && request.verification_jobs.is_empty() {
        return Err(InventoryError::Validation(
            "verification_jobs are required when origin is 'Verification'.".to_string(),
        ));
    }

    let shelving = session.insert_job(JobDraft::new(
        JobDetails::Shelving {
            origin: request.origin,
            building_id: Some(request.building_id),
        },
        request.user_id,
        now,
    ))?;

    if request.origin == ShelvingOrigin::Direct {
        return Ok(shelving);
    }

    for verification_id in &request.verification_jobs {
        let mut verification = checked_verification_job(&*session, *verification_id)?;
        let members = session.job_members(JobKind::Verification, *verification_id)?;

        for kind in [ContainerKind::Tray, ContainerKind::NonTray] {
            let containers = members.of_kind(kind);
            if containers.is_empty() {
                continue;
            }
            allocate(
                session,
                &AllocationRequest {
                    kind,
                    containers,
                    shelving_job_id: shelving.id,
                    scope: request.scope(),
                    mode: allocation.building_scope,
                },
            )?;
        }

        if let JobDetails::Verification { shelving_job_id, .. } = &mut verification.details {
            *shelving_job_id = Some(shelving.id);
        }
        verification.update_dt = now;
        session.save_job(&verification)?;
    }

    log::info!(
        "created shelving job {} from {} verification job(s)",
        shelving.id,
        request.verification_jobs.len()
    );
    Ok(shelving)
}

/// Create a shelving job as one unit of work, retried as a whole on conflict
///
/// # Errors
///
/// As [`create_shelving_job_in`]; nothing is stored when it fails.
pub fn create_shelving_job<D>(db: &D, request: &ShelvingJobRequest, allocation: &AllocationConfig) -> Result<Job, InventoryError>
where
    D: Database,
{
    retry_on_conflict(allocation.max_conflict_retries, || {
        with_transaction(db, |session| create_shelving_job_in(session, request, allocation, Utc::now()))
    })
}

/// Withdraw every member of a withdraw job
///
/// Members become `Withdrawn` at `now`; live barcodes move to
/// `withdrawn_barcode_id` and are flagged withdrawn; containers leave their
/// shelf position.
///
/// # Errors
///
/// Propagates storage failures.
pub fn complete_withdraw<S>(session: &mut S, job_id: JobId, now: DateTime<Utc>) -> Result<usize, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let members = session.job_members(JobKind::Withdraw, job_id)?;
    let mut withdrawn = 0;

    for reference in &members.containers {
        let Some(mut container) = session.container(*reference)? else {
            log::warn!("withdraw job {job_id} references missing {reference}");
            continue;
        };
        container.status = ItemStatus::Withdrawn;
        container.withdrawal_dt = Some(now);
        container.shelf_position_id = None;
        if let Some(barcode) = container.barcode_id.take() {
            retire_barcode(session, barcode)?;
            container.withdrawn_barcode_id = Some(barcode);
        }
        session.save_container(&container)?;
        withdrawn += 1;
    }

    for id in &members.items {
        let Some(mut item) = session.item(*id)? else {
            log::warn!("withdraw job {job_id} references missing item {id}");
            continue;
        };
        item.status = ItemStatus::Withdrawn;
        item.withdrawal_dt = Some(now);
        if let Some(barcode) = item.barcode_id.take() {
            retire_barcode(session, barcode)?;
            item.withdrawn_barcode_id = Some(barcode);
        }
        session.save_item(&item)?;
        withdrawn += 1;
    }

    log::info!("withdraw job {job_id} completed: {withdrawn} member(s) withdrawn");
    Ok(withdrawn)
}

fn retire_barcode<S>(session: &mut S, id: BarcodeId) -> Result<(), InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if let Some(mut barcode) = session.barcode(id)? {
        barcode.withdrawn = true;
        session.save_barcode(&barcode)?;
    }
    Ok(())
}

/// Apply a status update to a job inside an open session
///
/// Returns the saved job and, when the update completed an accession or
/// verification job, the cascade to run after commit.
///
/// # Errors
///
/// - `NotFound` for an unknown job
/// - `Validation` for a status outside the job type's vocabulary or a change
///   to a job that is already `Completed` or `Cancelled`
///
/// Re-sending the status of a closed job is accepted but adds no run time.
pub fn update_job_in<S>(
    session: &mut S,
    kind: JobKind,
    id: JobId,
    update: &JobUpdate,
    now: DateTime<Utc>,
) -> Result<(Job, Option<CascadeTask>), InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let mut job = session
        .job(kind, id)?
        .ok_or_else(|| InventoryError::NotFound(format!("{kind} ID {id} Not Found")))?;
    let previous = job.status;

    if let Some(status) = update.status {
        if !kind.allows(status) {
            return Err(InventoryError::Validation(format!("{status} is not a valid status for a {kind}")));
        }
        if previous.is_terminal() && status != previous {
            return Err(InventoryError::Validation(format!(
                "{kind} ID {id} is already {previous} and cannot change status"
            )));
        }
    }

    // A closed job keeps its run time
    if previous.is_terminal() {
        log::debug!("{kind} {id} is already {previous}, run time left at {}", job.run_time);
    } else {
        apply_transition(&mut job, update);
    }
    if let Some(status) = update.status {
        job.status = status;
    }
    if let Some(user_id) = update.user_id {
        job.user_id = Some(user_id);
    }
    job.update_dt = now;

    let completed = job.status == JobStatus::Completed && previous != JobStatus::Completed;
    if completed && kind == JobKind::Withdraw {
        complete_withdraw(session, id, now)?;
    }
    session.save_job(&job)?;

    let cascade = match (completed, kind) {
        (true, JobKind::Accession) => Some(CascadeTask::AccessionCompleted(id)),
        (true, JobKind::Verification) => Some(CascadeTask::VerificationCompleted(id)),
        _ => None,
    };
    Ok((job, cascade))
}

/// Update a job as one unit of work, then queue any completion cascade
///
/// A cascade is only queued after the update committed. Without a dispatcher
/// the cascade is skipped with a warning.
///
/// # Errors
///
/// As [`update_job_in`]. Cascade failures are never returned.
pub fn update_job<D>(
    db: &D,
    kind: JobKind,
    id: JobId,
    update: &JobUpdate,
    cascades: Option<&CascadeDispatcher>,
) -> Result<Job, InventoryError>
where
    D: Database,
{
    let (job, cascade) = with_transaction(db, |session| update_job_in(session, kind, id, update, Utc::now()))?;

    if let Some(task) = cascade {
        match cascades {
            Some(dispatcher) => dispatcher.enqueue(task),
            None => log::warn!("no cascade dispatcher configured, skipping {task:?}"),
        }
    }
    Ok(job)
}
