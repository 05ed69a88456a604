//! Completion cascades
//!
//! Work triggered by completing an accession or verification job runs on a
//! background coroutine after the triggering update has committed. Each task
//! opens its own unit of work and may be delivered more than once, so every
//! task is idempotent. Failures are logged and counted; the caller that
//! completed the job never sees them.

use crate::config::CascadeConfig;
use crate::error::InventoryError;
use crate::model::*;
use crate::store::{with_transaction, Database, InventoryStore};
use chrono::{DateTime, Utc};
use may::coroutine::JoinHandle;
use may::sync::mpsc::{channel, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeTask {
    /// Create or reuse the verification job for this accession job and attach its members
    AccessionCompleted(JobId),
    /// Give the verification job's members the job's owner
    VerificationCompleted(JobId),
}

impl CascadeTask {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CascadeTask::AccessionCompleted(_) => "accession_completed",
            CascadeTask::VerificationCompleted(_) => "verification_completed",
        }
    }

    #[must_use]
    pub fn job_id(self) -> JobId {
        match self {
            CascadeTask::AccessionCompleted(id) | CascadeTask::VerificationCompleted(id) => id,
        }
    }
}

/// Create the verification job for a completed accession job, once
///
/// The verification job copies trayed, owner, size class and user from the
/// accession job. Every tray, non-tray item and item of the accession job is
/// attached to it and takes the accession owner. Returns the verification job id.
///
/// # Errors
///
/// `NotFound` if the accession job does not exist; storage failures.
pub fn accession_completed<S>(session: &mut S, accession_id: JobId, now: DateTime<Utc>) -> Result<JobId, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let accession = session
        .job(JobKind::Accession, accession_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Accession Job ID {accession_id} Not Found")))?;
    let JobDetails::Accession {
        trayed,
        owner_id,
        size_class_id,
    } = accession.details
    else {
        return Err(InventoryError::Internal(format!("{accession_id} is not an accession job")));
    };

    let verification_id = match session.verification_job_for_accession(accession_id)? {
        Some(existing) => existing.id,
        None => {
            let mut draft = JobDraft::new(
                JobDetails::Verification {
                    accession_job_id: Some(accession_id),
                    shelving_job_id: None,
                    trayed,
                    owner_id,
                    size_class_id,
                },
                accession.user_id,
                now,
            );
            draft.created_by_id = accession.created_by_id;
            let created = session.insert_job(draft)?;
            log::info!("created verification job {} for accession job {accession_id}", created.id);
            created.id
        }
    };

    let members = session.job_members(JobKind::Accession, accession_id)?;
    for reference in &members.containers {
        if let Some(mut container) = session.container(*reference)? {
            container.verification_job_id = Some(verification_id);
            if owner_id.is_some() {
                container.owner_id = owner_id;
            }
            session.save_container(&container)?;
        }
    }
    for id in &members.items {
        if let Some(mut item) = session.item(*id)? {
            item.verification_job_id = Some(verification_id);
            if owner_id.is_some() {
                item.owner_id = owner_id;
            }
            session.save_item(&item)?;
        }
    }

    Ok(verification_id)
}

/// Propagate a completed verification job's owner to its members
///
/// # Errors
///
/// `NotFound` if the verification job does not exist; storage failures.
pub fn verification_completed<S>(session: &mut S, verification_id: JobId) -> Result<usize, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let job = session
        .job(JobKind::Verification, verification_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Verification Job ID {verification_id} Not Found")))?;
    let Some(owner_id) = job.owner_id() else {
        return Ok(0);
    };

    let members = session.job_members(JobKind::Verification, verification_id)?;
    let mut updated = 0;
    for reference in &members.containers {
        if let Some(mut container) = session.container(*reference)? {
            if container.owner_id != Some(owner_id) {
                container.owner_id = Some(owner_id);
                session.save_container(&container)?;
                updated += 1;
            }
        }
    }
    for id in &members.items {
        if let Some(mut item) = session.item(*id)? {
            if item.owner_id != Some(owner_id) {
                item.owner_id = Some(owner_id);
                session.save_item(&item)?;
                updated += 1;
            }
        }
    }
    Ok(updated)
}

/// Run one task in its own unit of work
///
/// # Errors
///
/// The task's error; the unit of work is rolled back.
pub fn run_task<D>(db: &D, task: CascadeTask) -> Result<(), InventoryError>
where
    D: Database,
{
    #[cfg(feature = "tracing")]
    let _span = crate::metrics::tracing_helpers::cascade_span(task.name(), task.job_id().get()).entered();

    with_transaction(db, |session| match task {
        CascadeTask::AccessionCompleted(id) => accession_completed(session, id, Utc::now()).map(|_| ()),
        CascadeTask::VerificationCompleted(id) => verification_completed(session, id).map(|_| ()),
    })
}

/// Run a task up to `max_attempts` times; returns whether it eventually succeeded
pub fn run_with_retries<D>(db: &D, task: CascadeTask, max_attempts: u32) -> bool
where
    D: Database,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        match run_task(db, task) {
            Ok(()) => {
                log::debug!("{} for job {} done", task.name(), task.job_id());
                return true;
            }
            Err(err) => {
                log::warn!(
                    "{} for job {} failed (attempt {attempt}/{attempts}): {err}",
                    task.name(),
                    task.job_id()
                );
            }
        }
    }

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_cascade_failure(task.name());
    log::error!("{} for job {} abandoned after {attempts} attempt(s)", task.name(), task.job_id());
    false
}

/// Background runner for [`CascadeTask`]s
///
/// Tasks are consumed in order by a single `may` coroutine.
pub struct CascadeDispatcher {
    sender: Option<Sender<CascadeTask>>,
    worker: Option<JoinHandle<()>>,
}

impl CascadeDispatcher {
    /// Spawn the worker coroutine over `db`
    pub fn start<D>(db: D, config: &CascadeConfig) -> Self
    where
        D: Database + Send + 'static,
    {
        let (sender, receiver) = channel::<CascadeTask>();
        let max_attempts = config.max_attempts;
        let worker = may::go!(move || {
            while let Ok(task) = receiver.recv() {
                run_with_retries(&db, task, max_attempts);
            }
            log::debug!("cascade worker stopped");
        });

        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Queue a task; never blocks and never fails the caller
    pub fn enqueue(&self, task: CascadeTask) {
        let Some(sender) = &self.sender else {
            log::error!("cascade dispatcher already shut down, dropping {task:?}");
            return;
        };
        if let Err(err) = sender.send(task) {
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.record_cascade_failure(task.name());
            log::error!("cascade worker is gone, dropping {:?}", err.0);
        }
    }

    /// Stop accepting tasks, let the worker drain the queue, and wait for it
    pub fn shutdown(mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("cascade worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CascadeConfig;
    use crate::jobs::update_job;
    use crate::transition::JobUpdate;
    use crate::test_helpers::LayoutBuilder;

    fn accession(layout: &crate::test_helpers::Layout) -> JobId {
        layout.job(JobDetails::Accession {
            trayed: true,
            owner_id: Some(OwnerId(3)),
            size_class_id: Some(SizeClassId(5)),
        })
    }

    #[test]
    fn test_accession_cascade_is_idempotent() {
        let layout = LayoutBuilder::new().build();
        let job = accession(&layout);
        layout.tray(10, 1, 5);
        layout.item(30, Some(10));
        layout
            .store
            .edit(|t| {
                if let Some(tray) = t.trays.get_mut(&ContainerId(10)) {
                    tray.accession_job_id = Some(job);
                }
                if let Some(item) = t.items.get_mut(&ItemId(30)) {
                    item.accession_job_id = Some(job);
                }
            })
            .unwrap();

        run_task(&layout.store, CascadeTask::AccessionCompleted(job)).unwrap();
        run_task(&layout.store, CascadeTask::AccessionCompleted(job)).unwrap();

        let tables = layout.store.snapshot().unwrap();
        let verifications: Vec<_> = tables
            .jobs
            .values()
            .filter(|j| j.kind() == JobKind::Verification)
            .collect();
        assert_eq!(verifications.len(), 1);
        let verification = verifications[0];
        assert_eq!(verification.status, JobStatus::Created);
        assert_eq!(verification.owner_id(), Some(OwnerId(3)));

        let tray = &tables.trays[&ContainerId(10)];
        assert_eq!(tray.verification_job_id, Some(verification.id));
        assert_eq!(tray.owner_id, Some(OwnerId(3)));
        assert_eq!(tables.items[&ItemId(30)].verification_job_id, Some(verification.id));
    }

    #[test]
    fn test_verification_cascade_sets_owner() {
        let layout = LayoutBuilder::new().build();
        let verification = layout.verification_job(false, 4, 5);
        layout.non_tray(20, 1, 5);
        layout.attach_to_verification(verification, &[ContainerRef::non_tray(20)]);

        run_task(&layout.store, CascadeTask::VerificationCompleted(verification)).unwrap();
        let tables = layout.store.snapshot().unwrap();
        assert_eq!(tables.non_trays[&ContainerId(20)].owner_id, Some(OwnerId(4)));
    }

    #[test]
    fn test_missing_job_fails_without_panicking() {
        let layout = LayoutBuilder::new().build();
        assert!(!run_with_retries(&layout.store, CascadeTask::VerificationCompleted(JobId(77)), 2));
    }

    #[test]
    fn test_dispatcher_runs_after_commit_and_drains_on_shutdown() {
        let layout = LayoutBuilder::new().build();
        let job = accession(&layout);

        let dispatcher = CascadeDispatcher::start(layout.store.clone(), &CascadeConfig::default());
        update_job(
            &layout.store,
            JobKind::Accession,
            job,
            &JobUpdate::status(JobStatus::Completed, Utc::now()),
            Some(&dispatcher),
        )
        .unwrap();
        dispatcher.shutdown();

        let tables = layout.store.snapshot().unwrap();
        assert!(tables
            .jobs
            .values()
            .any(|j| matches!(j.details, JobDetails::Verification { accession_job_id: Some(a), .. } if a == job)));
    }
}
