//! Container reassignment
//!
//! Moves one container to a specific position, for one-off corrections and for
//! the direct-to-shelf workflow. Every check runs before anything is written;
//! the only write a rejected move leaves behind is the shelving discrepancy
//! describing why it was rejected.

use crate::capacity::{ensure_room, shelf_capacity, CapacityDelta};
use crate::error::InventoryError;
use crate::location::position_address;
use crate::model::*;
use crate::store::{retry_on_conflict, with_transaction, Database, InventoryStore};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A request to put one container on a given shelf position
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReassignRequest {
    pub shelving_job_id: JobId,
    /// Required with `container_id`; `true` for trays
    pub trayed: Option<bool>,
    pub container_id: Option<ContainerId>,
    pub container_barcode_value: Option<String>,
    pub shelf_id: Option<ShelfId>,
    pub shelf_barcode_value: Option<String>,
    pub shelf_position_number: i32,
    pub scanned_for_shelving: Option<bool>,
    pub shelved_dt: Option<DateTime<Utc>>,
}

impl ReassignRequest {
    /// A request naming only the job and the position number; set the container and shelf fields after
    #[must_use]
    pub fn new(shelving_job_id: JobId, shelf_position_number: i32) -> Self {
        Self {
            shelving_job_id,
            trayed: None,
            container_id: None,
            container_barcode_value: None,
            shelf_id: None,
            shelf_barcode_value: None,
            shelf_position_number,
            scanned_for_shelving: None,
            shelved_dt: None,
        }
    }
}

/// Result of a reassignment that passed input validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassignOutcome {
    Moved(Container),
    /// Owner or size class did not match; the discrepancy was recorded and nothing moved
    Rejected {
        discrepancy: ShelvingDiscrepancy,
        detail: String,
    },
}

fn resolve_container<S>(store: &S, request: &ReassignRequest) -> Result<Container, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if let Some(id) = request.container_id {
        let trayed = request.trayed.ok_or_else(|| {
            InventoryError::Validation("If container_id is provided, 'trayed' value is also expected.".to_string())
        })?;
        let reference = ContainerRef {
            kind: ContainerKind::from_trayed(trayed),
            id,
        };
        return store
            .container(reference)?
            .ok_or_else(|| InventoryError::NotFound(format!("{} ID {} Not Found", reference.kind, id)));
    }

    let value = request.container_barcode_value.as_deref().ok_or_else(|| {
        InventoryError::Validation("If container_id is not provided, 'container_barcode_value' is expected.".to_string())
    })?;
    let kinds: Vec<ContainerKind> = match request.trayed {
        Some(trayed) => vec![ContainerKind::from_trayed(trayed)],
        None => vec![ContainerKind::Tray, ContainerKind::NonTray],
    };
    for kind in kinds {
        if let Some(container) = store.container_by_barcode(kind, value)? {
            return Ok(container);
        }
    }
    Err(InventoryError::NotFound(format!("No containers were found with barcode {value}")))
}

fn resolve_shelf<S>(store: &S, request: &ReassignRequest) -> Result<Shelf, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    if let Some(id) = request.shelf_id {
        return store
            .shelf(id)?
            .ok_or_else(|| InventoryError::NotFound(format!("Shelf ID {id} Not Found")));
    }
    if let Some(value) = request.shelf_barcode_value.as_deref() {
        return store
            .shelf_by_barcode(value)?
            .ok_or_else(|| InventoryError::NotFound(format!("No shelves were found with barcode {value}")));
    }
    Err(InventoryError::Validation(
        "Either shelf_id or shelf_barcode_value must be provided.".to_string(),
    ))
}

fn container_label<S>(store: &S, container: &Container) -> Result<String, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let value = match container.barcode_id {
        Some(id) => store.barcode(id)?.map(|b| b.value),
        None => None,
    };
    Ok(value.unwrap_or_else(|| container.reference().to_string()))
}

fn human_address<S>(store: &S, position: Option<ShelfPositionId>) -> Result<Option<String>, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    position
        .map(|p| position_address(store, p).map(|a| a.human))
        .transpose()
}

/// Mark the container's verification job as shelved once every other container of it is
fn link_verification_job<S>(session: &mut S, container: &Container, shelving_job_id: JobId) -> Result<(), InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let Some(verification_id) = container.verification_job_id else {
        return Ok(());
    };
    let Some(mut job) = session.job(JobKind::Verification, verification_id)? else {
        return Ok(());
    };
    let JobDetails::Verification {
        shelving_job_id: ref mut linked,
        ..
    } = job.details
    else {
        return Ok(());
    };
    if linked.is_some() {
        return Ok(());
    }

    let members = session.job_members(JobKind::Verification, verification_id)?;
    for sibling in members.containers.iter().filter(|c| **c != container.reference()) {
        let shelved = session
            .container(*sibling)?
            .is_some_and(|c| c.shelving_job_id.is_some());
        if !shelved {
            return Ok(());
        }
    }

    *linked = Some(shelving_job_id);
    job.update_dt = Utc::now();
    session.save_job(&job)?;
    log::info!("verification job {verification_id} fully shelved by shelving job {shelving_job_id}");
    Ok(())
}

/// Move one container inside an open session
///
/// Check order: container, shelving job, shelf, position, capacity,
/// occupancy, owner and size class. An owner or size class mismatch records a
/// discrepancy and returns [`ReassignOutcome::Rejected`]; the caller decides
/// whether to keep that record. Moving to a position other than the proposed
/// one succeeds but records a location discrepancy.
///
/// # Errors
///
/// - `Validation` for missing input, a full shelf or an occupied position
/// - `NotFound` for an unknown container, shelving job, shelf or position
/// - `Conflict` if the position was taken concurrently
pub fn reassign<S>(session: &mut S, request: &ReassignRequest) -> Result<ReassignOutcome, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    #[cfg(feature = "tracing")]
    let _span = crate::metrics::tracing_helpers::reassign_span().entered();

    let mut container = resolve_container(&*session, request)?;
    let shelving_job = session
        .job(JobKind::Shelving, request.shelving_job_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Shelving Job ID {} Not Found", request.shelving_job_id)))?;
    let shelf = resolve_shelf(&*session, request)?;
    let position = session
        .position_on_shelf(shelf.id, request.shelf_position_number)?
        .ok_or_else(|| {
            InventoryError::NotFound(format!(
                "Shelf Position Number {} does not exist on shelf {}",
                request.shelf_position_number, shelf.id
            ))
        })?;

    session.lock_positions(&[position.id])?;

    let old_shelf = match container.shelf_position_id {
        Some(old) => session.shelf_position(old)?.map(|p| p.shelf_id),
        None => None,
    };
    let delta = CapacityDelta::for_move(old_shelf, shelf.id);
    // A move within one shelf frees the slot it takes, so a full shelf is not rejected
    if delta.occupied.is_some() {
        ensure_room(&shelf_capacity(&*session, shelf.id)?)?;
    }

    let others = session
        .occupants(position.id)?
        .into_iter()
        .any(|occupant| occupant != container.reference());
    if others {
        return Err(InventoryError::Validation(format!(
            "Shelf Position {} assigned.",
            request.shelf_position_number
        )));
    }

    let shelf_type = session
        .shelf_type(shelf.shelf_type_id)?
        .ok_or_else(|| InventoryError::NotFound(format!("Shelf Type ID {} Not Found", shelf.shelf_type_id)))?;
    let owner_mismatch = container.owner_id != Some(shelf.owner_id);
    let size_mismatch = container.size_class_id != Some(shelf_type.size_class_id);
    if owner_mismatch || size_mismatch {
        let (kind, error) = if owner_mismatch {
            (
                DiscrepancyKind::Owner,
                format!(
                    "Owner Discrepancy - Container owner_id: {} - Shelf owner_id: {}",
                    fmt_opt(container.owner_id),
                    shelf.owner_id
                ),
            )
        } else {
            (
                DiscrepancyKind::Size,
                format!(
                    "Size Discrepancy - Container size_id: {} - Shelf size_id: {}",
                    fmt_opt(container.size_class_id),
                    shelf_type.size_class_id
                ),
            )
        };
        let discrepancy = session.record_discrepancy(NewDiscrepancy {
            shelving_job_id: shelving_job.id,
            container: container.reference(),
            kind,
            user_id: shelving_job.user_id,
            owner_id: Some(shelf.owner_id),
            size_class_id: Some(shelf_type.size_class_id),
            assigned_location: human_address(&*session, Some(position.id))?,
            pre_assigned_location: human_address(&*session, container.shelf_position_proposed_id)?,
            error,
        })?;
        let detail = format!(
            "Container Barcode {} does not match Shelf owner and size class.",
            container_label(&*session, &container)?
        );
        log::info!("{detail} ({})", discrepancy.error);
        return Ok(ReassignOutcome::Rejected { discrepancy, detail });
    }

    link_verification_job(session, &container, shelving_job.id)?;

    container.shelving_job_id = Some(shelving_job.id);
    container.shelf_position_id = Some(position.id);
    if let Some(shelved_dt) = request.shelved_dt {
        container.shelved_dt = Some(shelved_dt);
    }
    if let Some(scanned) = request.scanned_for_shelving {
        container.scanned_for_shelving = scanned;
    }
    session.save_container(&container)?;

    if let Some(proposed) = container.shelf_position_proposed_id.filter(|p| *p != position.id) {
        let assigned = human_address(&*session, Some(position.id))?;
        let pre_assigned = human_address(&*session, Some(proposed))?;
        session.record_discrepancy(NewDiscrepancy {
            shelving_job_id: shelving_job.id,
            container: container.reference(),
            kind: DiscrepancyKind::Location,
            user_id: shelving_job.user_id,
            owner_id: Some(shelf.owner_id),
            size_class_id: Some(shelf_type.size_class_id),
            error: format!(
                "Location Discrepancy - Container shelved at {} - Proposed {}",
                assigned.as_deref().unwrap_or("unknown"),
                pre_assigned.as_deref().unwrap_or("unknown")
            ),
            assigned_location: assigned,
            pre_assigned_location: pre_assigned,
        })?;
    }

    log::debug!(
        "{} moved to shelf position {} (shelf {}) for shelving job {}",
        container.reference(),
        position.id,
        shelf.id,
        shelving_job.id
    );
    Ok(ReassignOutcome::Moved(container))
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// [`reassign`] as its own unit of work, retried on conflict
///
/// A rejected move still commits its discrepancy record, then fails with `Validation`.
///
/// # Errors
///
/// As [`reassign`]; a rejection becomes `Validation`.
pub fn reassign_container<D>(db: &D, request: &ReassignRequest, max_conflict_retries: u32) -> Result<Container, InventoryError>
where
    D: Database,
{
    let outcome = retry_on_conflict(max_conflict_retries, || with_transaction(db, |session| reassign(session, request)))?;
    match outcome {
        ReassignOutcome::Moved(container) => Ok(container),
        ReassignOutcome::Rejected { detail, .. } => Err(InventoryError::Validation(detail)),
    }
}
