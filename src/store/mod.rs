//! Persistence seam
//!
//! The core operations only ever talk to an [`InventoryStore`]. A
//! [`Database`] hands out [`UnitOfWork`] sessions, each one a single
//! transaction: everything written through a session becomes visible together
//! on `commit`, or not at all.
//!
//! Two implementations ship with the crate:
//! - [`postgres::PgDatabase`] over a [`crate::pool::ConnectionPool`]
//! - [`memory::MemoryStore`], an in-process store with the same semantics

pub mod memory;
pub mod postgres;

use crate::allocator::{CandidatePosition, ScopeFilter};
use crate::error::InventoryError;
use crate::executor::StoreError;
use crate::model::*;

/// Members of a job (or of the refile queue) in stable order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMembers {
    /// Trays first, then non-tray items, each ascending by id
    pub containers: Vec<ContainerRef>,
    /// Ascending by id
    pub items: Vec<ItemId>,
}

impl JobMembers {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.items.is_empty()
    }

    /// Container ids of one kind, in member order
    #[must_use]
    pub fn of_kind(&self, kind: ContainerKind) -> Vec<ContainerId> {
        self.containers
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.id)
            .collect()
    }
}

/// Every read and write the inventory core performs
///
/// Reads take `&self`, writes `&mut self`. `save_*` methods insert or replace
/// the whole row.
pub trait InventoryStore {
    fn building(&self, id: BuildingId) -> Result<Option<Building>, StoreError>;
    fn module(&self, id: ModuleId) -> Result<Option<Module>, StoreError>;
    fn aisle(&self, id: AisleId) -> Result<Option<Aisle>, StoreError>;
    fn side(&self, id: SideId) -> Result<Option<Side>, StoreError>;
    fn ladder(&self, id: LadderId) -> Result<Option<Ladder>, StoreError>;
    fn shelf(&self, id: ShelfId) -> Result<Option<Shelf>, StoreError>;
    fn shelf_by_barcode(&self, value: &str) -> Result<Option<Shelf>, StoreError>;
    fn shelf_type(&self, id: ShelfTypeId) -> Result<Option<ShelfType>, StoreError>;
    fn shelf_position(&self, id: ShelfPositionId) -> Result<Option<ShelfPosition>, StoreError>;
    /// Position with ordinal `number` on `shelf`
    fn position_on_shelf(&self, shelf: ShelfId, number: i32) -> Result<Option<ShelfPosition>, StoreError>;

    /// Positions of `shelf` referenced by at least one container
    fn occupied_count(&self, shelf: ShelfId) -> Result<u32, StoreError>;
    /// Containers whose actual position is `position`
    fn occupants(&self, position: ShelfPositionId) -> Result<Vec<ContainerRef>, StoreError>;
    /// Positions referenced by more than one container, ascending by position id
    fn shared_positions(&self) -> Result<Vec<(ShelfPositionId, Vec<ContainerRef>)>, StoreError>;
    /// Unoccupied positions inside `scope`, in walk order
    ///
    /// Ordered by the shelf's `(aisle, ladder, shelf)` sort key, then position
    /// number, then position id.
    fn empty_positions(&self, scope: &ScopeFilter) -> Result<Vec<CandidatePosition>, StoreError>;
    /// Hold the given positions until the session ends
    fn lock_positions(&mut self, positions: &[ShelfPositionId]) -> Result<(), StoreError>;

    fn container(&self, container: ContainerRef) -> Result<Option<Container>, StoreError>;
    fn container_by_barcode(&self, kind: ContainerKind, value: &str) -> Result<Option<Container>, StoreError>;
    fn save_container(&mut self, container: &Container) -> Result<(), StoreError>;
    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;
    fn item_by_barcode(&self, value: &str) -> Result<Option<Item>, StoreError>;
    /// Items inside `tray`, ascending by id
    fn tray_items(&self, tray: ContainerId) -> Result<Vec<ItemId>, StoreError>;
    fn save_item(&mut self, item: &Item) -> Result<(), StoreError>;

    fn barcode(&self, id: BarcodeId) -> Result<Option<Barcode>, StoreError>;
    fn barcode_type(&self, id: BarcodeTypeId) -> Result<Option<BarcodeType>, StoreError>;
    fn save_barcode(&mut self, barcode: &Barcode) -> Result<(), StoreError>;

    fn job(&self, kind: JobKind, id: JobId) -> Result<Option<Job>, StoreError>;
    fn insert_job(&mut self, draft: JobDraft) -> Result<Job, StoreError>;
    fn save_job(&mut self, job: &Job) -> Result<(), StoreError>;
    fn verification_job_for_accession(&self, accession_job_id: JobId) -> Result<Option<Job>, StoreError>;
    /// Containers and items belonging to a job
    ///
    /// Accession, verification and shelving jobs own rows through the
    /// matching `*_job_id` column; refile, withdraw and pick list jobs through
    /// association rows added with [`InventoryStore::add_job_member`].
    fn job_members(&self, kind: JobKind, id: JobId) -> Result<JobMembers, StoreError>;
    fn add_job_member(&mut self, kind: JobKind, id: JobId, member: JobMember) -> Result<(), StoreError>;
    /// Refile, withdraw or pick list jobs holding `member`, ascending by id
    fn jobs_with_member(&self, kind: JobKind, member: JobMember) -> Result<Vec<JobId>, StoreError>;
    /// Items and non-tray items flagged `scanned_for_refile_queue`
    fn refile_queue(&self) -> Result<JobMembers, StoreError>;

    fn record_discrepancy(&mut self, discrepancy: NewDiscrepancy) -> Result<ShelvingDiscrepancy, StoreError>;
    fn discrepancies(&self, shelving_job_id: JobId) -> Result<Vec<ShelvingDiscrepancy>, StoreError>;
}

/// One association row for refile, withdraw and pick list jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMember {
    Container(ContainerRef),
    Item(ItemId),
}

/// A store session bound to one transaction
pub trait UnitOfWork: InventoryStore {
    /// Make every write of this session durable and visible
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the commit fails; nothing is written in that case.
    fn commit(self) -> Result<(), StoreError>;

    /// Discard every write of this session
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend reports a failure while discarding.
    fn rollback(self) -> Result<(), StoreError>;
}

/// Something that can open [`UnitOfWork`] sessions
pub trait Database {
    type Session<'a>: UnitOfWork
    where
        Self: 'a;

    /// Start a new session
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if no connection is available or the transaction cannot start.
    fn begin(&self) -> Result<Self::Session<'_>, StoreError>;
}

/// Run `f` in a fresh session: commit on `Ok`, roll back on `Err`
///
/// # Errors
///
/// Returns the error from `f`, or the storage error from begin/commit.
pub fn with_transaction<'db, D, T, F>(db: &'db D, f: F) -> Result<T, InventoryError>
where
    D: Database,
    F: FnOnce(&mut D::Session<'db>) -> Result<T, InventoryError>,
{
    let mut session = db.begin()?;
    match f(&mut session) {
        Ok(value) => {
            session.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.rollback() {
                log::warn!("rollback after failed unit of work also failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

/// Re-run `f` while it fails with [`InventoryError::Conflict`], at most `max_retries` extra times
///
/// `f` must be a whole unit of work (typically a [`with_transaction`] call),
/// so every attempt starts from freshly read state.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first non-conflict error.
pub fn retry_on_conflict<T, F>(max_retries: u32, mut f: F) -> Result<T, InventoryError>
where
    F: FnMut() -> Result<T, InventoryError>,
{
    let mut retries = 0;
    loop {
        match f() {
            Err(err) if err.is_conflict() && retries < max_retries => {
                retries += 1;
                #[cfg(feature = "metrics")]
                crate::metrics::METRICS.record_placement_conflict();
                log::warn!("retrying unit of work after conflict ({retries}/{max_retries}): {err}");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_retry_on_conflict_stops_after_budget() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(2, || {
            calls += 1;
            Err(InventoryError::Conflict("position taken".into()))
        });
        assert!(matches!(result, Err(InventoryError::Conflict(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_on_conflict_passes_other_errors_through() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_conflict(5, || {
            calls += 1;
            Err(InventoryError::NotFound("shelf".into()))
        });
        assert!(matches!(result, Err(InventoryError::NotFound(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_on_conflict_returns_first_success() {
        let mut calls = 0;
        let result = retry_on_conflict(3, || {
            calls += 1;
            if calls < 2 {
                Err(InventoryError::Conflict("position taken".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn test_with_transaction_discards_writes_on_error() {
        let store = MemoryStore::new();
        let tray = Container::new(ContainerKind::Tray, ContainerId(1));

        let result: Result<(), _> = with_transaction(&store, |session| {
            session.save_container(&tray)?;
            Err(InventoryError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let found = with_transaction(&store, |session| Ok(session.container(tray.reference())?)).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_with_transaction_commits_on_success() {
        let store = MemoryStore::new();
        let tray = Container::new(ContainerKind::Tray, ContainerId(1));

        with_transaction(&store, |session| Ok(session.save_container(&tray)?)).unwrap();

        let found = with_transaction(&store, |session| Ok(session.container(tray.reference())?)).unwrap();
        assert_eq!(found, Some(tray));
    }
}
