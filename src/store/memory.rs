//! In-process store
//!
//! All rows live in one [`Tables`] value behind a coroutine-aware mutex. A
//! session holds the lock for its whole lifetime and works on a private copy,
//! which replaces the shared tables on commit. Sessions are therefore fully
//! serialized, which gives the same at-most-one-occupant guarantee the
//! PostgreSQL store gets from row locks.

use super::{Database, InventoryStore, JobMember, JobMembers, UnitOfWork};
use crate::allocator::{CandidatePosition, ScopeFilter};
use crate::executor::StoreError;
use crate::location::sort_key;
use crate::model::*;
use chrono::Utc;
use may::sync::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Every table of the in-process store
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub buildings: BTreeMap<BuildingId, Building>,
    pub modules: BTreeMap<ModuleId, Module>,
    pub aisles: BTreeMap<AisleId, Aisle>,
    pub sides: BTreeMap<SideId, Side>,
    pub ladders: BTreeMap<LadderId, Ladder>,
    pub shelf_types: BTreeMap<ShelfTypeId, ShelfType>,
    pub shelves: BTreeMap<ShelfId, Shelf>,
    pub positions: BTreeMap<ShelfPositionId, ShelfPosition>,
    pub trays: BTreeMap<ContainerId, Container>,
    pub non_trays: BTreeMap<ContainerId, Container>,
    pub items: BTreeMap<ItemId, Item>,
    pub barcode_types: BTreeMap<BarcodeTypeId, BarcodeType>,
    pub barcodes: BTreeMap<BarcodeId, Barcode>,
    pub jobs: BTreeMap<(JobKind, JobId), Job>,
    pub members: HashMap<(JobKind, JobId), Vec<JobMember>>,
    pub discrepancies: Vec<ShelvingDiscrepancy>,
    next_id: i64,
}

impl Tables {
    /// Hand out a fresh id, unique across every table
    pub fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Keep generated ids clear of an explicitly chosen one
    pub fn reserve_id(&mut self, id: i64) {
        self.next_id = self.next_id.max(id);
    }

    fn containers(&self, kind: ContainerKind) -> &BTreeMap<ContainerId, Container> {
        match kind {
            ContainerKind::Tray => &self.trays,
            ContainerKind::NonTray => &self.non_trays,
        }
    }

    fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.trays.values().chain(self.non_trays.values())
    }

    fn occupied_positions(&self) -> BTreeSet<ShelfPositionId> {
        self.all_containers().filter_map(|c| c.shelf_position_id).collect()
    }

    fn candidate(&self, position: &ShelfPosition, scope: &ScopeFilter) -> Option<CandidatePosition> {
        let shelf = self.shelves.get(&position.shelf_id)?;
        let shelf_type = self.shelf_types.get(&shelf.shelf_type_id)?;
        let ladder = self.ladders.get(&shelf.ladder_id)?;
        let side = self.sides.get(&ladder.side_id)?;
        let aisle = self.aisles.get(&side.aisle_id)?;

        let in_scope = match *scope {
            ScopeFilter::Ladder(id) => ladder.id == id,
            ScopeFilter::Side(id) => side.id == id,
            ScopeFilter::Aisle(id) => aisle.id == id,
            ScopeFilter::Module(id) => aisle.module_id == Some(id),
            ScopeFilter::BuildingModules(building) => aisle
                .module_id
                .and_then(|m| self.modules.get(&m))
                .is_some_and(|m| m.building_id == building),
            ScopeFilter::BuildingAisles(building) => aisle.building_id == Some(building),
        };
        if !in_scope {
            return None;
        }

        Some(CandidatePosition {
            position_id: position.id,
            shelf_id: shelf.id,
            number: position.number,
            owner_id: shelf.owner_id,
            size_class_id: shelf_type.size_class_id,
            sort_key: sort_key(aisle, ladder, shelf),
        })
    }

    fn members_by(&self, pick: impl Fn(&Container) -> Option<JobId>, pick_item: impl Fn(&Item) -> Option<JobId>, id: JobId) -> JobMembers {
        JobMembers {
            containers: self
                .all_containers()
                .filter(|c| pick(c) == Some(id))
                .map(Container::reference)
                .collect(),
            items: self
                .items
                .values()
                .filter(|i| pick_item(i) == Some(id))
                .map(|i| i.id)
                .collect(),
        }
    }
}

/// Shared handle to an in-process inventory
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_tables(Tables::default())
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_tables(tables: Tables) -> Self {
        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }

    /// Apply `f` to the committed tables directly, outside any session
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Other` if the lock is poisoned.
    pub fn edit<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|e| StoreError::Other(format!("memory store lock poisoned: {e}")))?;
        Ok(f(&mut guard))
    }

    /// Copy of the committed tables
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Other` if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Tables, StoreError> {
        self.edit(|tables| tables.clone())
    }
}

impl Database for MemoryStore {
    type Session<'a> = MemorySession<'a>;

    fn begin(&self) -> Result<MemorySession<'_>, StoreError> {
        let guard = self
            .tables
            .lock()
            .map_err(|e| StoreError::Other(format!("memory store lock poisoned: {e}")))?;
        let work = guard.clone();
        Ok(MemorySession { guard, work })
    }
}

/// A serialized session over a [`MemoryStore`]
pub struct MemorySession<'a> {
    guard: MutexGuard<'a, Tables>,
    work: Tables,
}

impl UnitOfWork for MemorySession<'_> {
    fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl InventoryStore for MemorySession<'_> {
    fn building(&self, id: BuildingId) -> Result<Option<Building>, StoreError> {
        Ok(self.work.buildings.get(&id).cloned())
    }

    fn module(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        Ok(self.work.modules.get(&id).cloned())
    }

    fn aisle(&self, id: AisleId) -> Result<Option<Aisle>, StoreError> {
        Ok(self.work.aisles.get(&id).cloned())
    }

    fn side(&self, id: SideId) -> Result<Option<Side>, StoreError> {
        Ok(self.work.sides.get(&id).cloned())
    }

    fn ladder(&self, id: LadderId) -> Result<Option<Ladder>, StoreError> {
        Ok(self.work.ladders.get(&id).cloned())
    }

    fn shelf(&self, id: ShelfId) -> Result<Option<Shelf>, StoreError> {
        Ok(self.work.shelves.get(&id).cloned())
    }

    fn shelf_by_barcode(&self, value: &str) -> Result<Option<Shelf>, StoreError> {
        let Some(barcode) = self.work.barcodes.values().find(|b| b.value == value) else {
            return Ok(None);
        };
        Ok(self
            .work
            .shelves
            .values()
            .find(|s| s.barcode_id == Some(barcode.id))
            .cloned())
    }

    fn shelf_type(&self, id: ShelfTypeId) -> Result<Option<ShelfType>, StoreError> {
        Ok(self.work.shelf_types.get(&id).cloned())
    }

    fn shelf_position(&self, id: ShelfPositionId) -> Result<Option<ShelfPosition>, StoreError> {
        Ok(self.work.positions.get(&id).cloned())
    }

    fn position_on_shelf(&self, shelf: ShelfId, number: i32) -> Result<Option<ShelfPosition>, StoreError> {
        Ok(self
            .work
            .positions
            .values()
            .find(|p| p.shelf_id == shelf && p.number == number)
            .cloned())
    }

    fn occupied_count(&self, shelf: ShelfId) -> Result<u32, StoreError> {
        let occupied = self.work.occupied_positions();
        let count = self
            .work
            .positions
            .values()
            .filter(|p| p.shelf_id == shelf && occupied.contains(&p.id))
            .count();
        u32::try_from(count).map_err(|e| StoreError::Other(format!("occupied count overflow: {e}")))
    }

    fn occupants(&self, position: ShelfPositionId) -> Result<Vec<ContainerRef>, StoreError> {
        Ok(self
            .work
            .all_containers()
            .filter(|c| c.shelf_position_id == Some(position))
            .map(Container::reference)
            .collect())
    }

    fn shared_positions(&self) -> Result<Vec<(ShelfPositionId, Vec<ContainerRef>)>, StoreError> {
        let mut by_position: BTreeMap<ShelfPositionId, Vec<ContainerRef>> = BTreeMap::new();
        for container in self.work.all_containers() {
            if let Some(position) = container.shelf_position_id {
                by_position.entry(position).or_default().push(container.reference());
            }
        }
        Ok(by_position.into_iter().filter(|(_, refs)| refs.len() > 1).collect())
    }

    fn empty_positions(&self, scope: &ScopeFilter) -> Result<Vec<CandidatePosition>, StoreError> {
        let occupied = self.work.occupied_positions();
        let mut candidates: Vec<CandidatePosition> = self
            .work
            .positions
            .values()
            .filter(|p| !occupied.contains(&p.id))
            .filter_map(|p| self.work.candidate(p, scope))
            .collect();
        candidates.sort_by_key(|c| (c.sort_key, c.number, c.position_id));
        Ok(candidates)
    }

    fn lock_positions(&mut self, _positions: &[ShelfPositionId]) -> Result<(), StoreError> {
        // The session already holds the store-wide lock
        Ok(())
    }

    fn container(&self, container: ContainerRef) -> Result<Option<Container>, StoreError> {
        Ok(self.work.containers(container.kind).get(&container.id).cloned())
    }

    fn container_by_barcode(&self, kind: ContainerKind, value: &str) -> Result<Option<Container>, StoreError> {
        let Some(barcode) = self.work.barcodes.values().find(|b| b.value == value) else {
            return Ok(None);
        };
        Ok(self
            .work
            .containers(kind)
            .values()
            .find(|c| c.barcode_id == Some(barcode.id))
            .cloned())
    }

    fn save_container(&mut self, container: &Container) -> Result<(), StoreError> {
        self.work.reserve_id(container.id.get());
        let table = match container.kind {
            ContainerKind::Tray => &mut self.work.trays,
            ContainerKind::NonTray => &mut self.work.non_trays,
        };
        if let Some(position) = container.shelf_position_id {
            if table
                .values()
                .any(|other| other.id != container.id && other.shelf_position_id == Some(position))
            {
                return Err(StoreError::UniqueViolation(format!(
                    "uq_{}_shelf_position ({position})",
                    container.kind.table()
                )));
            }
        }
        table.insert(container.id, container.clone());
        Ok(())
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.work.items.get(&id).cloned())
    }

    fn item_by_barcode(&self, value: &str) -> Result<Option<Item>, StoreError> {
        let Some(barcode) = self.work.barcodes.values().find(|b| b.value == value) else {
            return Ok(None);
        };
        Ok(self
            .work
            .items
            .values()
            .find(|i| i.barcode_id == Some(barcode.id))
            .cloned())
    }

    fn tray_items(&self, tray: ContainerId) -> Result<Vec<ItemId>, StoreError> {
        Ok(self
            .work
            .items
            .values()
            .filter(|i| i.tray_id == Some(tray))
            .map(|i| i.id)
            .collect())
    }

    fn save_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.work.reserve_id(item.id.get());
        self.work.items.insert(item.id, item.clone());
        Ok(())
    }

    fn barcode(&self, id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        Ok(self.work.barcodes.get(&id).cloned())
    }

    fn barcode_type(&self, id: BarcodeTypeId) -> Result<Option<BarcodeType>, StoreError> {
        Ok(self.work.barcode_types.get(&id).cloned())
    }

    fn save_barcode(&mut self, barcode: &Barcode) -> Result<(), StoreError> {
        let duplicate = self
            .work
            .barcodes
            .values()
            .any(|b| b.value == barcode.value && b.id != barcode.id);
        if duplicate {
            return Err(StoreError::UniqueViolation(format!("barcodes_value_key ({})", barcode.value)));
        }
        self.work.reserve_id(barcode.id.get());
        self.work.barcodes.insert(barcode.id, barcode.clone());
        Ok(())
    }

    fn job(&self, kind: JobKind, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.work.jobs.get(&(kind, id)).cloned())
    }

    fn insert_job(&mut self, draft: JobDraft) -> Result<Job, StoreError> {
        let id = JobId(self.work.next_id());
        let job = draft.into_job(id);
        self.work.jobs.insert((job.kind(), id), job.clone());
        Ok(job)
    }

    fn save_job(&mut self, job: &Job) -> Result<(), StoreError> {
        let key = (job.kind(), job.id);
        match self.work.jobs.get_mut(&key) {
            Some(row) => {
                *row = job.clone();
                Ok(())
            }
            None => Err(StoreError::Query(format!("{} {} does not exist", job.kind(), job.id))),
        }
    }

    fn verification_job_for_accession(&self, accession_job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self
            .work
            .jobs
            .values()
            .find(|j| {
                matches!(
                    j.details,
                    JobDetails::Verification { accession_job_id: Some(a), .. } if a == accession_job_id
                )
            })
            .cloned())
    }

    fn job_members(&self, kind: JobKind, id: JobId) -> Result<JobMembers, StoreError> {
        let members = match kind {
            JobKind::Accession => self.work.members_by(|c| c.accession_job_id, |i| i.accession_job_id, id),
            JobKind::Verification => self.work.members_by(|c| c.verification_job_id, |i| i.verification_job_id, id),
            JobKind::Shelving => self.work.members_by(|c| c.shelving_job_id, |_| None, id),
            JobKind::Refile | JobKind::Withdraw | JobKind::PickList => {
                let mut members = JobMembers::default();
                for member in self.work.members.get(&(kind, id)).into_iter().flatten() {
                    match member {
                        JobMember::Container(c) => members.containers.push(*c),
                        JobMember::Item(i) => members.items.push(*i),
                    }
                }
                members.containers.sort();
                members.items.sort();
                members
            }
        };
        Ok(members)
    }

    fn add_job_member(&mut self, kind: JobKind, id: JobId, member: JobMember) -> Result<(), StoreError> {
        let rows = self.work.members.entry((kind, id)).or_default();
        if !rows.contains(&member) {
            rows.push(member);
        }
        Ok(())
    }

    fn jobs_with_member(&self, kind: JobKind, member: JobMember) -> Result<Vec<JobId>, StoreError> {
        let mut jobs: Vec<JobId> = self
            .work
            .members
            .iter()
            .filter(|((k, _), rows)| *k == kind && rows.contains(&member))
            .map(|((_, id), _)| *id)
            .collect();
        jobs.sort();
        Ok(jobs)
    }

    fn refile_queue(&self) -> Result<JobMembers, StoreError> {
        Ok(JobMembers {
            containers: self
                .work
                .non_trays
                .values()
                .filter(|c| c.scanned_for_refile_queue)
                .map(Container::reference)
                .collect(),
            items: self
                .work
                .items
                .values()
                .filter(|i| i.scanned_for_refile_queue)
                .map(|i| i.id)
                .collect(),
        })
    }

    fn record_discrepancy(&mut self, discrepancy: NewDiscrepancy) -> Result<ShelvingDiscrepancy, StoreError> {
        let id = DiscrepancyId(self.work.next_id());
        let row = ShelvingDiscrepancy::from_new(id, discrepancy, Utc::now());
        self.work.discrepancies.push(row.clone());
        Ok(row)
    }

    fn discrepancies(&self, shelving_job_id: JobId) -> Result<Vec<ShelvingDiscrepancy>, StoreError> {
        Ok(self
            .work
            .discrepancies
            .iter()
            .filter(|d| d.shelving_job_id == shelving_job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::LayoutBuilder;

    #[test]
    fn test_second_container_of_a_kind_cannot_share_a_position() {
        let layout = LayoutBuilder::new().shelf(1, 5, 1).build();
        layout.place_tray(10, layout.positions[0]);
        layout.tray(11, 1, 5);

        let mut session = layout.store.begin().unwrap();
        let mut tray = session.container(ContainerRef::tray(11)).unwrap().unwrap();
        tray.shelf_position_id = Some(layout.positions[0]);
        let err = session.save_container(&tray).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(ref c) if c.starts_with("uq_trays_shelf_position")));

        let mut same = session.container(ContainerRef::tray(10)).unwrap().unwrap();
        same.scanned_for_shelving = true;
        session.save_container(&same).unwrap();
    }

    #[test]
    fn test_rollback_discards_and_commit_publishes() {
        let layout = LayoutBuilder::new().build();
        layout.tray(10, 1, 5);

        let mut session = layout.store.begin().unwrap();
        let mut tray = session.container(ContainerRef::tray(10)).unwrap().unwrap();
        tray.scanned_for_refile_queue = true;
        session.save_container(&tray).unwrap();
        session.rollback().unwrap();
        assert!(!layout.store.snapshot().unwrap().trays[&ContainerId(10)].scanned_for_refile_queue);

        let mut session = layout.store.begin().unwrap();
        session.save_container(&tray).unwrap();
        session.commit().unwrap();
        assert!(layout.store.snapshot().unwrap().trays[&ContainerId(10)].scanned_for_refile_queue);
    }
}
