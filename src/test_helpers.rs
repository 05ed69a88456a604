//! Fixtures for tests: an in-memory inventory with a small location hierarchy
//!
//! The builder lays out one building ("Main") with one module ("1"). Aisles,
//! ladders and shelves are added in walk order; all sides are left sides.
//! Fixture methods panic on failure.

#![allow(clippy::missing_panics_doc)]

use crate::allocator::{CandidatePosition, ScopeFilter};
use crate::executor::StoreError;
use crate::model::*;
use crate::store::memory::{MemorySession, MemoryStore, Tables};
use crate::store::{Database, InventoryStore, JobMember, JobMembers, UnitOfWork};
use chrono::Utc;
use std::cell::{Cell, RefCell};

#[derive(Debug, Clone, Copy)]
struct ShelfSpec {
    owner: i64,
    size_class: i64,
    positions: i32,
}

#[derive(Debug, Clone, Default)]
struct AisleSpec {
    priority: Option<i64>,
    ladders: Vec<Vec<ShelfSpec>>,
}

impl AisleSpec {
    fn new() -> Self {
        Self {
            priority: None,
            ladders: vec![Vec::new()],
        }
    }
}

/// Builds a [`Layout`]
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    direct_aisles: bool,
    aisles: Vec<AisleSpec>,
}

impl Default for LayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            direct_aisles: false,
            aisles: vec![AisleSpec::new()],
        }
    }

    /// Attach aisles directly to the building instead of to the module
    #[must_use]
    pub fn direct_aisles(mut self) -> Self {
        self.direct_aisles = true;
        self
    }

    /// Start a new aisle
    #[must_use]
    pub fn aisle(mut self) -> Self {
        self.aisles.push(AisleSpec::new());
        self
    }

    /// Set `sort_priority` on the current aisle
    #[must_use]
    pub fn aisle_priority(mut self, priority: i64) -> Self {
        if let Some(aisle) = self.aisles.last_mut() {
            aisle.priority = Some(priority);
        }
        self
    }

    /// Start a new ladder in the current aisle
    #[must_use]
    pub fn ladder(mut self) -> Self {
        if let Some(aisle) = self.aisles.last_mut() {
            aisle.ladders.push(Vec::new());
        }
        self
    }

    /// Add a shelf to the current ladder with `positions` slots numbered from 1
    #[must_use]
    pub fn shelf(mut self, owner: i64, size_class: i64, positions: i32) -> Self {
        if let Some(ladder) = self.aisles.last_mut().and_then(|a| a.ladders.last_mut()) {
            ladder.push(ShelfSpec {
                owner,
                size_class,
                positions,
            });
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Layout {
        let mut t = Tables::default();
        let building = BuildingId(t.next_id());
        t.buildings.insert(
            building,
            Building {
                id: building,
                name: "Main".to_string(),
            },
        );
        let module = ModuleId(t.next_id());
        t.modules.insert(
            module,
            Module {
                id: module,
                building_id: building,
                number: "1".to_string(),
            },
        );
        let barcode_type = BarcodeTypeId(t.next_id());
        t.barcode_types.insert(
            barcode_type,
            BarcodeType {
                id: barcode_type,
                name: "Default".to_string(),
                allowed_pattern: None,
            },
        );

        let mut layout = Layout {
            store: MemoryStore::new(),
            building,
            module,
            barcode_type,
            aisles: Vec::new(),
            sides: Vec::new(),
            ladders: Vec::new(),
            shelves: Vec::new(),
            positions: Vec::new(),
        };

        for (aisle_index, aisle_spec) in self.aisles.iter().enumerate() {
            let aisle_number = i32::try_from(aisle_index + 1).expect("aisle count fits i32");
            let aisle = AisleId(t.next_id());
            t.aisles.insert(
                aisle,
                Aisle {
                    id: aisle,
                    module_id: (!self.direct_aisles).then_some(module),
                    building_id: self.direct_aisles.then_some(building),
                    number_id: i64::from(aisle_number),
                    number: aisle_number,
                    sort_priority: aisle_spec.priority,
                },
            );
            let side = SideId(t.next_id());
            t.sides.insert(
                side,
                Side {
                    id: side,
                    aisle_id: aisle,
                    orientation: SideOrientation::Left,
                },
            );
            layout.aisles.push(aisle);
            layout.sides.push(side);

            for (ladder_index, shelves) in aisle_spec.ladders.iter().enumerate() {
                let ladder_number = i32::try_from(ladder_index + 1).expect("ladder count fits i32");
                let ladder = LadderId(t.next_id());
                t.ladders.insert(
                    ladder,
                    Ladder {
                        id: ladder,
                        side_id: side,
                        number_id: i64::from(ladder_number),
                        number: ladder_number,
                        sort_priority: None,
                    },
                );
                layout.ladders.push(ladder);

                for (shelf_index, spec) in shelves.iter().enumerate() {
                    let shelf_number = i32::try_from(shelf_index + 1).expect("shelf count fits i32");
                    let shelf_type = ShelfTypeId(t.next_id());
                    t.shelf_types.insert(
                        shelf_type,
                        ShelfType {
                            id: shelf_type,
                            size_class_id: SizeClassId(spec.size_class),
                            max_capacity: spec.positions,
                        },
                    );
                    let barcode = BarcodeId(t.next_id());
                    let shelf = ShelfId(t.next_id());
                    t.barcodes.insert(
                        barcode,
                        Barcode {
                            id: barcode,
                            value: format!("S{shelf}"),
                            type_id: barcode_type,
                            withdrawn: false,
                        },
                    );
                    t.shelves.insert(
                        shelf,
                        Shelf {
                            id: shelf,
                            ladder_id: ladder,
                            shelf_type_id: shelf_type,
                            owner_id: OwnerId(spec.owner),
                            barcode_id: Some(barcode),
                            number_id: i64::from(shelf_number),
                            number: shelf_number,
                            sort_priority: None,
                        },
                    );
                    layout.shelves.push(shelf);

                    for number in 1..=spec.positions {
                        let position = ShelfPositionId(t.next_id());
                        t.positions.insert(
                            position,
                            ShelfPosition {
                                id: position,
                                shelf_id: shelf,
                                number,
                            },
                        );
                        layout.positions.push(position);
                    }
                }
            }
        }

        // Fixture container and item ids are chosen by tests; keep generated ids clear of them
        t.reserve_id(1_000);
        layout.store = MemoryStore::from_tables(t);
        layout
    }
}

/// An in-memory inventory plus the ids of everything the builder created
pub struct Layout {
    pub store: MemoryStore,
    pub building: BuildingId,
    pub module: ModuleId,
    pub barcode_type: BarcodeTypeId,
    /// In creation order
    pub aisles: Vec<AisleId>,
    pub sides: Vec<SideId>,
    pub ladders: Vec<LadderId>,
    pub shelves: Vec<ShelfId>,
    /// Every position, shelf by shelf
    pub positions: Vec<ShelfPositionId>,
}

impl Layout {
    fn edit<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        self.store.edit(f).expect("memory store lock")
    }

    fn new_barcode(t: &mut Tables, value: String, type_id: BarcodeTypeId) -> BarcodeId {
        let id = BarcodeId(t.next_id());
        t.barcodes.insert(
            id,
            Barcode {
                id,
                value,
                type_id,
                withdrawn: false,
            },
        );
        id
    }

    fn insert_container(&self, kind: ContainerKind, id: i64, owner: i64, size_class: i64, position: Option<ShelfPositionId>) {
        let prefix = match kind {
            ContainerKind::Tray => "T",
            ContainerKind::NonTray => "N",
        };
        let type_id = self.barcode_type;
        self.edit(|t| {
            let mut container = Container::new(kind, ContainerId(id));
            container.barcode_id = Some(Self::new_barcode(t, format!("{prefix}{id}"), type_id));
            container.owner_id = Some(OwnerId(owner));
            container.size_class_id = Some(SizeClassId(size_class));
            container.shelf_position_id = position;
            match kind {
                ContainerKind::Tray => t.trays.insert(container.id, container),
                ContainerKind::NonTray => t.non_trays.insert(container.id, container),
            };
        });
    }

    fn shelf_constraints(&self, position: ShelfPositionId) -> (i64, i64) {
        self.edit(|t| {
            let shelf = &t.shelves[&t.positions[&position].shelf_id];
            let size_class = t.shelf_types[&shelf.shelf_type_id].size_class_id;
            (shelf.owner_id.get(), size_class.get())
        })
    }

    /// Unplaced tray with barcode `T{id}`
    pub fn tray(&self, id: i64, owner: i64, size_class: i64) {
        self.insert_container(ContainerKind::Tray, id, owner, size_class, None);
    }

    /// Unplaced non-tray item with barcode `N{id}`
    pub fn non_tray(&self, id: i64, owner: i64, size_class: i64) {
        self.insert_container(ContainerKind::NonTray, id, owner, size_class, None);
    }

    /// Tray already on `position`, matching its shelf's owner and size class
    pub fn place_tray(&self, id: i64, position: ShelfPositionId) {
        let (owner, size_class) = self.shelf_constraints(position);
        self.insert_container(ContainerKind::Tray, id, owner, size_class, Some(position));
    }

    /// Non-tray item already on `position`, matching its shelf's owner and size class
    pub fn place_non_tray(&self, id: i64, position: ShelfPositionId) {
        let (owner, size_class) = self.shelf_constraints(position);
        self.insert_container(ContainerKind::NonTray, id, owner, size_class, Some(position));
    }

    /// Item with barcode `I{id}`, optionally inside tray `tray`
    pub fn item(&self, id: i64, tray: Option<i64>) {
        let type_id = self.barcode_type;
        self.edit(|t| {
            let mut item = Item::new(ItemId(id));
            item.barcode_id = Some(Self::new_barcode(t, format!("I{id}"), type_id));
            item.tray_id = tray.map(ContainerId);
            t.items.insert(item.id, item);
        });
    }

    /// Insert a `Created` job
    pub fn job(&self, details: JobDetails) -> JobId {
        self.edit(|t| {
            let id = JobId(t.next_id());
            let job = JobDraft::new(details, Some(UserId(1)), Utc::now()).into_job(id);
            t.jobs.insert((job.kind(), id), job);
            id
        })
    }

    pub fn shelving_job(&self) -> JobId {
        self.job(JobDetails::Shelving {
            origin: ShelvingOrigin::Direct,
            building_id: Some(self.building),
        })
    }

    pub fn verification_job(&self, trayed: bool, owner: i64, size_class: i64) -> JobId {
        self.job(JobDetails::Verification {
            accession_job_id: None,
            shelving_job_id: None,
            trayed,
            owner_id: Some(OwnerId(owner)),
            size_class_id: Some(SizeClassId(size_class)),
        })
    }

    pub fn completed_verification_job(&self, owner: i64, size_class: i64) -> JobId {
        let id = self.verification_job(true, owner, size_class);
        self.edit(|t| {
            if let Some(job) = t.jobs.get_mut(&(JobKind::Verification, id)) {
                job.status = JobStatus::Completed;
            }
        });
        id
    }

    pub fn attach_to_verification(&self, verification: JobId, containers: &[ContainerRef]) {
        self.edit(|t| {
            for reference in containers {
                let table = match reference.kind {
                    ContainerKind::Tray => &mut t.trays,
                    ContainerKind::NonTray => &mut t.non_trays,
                };
                if let Some(container) = table.get_mut(&reference.id) {
                    container.verification_job_id = Some(verification);
                }
            }
        });
    }
}

/// A [`MemoryStore`] whose sessions lose the race for the positions they lock
///
/// In each of the first `races` sessions that lock positions, the first locked
/// position reports a rival non-tray occupant right after the lock. The rival
/// is committed to the store when the next session begins, as if another
/// writer had claimed the position in between.
pub struct RacingStore {
    pub store: MemoryStore,
    races: Cell<u32>,
    lost: RefCell<Vec<ShelfPositionId>>,
}

impl RacingStore {
    #[must_use]
    pub fn new(store: MemoryStore, races: u32) -> Self {
        Self {
            store,
            races: Cell::new(races),
            lost: RefCell::new(Vec::new()),
        }
    }
}

impl Database for RacingStore {
    type Session<'a> = RacingSession<'a>;

    fn begin(&self) -> Result<RacingSession<'_>, StoreError> {
        for position in self.lost.borrow_mut().drain(..) {
            self.store.edit(|t| {
                let id = ContainerId(t.next_id());
                let mut rival = Container::new(ContainerKind::NonTray, id);
                rival.shelf_position_id = Some(position);
                t.non_trays.insert(id, rival);
            })?;
        }
        Ok(RacingSession {
            inner: self.store.begin()?,
            owner: self,
            rival: None,
        })
    }
}

/// Session handed out by [`RacingStore`]
pub struct RacingSession<'a> {
    inner: MemorySession<'a>,
    owner: &'a RacingStore,
    rival: Option<ShelfPositionId>,
}

impl UnitOfWork for RacingSession<'_> {
    fn commit(self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

impl InventoryStore for RacingSession<'_> {
    fn building(&self, id: BuildingId) -> Result<Option<Building>, StoreError> {
        self.inner.building(id)
    }

    fn module(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        self.inner.module(id)
    }

    fn aisle(&self, id: AisleId) -> Result<Option<Aisle>, StoreError> {
        self.inner.aisle(id)
    }

    fn side(&self, id: SideId) -> Result<Option<Side>, StoreError> {
        self.inner.side(id)
    }

    fn ladder(&self, id: LadderId) -> Result<Option<Ladder>, StoreError> {
        self.inner.ladder(id)
    }

    fn shelf(&self, id: ShelfId) -> Result<Option<Shelf>, StoreError> {
        self.inner.shelf(id)
    }

    fn shelf_by_barcode(&self, value: &str) -> Result<Option<Shelf>, StoreError> {
        self.inner.shelf_by_barcode(value)
    }

    fn shelf_type(&self, id: ShelfTypeId) -> Result<Option<ShelfType>, StoreError> {
        self.inner.shelf_type(id)
    }

    fn shelf_position(&self, id: ShelfPositionId) -> Result<Option<ShelfPosition>, StoreError> {
        self.inner.shelf_position(id)
    }

    fn position_on_shelf(&self, shelf: ShelfId, number: i32) -> Result<Option<ShelfPosition>, StoreError> {
        self.inner.position_on_shelf(shelf, number)
    }

    fn occupied_count(&self, shelf: ShelfId) -> Result<u32, StoreError> {
        self.inner.occupied_count(shelf)
    }

    fn occupants(&self, position: ShelfPositionId) -> Result<Vec<ContainerRef>, StoreError> {
        let mut found = self.inner.occupants(position)?;
        if self.rival == Some(position) {
            found.push(ContainerRef::non_tray(i64::MAX));
        }
        Ok(found)
    }

    fn shared_positions(&self) -> Result<Vec<(ShelfPositionId, Vec<ContainerRef>)>, StoreError> {
        self.inner.shared_positions()
    }

    fn empty_positions(&self, scope: &ScopeFilter) -> Result<Vec<CandidatePosition>, StoreError> {
        self.inner.empty_positions(scope)
    }

    fn lock_positions(&mut self, positions: &[ShelfPositionId]) -> Result<(), StoreError> {
        self.inner.lock_positions(positions)?;
        let races = self.owner.races.get();
        if let (None, Some(first), true) = (self.rival, positions.first(), races > 0) {
            self.owner.races.set(races - 1);
            self.owner.lost.borrow_mut().push(*first);
            self.rival = Some(*first);
        }
        Ok(())
    }

    fn container(&self, container: ContainerRef) -> Result<Option<Container>, StoreError> {
        self.inner.container(container)
    }

    fn container_by_barcode(&self, kind: ContainerKind, value: &str) -> Result<Option<Container>, StoreError> {
        self.inner.container_by_barcode(kind, value)
    }

    fn save_container(&mut self, container: &Container) -> Result<(), StoreError> {
        self.inner.save_container(container)
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        self.inner.item(id)
    }

    fn item_by_barcode(&self, value: &str) -> Result<Option<Item>, StoreError> {
        self.inner.item_by_barcode(value)
    }

    fn tray_items(&self, tray: ContainerId) -> Result<Vec<ItemId>, StoreError> {
        self.inner.tray_items(tray)
    }

    fn save_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.inner.save_item(item)
    }

    fn barcode(&self, id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        self.inner.barcode(id)
    }

    fn barcode_type(&self, id: BarcodeTypeId) -> Result<Option<BarcodeType>, StoreError> {
        self.inner.barcode_type(id)
    }

    fn save_barcode(&mut self, barcode: &Barcode) -> Result<(), StoreError> {
        self.inner.save_barcode(barcode)
    }

    fn job(&self, kind: JobKind, id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.job(kind, id)
    }

    fn insert_job(&mut self, draft: JobDraft) -> Result<Job, StoreError> {
        self.inner.insert_job(draft)
    }

    fn save_job(&mut self, job: &Job) -> Result<(), StoreError> {
        self.inner.save_job(job)
    }

    fn verification_job_for_accession(&self, accession_job_id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.verification_job_for_accession(accession_job_id)
    }

    fn job_members(&self, kind: JobKind, id: JobId) -> Result<JobMembers, StoreError> {
        self.inner.job_members(kind, id)
    }

    fn add_job_member(&mut self, kind: JobKind, id: JobId, member: JobMember) -> Result<(), StoreError> {
        self.inner.add_job_member(kind, id, member)
    }

    fn jobs_with_member(&self, kind: JobKind, member: JobMember) -> Result<Vec<JobId>, StoreError> {
        self.inner.jobs_with_member(kind, member)
    }

    fn refile_queue(&self) -> Result<JobMembers, StoreError> {
        self.inner.refile_queue()
    }

    fn record_discrepancy(&mut self, discrepancy: NewDiscrepancy) -> Result<ShelvingDiscrepancy, StoreError> {
        self.inner.record_discrepancy(discrepancy)
    }

    fn discrepancies(&self, shelving_job_id: JobId) -> Result<Vec<ShelvingDiscrepancy>, StoreError> {
        self.inner.discrepancies(shelving_job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_lays_out_hierarchy() {
        let layout = LayoutBuilder::new()
            .shelf(1, 5, 2)
            .ladder()
            .shelf(2, 6, 1)
            .aisle()
            .shelf(1, 5, 3)
            .build();

        assert_eq!(layout.aisles.len(), 2);
        assert_eq!(layout.ladders.len(), 3);
        assert_eq!(layout.shelves.len(), 3);
        assert_eq!(layout.positions.len(), 6);

        let tables = layout.store.snapshot().unwrap();
        let second_aisle = &tables.aisles[&layout.aisles[1]];
        assert_eq!(second_aisle.number, 2);
        assert_eq!(second_aisle.module_id, Some(layout.module));
    }

    #[test]
    fn test_placed_containers_match_their_shelf() {
        let layout = LayoutBuilder::new().shelf(4, 7, 1).build();
        layout.place_tray(10, layout.positions[0]);
        let tables = layout.store.snapshot().unwrap();
        let tray = &tables.trays[&ContainerId(10)];
        assert_eq!(tray.owner_id, Some(OwnerId(4)));
        assert_eq!(tray.size_class_id, Some(SizeClassId(7)));
        assert_eq!(tables.barcodes[&tray.barcode_id.unwrap()].value, "T10");
    }
}
