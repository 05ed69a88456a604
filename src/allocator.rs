//! Container placement allocator
//!
//! Greedy first-fit: containers are processed in the order the caller gives
//! them, and each takes the first empty position in walk order whose shelf
//! matches its size class and owner. There is no backtracking, so an earlier
//! container can take the only position a later one could have used. No
//! optimality (fill or fragmentation) is attempted.
//!
//! The whole batch succeeds or fails together: positions are only written to
//! the session after every container has a position, and a failure leaves the
//! surrounding unit of work to roll back.

use crate::error::InventoryError;
use crate::location::SortKey;
use crate::model::*;
use crate::store::{retry_on_conflict, with_transaction, Database, InventoryStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a bare building scope is searched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingScopeMode {
    /// Aisles belonging to the building's modules
    #[default]
    Modules,
    /// Aisles attached directly to the building
    DirectAisles,
}

/// Optional location narrowing supplied with an allocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationScope {
    pub building_id: Option<BuildingId>,
    pub module_id: Option<ModuleId>,
    pub aisle_id: Option<AisleId>,
    pub side_id: Option<SideId>,
    pub ladder_id: Option<LadderId>,
}

impl LocationScope {
    #[must_use]
    pub fn building(building_id: BuildingId) -> Self {
        Self {
            building_id: Some(building_id),
            ..Self::default()
        }
    }

    /// The most specific filter supplied: ladder, then side, aisle, module, building
    ///
    /// # Errors
    ///
    /// `BadRequest` when no identifier at all was supplied.
    pub fn narrowest(&self, mode: BuildingScopeMode) -> Result<ScopeFilter, InventoryError> {
        if let Some(id) = self.ladder_id {
            return Ok(ScopeFilter::Ladder(id));
        }
        if let Some(id) = self.side_id {
            return Ok(ScopeFilter::Side(id));
        }
        if let Some(id) = self.aisle_id {
            return Ok(ScopeFilter::Aisle(id));
        }
        if let Some(id) = self.module_id {
            return Ok(ScopeFilter::Module(id));
        }
        match (self.building_id, mode) {
            (Some(id), BuildingScopeMode::Modules) => Ok(ScopeFilter::BuildingModules(id)),
            (Some(id), BuildingScopeMode::DirectAisles) => Ok(ScopeFilter::BuildingAisles(id)),
            (None, _) => Err(InventoryError::BadRequest(
                "A building_id or a narrower location must be provided.".to_string(),
            )),
        }
    }
}

/// A single resolved location constraint on the candidate query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    Ladder(LadderId),
    Side(SideId),
    Aisle(AisleId),
    Module(ModuleId),
    BuildingModules(BuildingId),
    BuildingAisles(BuildingId),
}

/// An empty shelf position together with what placement needs to know about its shelf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePosition {
    pub position_id: ShelfPositionId,
    pub shelf_id: ShelfId,
    pub number: i32,
    pub owner_id: OwnerId,
    pub size_class_id: SizeClassId,
    pub sort_key: SortKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub container: ContainerRef,
    pub position_id: ShelfPositionId,
    pub shelf_id: ShelfId,
}

/// Why a container could not be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    /// Nothing was empty in scope at all
    NoCandidates,
    SizeClass(ContainerRef),
    Owner(ContainerRef),
}

impl Shortfall {
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Shortfall::NoCandidates => "no_candidates",
            Shortfall::SizeClass(_) => "size_class",
            Shortfall::Owner(_) => "owner",
        }
    }
}

/// Assign positions to every unplaced container, in input order
///
/// Containers already holding a position are skipped. `candidates` must be in
/// walk order; each position is handed out at most once.
///
/// # Errors
///
/// The first container that no remaining candidate fits, by size class first and owner second.
pub fn plan(containers: &[Container], candidates: &[CandidatePosition]) -> Result<Vec<Placement>, Shortfall> {
    let pending: Vec<&Container> = containers.iter().filter(|c| !c.is_placed()).collect();
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    if candidates.is_empty() {
        return Err(Shortfall::NoCandidates);
    }

    let mut taken: BTreeSet<ShelfPositionId> = BTreeSet::new();
    let mut placements = Vec::with_capacity(pending.len());

    for container in pending {
        let mut sized = candidates
            .iter()
            .filter(|c| !taken.contains(&c.position_id))
            .filter(|c| Some(c.size_class_id) == container.size_class_id)
            .peekable();
        if sized.peek().is_none() {
            return Err(Shortfall::SizeClass(container.reference()));
        }

        let chosen = sized
            .find(|c| Some(c.owner_id) == container.owner_id)
            .ok_or(Shortfall::Owner(container.reference()))?;

        taken.insert(chosen.position_id);
        placements.push(Placement {
            container: container.reference(),
            position_id: chosen.position_id,
            shelf_id: chosen.shelf_id,
        });
    }

    Ok(placements)
}

/// One allocation batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub kind: ContainerKind,
    /// Containers in the order they must be considered
    pub containers: Vec<ContainerId>,
    pub shelving_job_id: JobId,
    pub scope: LocationScope,
    pub mode: BuildingScopeMode,
}

fn barcode_label<S>(store: &S, container: &Container) -> Result<String, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let value = match container.barcode_id {
        Some(id) => store.barcode(id)?.map(|b| b.value),
        None => None,
    };
    Ok(value.unwrap_or_else(|| "None".to_string()))
}

fn shortfall_error<S>(store: &S, containers: &[Container], shortfall: Shortfall) -> Result<InventoryError, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let find = |r: ContainerRef| containers.iter().find(|c| c.reference() == r);
    let detail = match shortfall {
        Shortfall::NoCandidates => "No available shelf positions within constraints.".to_string(),
        Shortfall::SizeClass(r) => {
            let container = find(r).ok_or_else(|| InventoryError::Internal(format!("{r} missing from batch")))?;
            format!(
                "No available positions on shelves at size class {} needed for container with barcode {}",
                fmt_opt(container.size_class_id),
                barcode_label(store, container)?
            )
        }
        Shortfall::Owner(r) => {
            let container = find(r).ok_or_else(|| InventoryError::Internal(format!("{r} missing from batch")))?;
            format!(
                "No available positions on shelves for owner id {} at size class {} needed for container with barcode {}",
                fmt_opt(container.owner_id),
                fmt_opt(container.size_class_id),
                barcode_label(store, container)?
            )
        }
    };
    Ok(InventoryError::NotFound(detail))
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// Place a batch of containers inside an open session
///
/// Every container gets `shelving_job_id`; unplaced ones also get the same
/// position as actual and proposed position. Returns the containers as saved.
///
/// Chosen positions are locked and re-checked before anything is written, so a
/// concurrent placement surfaces as [`InventoryError::Conflict`] and the
/// caller can retry the whole unit of work.
///
/// # Errors
///
/// - `NotFound` for a missing container or when a container cannot be placed
/// - `BadRequest` without any location scope
/// - `Conflict` when a chosen position was taken concurrently
pub fn allocate<S>(session: &mut S, request: &AllocationRequest) -> Result<Vec<Container>, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    #[cfg(feature = "tracing")]
    let _span = crate::metrics::tracing_helpers::allocation_span(request.kind.as_str(), request.containers.len()).entered();

    let mut containers = Vec::with_capacity(request.containers.len());
    for id in &request.containers {
        let reference = ContainerRef {
            kind: request.kind,
            id: *id,
        };
        let container = session
            .container(reference)?
            .ok_or_else(|| InventoryError::NotFound(format!("{} ID {} Not Found", request.kind, id)))?;
        containers.push(container);
    }

    let filter = request.scope.narrowest(request.mode)?;
    let candidates = session.empty_positions(&filter)?;
    log::debug!(
        "allocating {} {} container(s) for shelving job {} against {} candidate position(s) ({:?})",
        containers.len(),
        request.kind,
        request.shelving_job_id,
        candidates.len(),
        filter
    );

    let placements = match plan(&containers, &candidates) {
        Ok(placements) => placements,
        Err(shortfall) => {
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.record_allocation_failure(shortfall.reason());
            let err = shortfall_error(&*session, &containers, shortfall)?;
            log::info!("allocation for shelving job {} failed: {}", request.shelving_job_id, err);
            return Err(err);
        }
    };

    let chosen: Vec<ShelfPositionId> = placements.iter().map(|p| p.position_id).collect();
    session.lock_positions(&chosen)?;
    for position in &chosen {
        if !session.occupants(*position)?.is_empty() {
            return Err(InventoryError::Conflict(format!(
                "Shelf Position ID {position} was occupied concurrently"
            )));
        }
    }

    for container in &mut containers {
        container.shelving_job_id = Some(request.shelving_job_id);
        if let Some(placement) = placements.iter().find(|p| p.container == container.reference()) {
            container.shelf_position_id = Some(placement.position_id);
            container.shelf_position_proposed_id = Some(placement.position_id);
        }
        session.save_container(container)?;
    }

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_placements(request.kind.as_str(), placements.len() as u64);
    log::info!(
        "placed {} of {} {} container(s) for shelving job {}",
        placements.len(),
        containers.len(),
        request.kind,
        request.shelving_job_id
    );

    Ok(containers)
}

/// [`allocate`] as its own unit of work, retried on conflict
///
/// # Errors
///
/// As [`allocate`], plus storage failures on begin/commit.
pub fn allocate_batch<D>(db: &D, request: &AllocationRequest, max_conflict_retries: u32) -> Result<Vec<Container>, InventoryError>
where
    D: Database,
{
    retry_on_conflict(max_conflict_retries, || with_transaction(db, |session| allocate(session, request)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::shelf_capacity;
    use crate::test_helpers::{LayoutBuilder, RacingStore};

    fn candidate(position: i64, owner: i64, size: i64, key: i64) -> CandidatePosition {
        CandidatePosition {
            position_id: ShelfPositionId(position),
            shelf_id: ShelfId(position * 10),
            number: 1,
            owner_id: OwnerId(owner),
            size_class_id: SizeClassId(size),
            sort_key: (key, 0, 0),
        }
    }

    fn tray(id: i64, owner: i64, size: i64) -> Container {
        let mut c = Container::new(ContainerKind::Tray, ContainerId(id));
        c.owner_id = Some(OwnerId(owner));
        c.size_class_id = Some(SizeClassId(size));
        c
    }

    #[test]
    fn test_scope_ladder_wins_over_building() {
        let scope = LocationScope {
            building_id: Some(BuildingId(1)),
            ladder_id: Some(LadderId(9)),
            module_id: Some(ModuleId(2)),
            ..LocationScope::default()
        };
        assert_eq!(scope.narrowest(BuildingScopeMode::Modules), Ok(ScopeFilter::Ladder(LadderId(9))));
    }

    #[test]
    fn test_scope_building_mode_toggle() {
        let scope = LocationScope::building(BuildingId(3));
        assert_eq!(
            scope.narrowest(BuildingScopeMode::Modules),
            Ok(ScopeFilter::BuildingModules(BuildingId(3)))
        );
        assert_eq!(
            scope.narrowest(BuildingScopeMode::DirectAisles),
            Ok(ScopeFilter::BuildingAisles(BuildingId(3)))
        );
        assert!(matches!(
            LocationScope::default().narrowest(BuildingScopeMode::Modules),
            Err(InventoryError::BadRequest(_))
        ));
    }

    #[test]
    fn test_building_scope_mode_config_names() {
        let mode: BuildingScopeMode = serde_json::from_str("\"direct_aisles\"").unwrap();
        assert_eq!(mode, BuildingScopeMode::DirectAisles);
        assert_eq!(BuildingScopeMode::default(), BuildingScopeMode::Modules);
    }

    #[test]
    fn test_plan_filters_size_then_owner() {
        let candidates = [candidate(1, 2, 5, 0), candidate(2, 1, 4, 1), candidate(3, 1, 5, 2)];
        let placements = plan(&[tray(100, 1, 5)], &candidates).unwrap();
        assert_eq!(placements[0].position_id, ShelfPositionId(3));

        assert_eq!(
            plan(&[tray(101, 1, 7)], &candidates),
            Err(Shortfall::SizeClass(ContainerRef::tray(101)))
        );
        assert_eq!(
            plan(&[tray(102, 9, 5)], &candidates),
            Err(Shortfall::Owner(ContainerRef::tray(102)))
        );
    }

    #[test]
    fn test_plan_is_greedy_without_backtracking() {
        // The first container takes the only position the second one needs
        let candidates = [candidate(1, 1, 5, 0)];
        let result = plan(&[tray(1, 1, 5), tray(2, 1, 5)], &candidates);
        assert_eq!(result, Err(Shortfall::SizeClass(ContainerRef::tray(2))));
    }

    #[test]
    fn test_plan_skips_placed_containers() {
        let mut placed = tray(1, 1, 5);
        placed.shelf_position_id = Some(ShelfPositionId(77));
        assert_eq!(plan(&[placed.clone()], &[]), Ok(Vec::new()));

        let placements = plan(&[placed, tray(2, 1, 5)], &[candidate(4, 1, 5, 0)]).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].container, ContainerRef::tray(2));
    }

    #[test]
    fn test_plan_with_no_candidates() {
        assert_eq!(plan(&[tray(1, 1, 5)], &[]), Err(Shortfall::NoCandidates));
    }

    #[test]
    fn test_allocate_assigns_actual_and_proposed_in_walk_order() {
        let layout = LayoutBuilder::new().shelf(1, 5, 2).build();
        layout.tray(10, 1, 5);
        layout.tray(11, 1, 5);
        let job = layout.shelving_job();

        let request = AllocationRequest {
            kind: ContainerKind::Tray,
            containers: vec![ContainerId(11), ContainerId(10)],
            shelving_job_id: job,
            scope: LocationScope::building(layout.building),
            mode: BuildingScopeMode::Modules,
        };
        let placed = allocate_batch(&layout.store, &request, 0).unwrap();

        assert_eq!(placed[0].id, ContainerId(11));
        assert_eq!(placed[0].shelf_position_id, Some(layout.positions[0]));
        assert_eq!(placed[0].shelf_position_proposed_id, Some(layout.positions[0]));
        assert_eq!(placed[1].shelf_position_id, Some(layout.positions[1]));
        assert!(placed.iter().all(|c| c.shelving_job_id == Some(job)));
    }

    #[test]
    fn test_allocate_failure_leaves_batch_unplaced() {
        let layout = LayoutBuilder::new().shelf(1, 5, 1).build();
        layout.tray(10, 1, 5);
        layout.tray(11, 1, 5);
        let job = layout.shelving_job();

        let request = AllocationRequest {
            kind: ContainerKind::Tray,
            containers: vec![ContainerId(10), ContainerId(11)],
            shelving_job_id: job,
            scope: LocationScope::building(layout.building),
            mode: BuildingScopeMode::Modules,
        };
        let err = allocate_batch(&layout.store, &request, 0).unwrap_err();
        assert_eq!(
            err,
            InventoryError::NotFound(
                "No available positions on shelves at size class 5 needed for container with barcode T11".into()
            )
        );

        let tables = layout.store.snapshot().unwrap();
        assert!(tables.trays.values().all(|t| t.shelf_position_id.is_none()));
        assert!(tables.trays.values().all(|t| t.shelving_job_id.is_none()));
    }

    #[test]
    fn test_allocate_reports_owner_shortfall() {
        let layout = LayoutBuilder::new().shelf(1, 5, 3).build();
        layout.non_tray(20, 2, 5);
        let job = layout.shelving_job();

        let request = AllocationRequest {
            kind: ContainerKind::NonTray,
            containers: vec![ContainerId(20)],
            shelving_job_id: job,
            scope: LocationScope::building(layout.building),
            mode: BuildingScopeMode::Modules,
        };
        let err = allocate_batch(&layout.store, &request, 0).unwrap_err();
        assert_eq!(
            err,
            InventoryError::NotFound(
                "No available positions on shelves for owner id 2 at size class 5 needed for container with barcode N20"
                    .into()
            )
        );
    }

    #[test]
    fn test_allocate_respects_ladder_scope() {
        let layout = LayoutBuilder::new().shelf(1, 5, 1).ladder().shelf(1, 5, 1).build();
        layout.tray(10, 1, 5);
        let job = layout.shelving_job();

        let request = AllocationRequest {
            kind: ContainerKind::Tray,
            containers: vec![ContainerId(10)],
            shelving_job_id: job,
            scope: LocationScope {
                building_id: Some(layout.building),
                ladder_id: Some(layout.ladders[1]),
                ..LocationScope::default()
            },
            mode: BuildingScopeMode::Modules,
        };
        let placed = allocate_batch(&layout.store, &request, 0).unwrap();
        assert_eq!(placed[0].shelf_position_id, Some(layout.positions[1]));
    }

    #[test]
    fn test_allocate_keeps_capacity_consistent() {
        let layout = LayoutBuilder::new().shelf(1, 5, 4).build();
        for id in 10..13 {
            layout.tray(id, 1, 5);
        }
        let job = layout.shelving_job();

        let request = AllocationRequest {
            kind: ContainerKind::Tray,
            containers: vec![ContainerId(10), ContainerId(11), ContainerId(12)],
            shelving_job_id: job,
            scope: LocationScope::building(layout.building),
            mode: BuildingScopeMode::Modules,
        };
        allocate_batch(&layout.store, &request, 0).unwrap();

        let session = layout.store.begin().unwrap();
        let capacity = shelf_capacity(&session, layout.shelves[0]).unwrap();
        assert_eq!(capacity.occupied, 3);
        assert_eq!(i64::from(capacity.occupied) + capacity.available_space(), 4);
    }

    #[test]
    fn test_position_taken_after_lock_is_a_conflict() {
        let layout = LayoutBuilder::new().shelf(1, 5, 2).build();
        layout.tray(10, 1, 5);
        let request = AllocationRequest {
            kind: ContainerKind::Tray,
            containers: vec![ContainerId(10)],
            shelving_job_id: layout.shelving_job(),
            scope: LocationScope::building(layout.building),
            mode: BuildingScopeMode::Modules,
        };
        let racing = RacingStore::new(layout.store.clone(), 1);

        let mut session = racing.begin().unwrap();
        let err = allocate(&mut session, &request).unwrap_err();
        assert_eq!(
            err,
            InventoryError::Conflict(format!("Shelf Position ID {} was occupied concurrently", layout.positions[0]))
        );
        drop(session);

        let err = allocate_batch(&RacingStore::new(layout.store.clone(), 1), &request, 0).unwrap_err();
        assert!(err.is_conflict());
        let tables = layout.store.snapshot().unwrap();
        assert_eq!(tables.trays[&ContainerId(10)].shelf_position_id, None);
        assert_eq!(tables.trays[&ContainerId(10)].shelving_job_id, None);
    }

    #[test]
    fn test_allocate_batch_retries_onto_next_position() {
        let layout = LayoutBuilder::new().shelf(1, 5, 3).build();
        layout.tray(10, 1, 5);
        let request = AllocationRequest {
            kind: ContainerKind::Tray,
            containers: vec![ContainerId(10)],
            shelving_job_id: layout.shelving_job(),
            scope: LocationScope::building(layout.building),
            mode: BuildingScopeMode::Modules,
        };
        let racing = RacingStore::new(layout.store.clone(), 1);

        let placed = allocate_batch(&racing, &request, 2).unwrap();
        assert_eq!(placed[0].shelf_position_id, Some(layout.positions[1]));

        let tables = layout.store.snapshot().unwrap();
        assert_eq!(tables.trays[&ContainerId(10)].shelf_position_id, Some(layout.positions[1]));
        let rivals: Vec<_> = tables.non_trays.values().filter_map(|c| c.shelf_position_id).collect();
        assert_eq!(rivals, vec![layout.positions[0]]);

        let session = layout.store.begin().unwrap();
        assert!(crate::capacity::audit_occupancy(&session).unwrap().is_empty());
    }
}
