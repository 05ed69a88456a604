//! Retrieval ordering for refile jobs, pick lists and the refile queue
//!
//! Placed entries are walked aisle by aisle, then ladder, then shelf. Side
//! orientation and position number are not considered. Entries without a
//! position go last, items before containers, each in original order.

use crate::error::InventoryError;
use crate::location::{position_address, resolve_building, resolve_location, SortKey};
use crate::model::*;
use crate::store::{InventoryStore, JobMembers};
use serde::Serialize;

/// What to order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    RefileJob(JobId),
    PickList(JobId),
    /// Everything scanned for the refile queue, optionally limited to one building
    RefileQueue { building: Option<BuildingId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetrievalMember {
    Item(ItemId),
    Container(ContainerRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalEntry {
    pub member: RetrievalMember,
    /// Position of the container, or of the tray holding the item
    pub shelf_position_id: Option<ShelfPositionId>,
    pub sort_key: Option<SortKey>,
    pub address: Option<String>,
}

impl RetrievalEntry {
    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.shelf_position_id.is_some()
    }
}

fn members<S>(store: &S, source: RetrievalSource) -> Result<JobMembers, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let (kind, id) = match source {
        RetrievalSource::RefileJob(id) => (JobKind::Refile, id),
        RetrievalSource::PickList(id) => (JobKind::PickList, id),
        RetrievalSource::RefileQueue { .. } => return Ok(store.refile_queue()?),
    };
    if store.job(kind, id)?.is_none() {
        return Err(InventoryError::NotFound(format!("{kind} ID {id} Not Found")));
    }
    Ok(store.job_members(kind, id)?)
}

fn item_position<S>(store: &S, id: ItemId) -> Result<Option<ShelfPositionId>, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let Some(tray_id) = store.item(id)?.and_then(|item| item.tray_id) else {
        return Ok(None);
    };
    Ok(store
        .container(ContainerRef {
            kind: ContainerKind::Tray,
            id: tray_id,
        })?
        .and_then(|tray| tray.shelf_position_id))
}

fn entry<S>(store: &S, member: RetrievalMember, position: Option<ShelfPositionId>) -> Result<RetrievalEntry, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let (sort_key, address) = match position {
        Some(p) => (
            Some(resolve_location(store, p)?.sort_key()),
            Some(position_address(store, p)?.human),
        ),
        None => (None, None),
    };
    Ok(RetrievalEntry {
        member,
        shelf_position_id: position,
        sort_key,
        address,
    })
}

/// Order a job's or the refile queue's members for one retrieval walk
///
/// # Errors
///
/// `NotFound` for an unknown job or a position whose location hierarchy is broken.
pub fn sort_for_retrieval<S>(store: &S, source: RetrievalSource) -> Result<Vec<RetrievalEntry>, InventoryError>
where
    S: InventoryStore + ?Sized,
{
    let members = members(store, source)?;

    let mut entries = Vec::with_capacity(members.items.len() + members.containers.len());
    for id in &members.items {
        entries.push(entry(store, RetrievalMember::Item(*id), item_position(store, *id)?)?);
    }
    for reference in &members.containers {
        let position = store.container(*reference)?.and_then(|c| c.shelf_position_id);
        entries.push(entry(store, RetrievalMember::Container(*reference), position)?);
    }

    if let RetrievalSource::RefileQueue { building: Some(building) } = source {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(position) = entry.shelf_position_id {
                if resolve_building(store, position)?.id == building {
                    kept.push(entry);
                }
            }
        }
        entries = kept;
    }

    Ok(order(entries))
}

/// Stable-sort placed entries by walk order and append unplaced ones, items first
#[must_use]
pub fn order(entries: Vec<RetrievalEntry>) -> Vec<RetrievalEntry> {
    let (mut placed, unplaced): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.sort_key.is_some());
    placed.sort_by_key(|e| e.sort_key);

    let (items, containers): (Vec<_>, Vec<_>) = unplaced
        .into_iter()
        .partition(|e| matches!(e.member, RetrievalMember::Item(_)));
    placed.extend(items);
    placed.extend(containers);
    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, JobMember, UnitOfWork};
    use crate::test_helpers::LayoutBuilder;

    fn bare(member: RetrievalMember, key: Option<SortKey>) -> RetrievalEntry {
        RetrievalEntry {
            member,
            shelf_position_id: key.map(|_| ShelfPositionId(1)),
            sort_key: key,
            address: None,
        }
    }

    #[test]
    fn test_order_by_aisle_priority() {
        let entries = vec![
            bare(RetrievalMember::Container(ContainerRef::non_tray(1)), Some((2, 0, 0))),
            bare(RetrievalMember::Container(ContainerRef::non_tray(2)), Some((1, 0, 0))),
            bare(RetrievalMember::Container(ContainerRef::non_tray(3)), Some((3, 0, 0))),
        ];
        let ordered: Vec<_> = order(entries).into_iter().map(|e| e.sort_key).collect();
        assert_eq!(ordered, vec![Some((1, 0, 0)), Some((2, 0, 0)), Some((3, 0, 0))]);
    }

    #[test]
    fn test_unplaced_go_last_items_first() {
        let entries = vec![
            bare(RetrievalMember::Container(ContainerRef::non_tray(1)), None),
            bare(RetrievalMember::Item(ItemId(7)), None),
            bare(RetrievalMember::Container(ContainerRef::non_tray(2)), Some((9, 9, 9))),
            bare(RetrievalMember::Item(ItemId(8)), None),
        ];
        let ordered: Vec<_> = order(entries).into_iter().map(|e| e.member).collect();
        assert_eq!(
            ordered,
            vec![
                RetrievalMember::Container(ContainerRef::non_tray(2)),
                RetrievalMember::Item(ItemId(7)),
                RetrievalMember::Item(ItemId(8)),
                RetrievalMember::Container(ContainerRef::non_tray(1)),
            ]
        );
    }

    #[test]
    fn test_equal_keys_keep_input_order() {
        let entries = vec![
            bare(RetrievalMember::Item(ItemId(3)), Some((1, 1, 1))),
            bare(RetrievalMember::Item(ItemId(1)), Some((1, 1, 1))),
        ];
        let ordered: Vec<_> = order(entries).into_iter().map(|e| e.member).collect();
        assert_eq!(ordered, vec![RetrievalMember::Item(ItemId(3)), RetrievalMember::Item(ItemId(1))]);
    }

    #[test]
    fn test_refile_job_walks_aisles_in_priority_order() {
        let layout = LayoutBuilder::new()
            .aisle_priority(2)
            .shelf(1, 5, 1)
            .aisle()
            .aisle_priority(1)
            .shelf(1, 5, 1)
            .aisle()
            .aisle_priority(3)
            .shelf(1, 5, 1)
            .build();
        for (id, position) in [(10, 0), (11, 1), (12, 2)] {
            layout.place_non_tray(id, layout.positions[position]);
        }
        layout.non_tray(13, 1, 5);
        let job = layout.job(JobDetails::Refile);

        let mut session = layout.store.begin().unwrap();
        for id in [10, 11, 12, 13] {
            session
                .add_job_member(JobKind::Refile, job, JobMember::Container(ContainerRef::non_tray(id)))
                .unwrap();
        }
        session.commit().unwrap();

        let session = layout.store.begin().unwrap();
        let ordered = sort_for_retrieval(&session, RetrievalSource::RefileJob(job)).unwrap();
        let members: Vec<_> = ordered.iter().map(|e| e.member).collect();
        assert_eq!(
            members,
            vec![
                RetrievalMember::Container(ContainerRef::non_tray(11)),
                RetrievalMember::Container(ContainerRef::non_tray(10)),
                RetrievalMember::Container(ContainerRef::non_tray(12)),
                RetrievalMember::Container(ContainerRef::non_tray(13)),
            ]
        );
        assert!(ordered[0].address.is_some());
        assert!(!ordered[3].is_placed());
    }

    #[test]
    fn test_items_resolve_through_their_tray() {
        let layout = LayoutBuilder::new().shelf(1, 5, 1).build();
        layout.place_tray(10, layout.positions[0]);
        layout.item(20, Some(10));
        let job = layout.job(JobDetails::PickList { building_id: None });

        let mut session = layout.store.begin().unwrap();
        session
            .add_job_member(JobKind::PickList, job, JobMember::Item(ItemId(20)))
            .unwrap();
        let ordered = sort_for_retrieval(&session, RetrievalSource::PickList(job)).unwrap();
        assert_eq!(ordered[0].shelf_position_id, Some(layout.positions[0]));
    }

    #[test]
    fn test_refile_queue_building_filter_drops_other_and_unplaced() {
        let layout = LayoutBuilder::new().shelf(1, 5, 2).build();
        layout.place_non_tray(10, layout.positions[0]);
        layout.non_tray(11, 1, 5);
        layout
            .store
            .edit(|t| {
                for id in [10, 11] {
                    if let Some(c) = t.non_trays.get_mut(&ContainerId(id)) {
                        c.scanned_for_refile_queue = true;
                    }
                }
            })
            .unwrap();

        let session = layout.store.begin().unwrap();
        let all = sort_for_retrieval(&session, RetrievalSource::RefileQueue { building: None }).unwrap();
        assert_eq!(all.len(), 2);

        let here = sort_for_retrieval(
            &session,
            RetrievalSource::RefileQueue {
                building: Some(layout.building),
            },
        )
        .unwrap();
        assert_eq!(here.len(), 1);

        let elsewhere = sort_for_retrieval(
            &session,
            RetrievalSource::RefileQueue {
                building: Some(BuildingId(9999)),
            },
        )
        .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let layout = LayoutBuilder::new().build();
        let session = layout.store.begin().unwrap();
        let err = sort_for_retrieval(&session, RetrievalSource::RefileJob(JobId(42))).unwrap_err();
        assert_eq!(err, InventoryError::NotFound("Refile Job ID 42 Not Found".into()));
    }
}
