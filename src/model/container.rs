//! Containers (trays and non-tray items) and the items they hold

use super::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two physical container variants that occupy shelf positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerKind {
    Tray,
    #[serde(rename = "Non-Tray")]
    NonTray,
}

impl ContainerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Tray => "Tray",
            ContainerKind::NonTray => "Non-Tray",
        }
    }

    /// Table holding rows of this kind
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            ContainerKind::Tray => "trays",
            ContainerKind::NonTray => "non_tray_items",
        }
    }

    #[must_use]
    pub fn from_trayed(trayed: bool) -> Self {
        if trayed {
            ContainerKind::Tray
        } else {
            ContainerKind::NonTray
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a container across both tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerRef {
    pub kind: ContainerKind,
    pub id: ContainerId,
}

impl ContainerRef {
    #[must_use]
    pub fn tray(id: i64) -> Self {
        Self {
            kind: ContainerKind::Tray,
            id: ContainerId(id),
        }
    }

    #[must_use]
    pub fn non_tray(id: i64) -> Self {
        Self {
            kind: ContainerKind::NonTray,
            id: ContainerId(id),
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Circulation status of items and containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    In,
    Out,
    Requested,
    PickList,
    Withdrawn,
}

impl ItemStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::In => "In",
            ItemStatus::Out => "Out",
            ItemStatus::Requested => "Requested",
            ItemStatus::PickList => "PickList",
            ItemStatus::Withdrawn => "Withdrawn",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "In" => Some(ItemStatus::In),
            "Out" => Some(ItemStatus::Out),
            "Requested" => Some(ItemStatus::Requested),
            "PickList" => Some(ItemStatus::PickList),
            "Withdrawn" => Some(ItemStatus::Withdrawn),
            _ => None,
        }
    }
}

/// A tray or non-tray item: the unit that occupies a shelf position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,
    pub barcode_id: Option<BarcodeId>,
    pub withdrawn_barcode_id: Option<BarcodeId>,
    pub owner_id: Option<OwnerId>,
    pub size_class_id: Option<SizeClassId>,
    /// Where the container actually is
    pub shelf_position_id: Option<ShelfPositionId>,
    /// Where the allocator told the shelver to put it
    pub shelf_position_proposed_id: Option<ShelfPositionId>,
    pub scanned_for_shelving: bool,
    pub scanned_for_refile_queue: bool,
    pub accession_job_id: Option<JobId>,
    pub verification_job_id: Option<JobId>,
    pub shelving_job_id: Option<JobId>,
    pub status: ItemStatus,
    pub shelved_dt: Option<DateTime<Utc>>,
    pub withdrawal_dt: Option<DateTime<Utc>>,
}

impl Container {
    /// A fresh, unplaced container
    #[must_use]
    pub fn new(kind: ContainerKind, id: ContainerId) -> Self {
        Self {
            id,
            kind,
            barcode_id: None,
            withdrawn_barcode_id: None,
            owner_id: None,
            size_class_id: None,
            shelf_position_id: None,
            shelf_position_proposed_id: None,
            scanned_for_shelving: false,
            scanned_for_refile_queue: false,
            accession_job_id: None,
            verification_job_id: None,
            shelving_job_id: None,
            status: ItemStatus::In,
            shelved_dt: None,
            withdrawal_dt: None,
        }
    }

    #[must_use]
    pub fn reference(&self) -> ContainerRef {
        ContainerRef {
            kind: self.kind,
            id: self.id,
        }
    }

    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.shelf_position_id.is_some()
    }
}

/// An item stored inside a tray
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub tray_id: Option<ContainerId>,
    pub barcode_id: Option<BarcodeId>,
    pub withdrawn_barcode_id: Option<BarcodeId>,
    pub owner_id: Option<OwnerId>,
    pub size_class_id: Option<SizeClassId>,
    pub accession_job_id: Option<JobId>,
    pub verification_job_id: Option<JobId>,
    pub scanned_for_refile_queue: bool,
    pub status: ItemStatus,
    pub withdrawal_dt: Option<DateTime<Utc>>,
}

impl Item {
    #[must_use]
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            tray_id: None,
            barcode_id: None,
            withdrawn_barcode_id: None,
            owner_id: None,
            size_class_id: None,
            accession_job_id: None,
            verification_job_id: None,
            scanned_for_refile_queue: false,
            status: ItemStatus::In,
            withdrawal_dt: None,
        }
    }
}
