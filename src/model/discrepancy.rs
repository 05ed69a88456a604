use super::container::ContainerRef;
use super::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What was wrong with a shelving scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyKind {
    Owner,
    Size,
    Location,
}

impl DiscrepancyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DiscrepancyKind::Owner => "Owner",
            DiscrepancyKind::Size => "Size",
            DiscrepancyKind::Location => "Location",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Owner" => Some(DiscrepancyKind::Owner),
            "Size" => Some(DiscrepancyKind::Size),
            "Location" => Some(DiscrepancyKind::Location),
            _ => None,
        }
    }
}

/// A discrepancy to record; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDiscrepancy {
    pub shelving_job_id: JobId,
    pub container: ContainerRef,
    pub kind: DiscrepancyKind,
    pub user_id: Option<UserId>,
    pub owner_id: Option<OwnerId>,
    pub size_class_id: Option<SizeClassId>,
    pub assigned_location: Option<String>,
    pub pre_assigned_location: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelvingDiscrepancy {
    pub id: DiscrepancyId,
    pub shelving_job_id: JobId,
    pub container: ContainerRef,
    pub kind: DiscrepancyKind,
    pub user_id: Option<UserId>,
    pub owner_id: Option<OwnerId>,
    pub size_class_id: Option<SizeClassId>,
    pub assigned_location: Option<String>,
    pub pre_assigned_location: Option<String>,
    pub error: String,
    pub create_dt: DateTime<Utc>,
}

impl ShelvingDiscrepancy {
    #[must_use]
    pub fn from_new(id: DiscrepancyId, new: NewDiscrepancy, create_dt: DateTime<Utc>) -> Self {
        Self {
            id,
            shelving_job_id: new.shelving_job_id,
            container: new.container,
            kind: new.kind,
            user_id: new.user_id,
            owner_id: new.owner_id,
            size_class_id: new.size_class_id,
            assigned_location: new.assigned_location,
            pre_assigned_location: new.pre_assigned_location,
            error: new.error,
            create_dt,
        }
    }
}
