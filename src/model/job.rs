//! Jobs and their status vocabulary

use super::ids::*;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobKind {
    Accession,
    Verification,
    Shelving,
    Refile,
    Withdraw,
    PickList,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::Accession,
        JobKind::Verification,
        JobKind::Shelving,
        JobKind::Refile,
        JobKind::Withdraw,
        JobKind::PickList,
    ];

    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            JobKind::Accession => "accession_jobs",
            JobKind::Verification => "verification_jobs",
            JobKind::Shelving => "shelving_jobs",
            JobKind::Refile => "refile_jobs",
            JobKind::Withdraw => "withdraw_jobs",
            JobKind::PickList => "pick_lists",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            JobKind::Accession => "Accession Job",
            JobKind::Verification => "Verification Job",
            JobKind::Shelving => "Shelving Job",
            JobKind::Refile => "Refile Job",
            JobKind::Withdraw => "Withdraw Job",
            JobKind::PickList => "Pick List",
        }
    }

    /// Whether `status` belongs to this job type's status enum
    #[must_use]
    pub fn allows(self, status: JobStatus) -> bool {
        match status {
            JobStatus::Created | JobStatus::Paused | JobStatus::Running | JobStatus::Completed => true,
            JobStatus::Cancelled => matches!(self, JobKind::Accession | JobKind::Shelving | JobKind::Withdraw),
            JobStatus::Verified => matches!(self, JobKind::Accession | JobKind::Withdraw),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Paused,
    Running,
    Completed,
    Cancelled,
    Verified,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "Created",
            JobStatus::Paused => "Paused",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Verified => "Verified",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Created" => Some(JobStatus::Created),
            "Paused" => Some(JobStatus::Paused),
            "Running" => Some(JobStatus::Running),
            "Completed" => Some(JobStatus::Completed),
            "Cancelled" => Some(JobStatus::Cancelled),
            "Verified" => Some(JobStatus::Verified),
            _ => None,
        }
    }

    /// Completed and Cancelled jobs accept no further status changes
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a shelving job's containers come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShelvingOrigin {
    Verification,
    Direct,
}

impl ShelvingOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ShelvingOrigin::Verification => "Verification",
            ShelvingOrigin::Direct => "Direct",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Verification" => Some(ShelvingOrigin::Verification),
            "Direct" => Some(ShelvingOrigin::Direct),
            _ => None,
        }
    }
}

/// Per-type job columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDetails {
    Accession {
        trayed: bool,
        owner_id: Option<OwnerId>,
        size_class_id: Option<SizeClassId>,
    },
    Verification {
        accession_job_id: Option<JobId>,
        shelving_job_id: Option<JobId>,
        trayed: bool,
        owner_id: Option<OwnerId>,
        size_class_id: Option<SizeClassId>,
    },
    Shelving {
        origin: ShelvingOrigin,
        building_id: Option<BuildingId>,
    },
    Refile,
    Withdraw,
    PickList {
        building_id: Option<BuildingId>,
    },
}

impl JobDetails {
    #[must_use]
    pub fn kind(&self) -> JobKind {
        match self {
            JobDetails::Accession { .. } => JobKind::Accession,
            JobDetails::Verification { .. } => JobKind::Verification,
            JobDetails::Shelving { .. } => JobKind::Shelving,
            JobDetails::Refile => JobKind::Refile,
            JobDetails::Withdraw => JobKind::Withdraw,
            JobDetails::PickList { .. } => JobKind::PickList,
        }
    }
}

/// A job row. `run_time` accumulates across status transitions, see [`crate::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub user_id: Option<UserId>,
    pub created_by_id: Option<UserId>,
    pub create_dt: DateTime<Utc>,
    pub update_dt: DateTime<Utc>,
    pub last_transition: Option<DateTime<Utc>>,
    pub run_time: TimeDelta,
    pub details: JobDetails,
}

impl Job {
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.details.kind()
    }

    /// Owner recorded on an accession or verification job
    #[must_use]
    pub fn owner_id(&self) -> Option<OwnerId> {
        match &self.details {
            JobDetails::Accession { owner_id, .. } | JobDetails::Verification { owner_id, .. } => *owner_id,
            _ => None,
        }
    }
}

/// A job that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDraft {
    pub details: JobDetails,
    pub user_id: Option<UserId>,
    pub created_by_id: Option<UserId>,
    pub create_dt: DateTime<Utc>,
}

impl JobDraft {
    #[must_use]
    pub fn new(details: JobDetails, user_id: Option<UserId>, create_dt: DateTime<Utc>) -> Self {
        Self {
            details,
            user_id,
            created_by_id: user_id,
            create_dt,
        }
    }

    /// The row as it looks once stored under `id`, in `Created` status
    #[must_use]
    pub fn into_job(self, id: JobId) -> Job {
        Job {
            id,
            status: JobStatus::Created,
            user_id: self.user_id,
            created_by_id: self.created_by_id,
            create_dt: self.create_dt,
            update_dt: self.create_dt,
            last_transition: None,
            run_time: TimeDelta::zero(),
            details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_vocabulary_per_job_type() {
        assert!(JobKind::Shelving.allows(JobStatus::Cancelled));
        assert!(!JobKind::Verification.allows(JobStatus::Cancelled));
        assert!(!JobKind::Refile.allows(JobStatus::Cancelled));
        assert!(!JobKind::PickList.allows(JobStatus::Cancelled));
        assert!(JobKind::Withdraw.allows(JobStatus::Verified));
        assert!(!JobKind::Shelving.allows(JobStatus::Verified));
        for kind in JobKind::ALL {
            assert!(kind.allows(JobStatus::Running));
            assert!(kind.allows(JobStatus::Completed));
        }
    }

    #[test]
    fn test_draft_starts_created_with_zero_run_time() {
        let now = Utc::now();
        let job = JobDraft::new(JobDetails::Refile, Some(UserId(3)), now).into_job(JobId(9));
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.run_time, TimeDelta::zero());
        assert_eq!(job.last_transition, None);
        assert_eq!(job.kind(), JobKind::Refile);
    }
}
