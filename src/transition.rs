//! Job transition tracker
//!
//! `run_time` is total wall-clock time between checkpoints: every status
//! change that carries a client timestamp adds the time elapsed since the
//! previous checkpoint (or since creation), whether the job is being paused,
//! resumed or finished. Time spent paused is therefore counted too.
//!
//! Applying the same update twice counts the interval twice; the operation is
//! not idempotent.

use crate::model::{Job, JobStatus, UserId};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Wall-clock time supplied by a client; naive values are taken as UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientTimestamp(pub DateTime<Utc>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampParseError(String);

impl fmt::Display for TimestampParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid timestamp: {}", self.0)
    }
}

impl std::error::Error for TimestampParseError {}

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

impl FromStr for ClientTimestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(aware) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self(aware.with_timezone(&Utc)));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
            .map(|naive| Self(naive.and_utc()))
            .ok_or_else(|| TimestampParseError(s.to_string()))
    }
}

impl From<DateTime<Utc>> for ClientTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for ClientTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The fields of a job PATCH the core cares about
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub run_timestamp: Option<ClientTimestamp>,
    pub user_id: Option<UserId>,
}

impl JobUpdate {
    #[must_use]
    pub fn status(status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            run_timestamp: Some(ClientTimestamp(at)),
            user_id: None,
        }
    }
}

/// Accumulate run time for `update` into `job`
///
/// Does nothing unless the update carries both a status and a run timestamp.
/// Otherwise adds `run_timestamp - last_transition` (or `- create_dt` on the
/// first transition) to `run_time`, sets `last_transition`, and returns the
/// interval added. Only the timing fields are touched; the caller sets the
/// status and persists.
pub fn apply_transition(job: &mut Job, update: &JobUpdate) -> Option<TimeDelta> {
    let (Some(_), Some(ClientTimestamp(at))) = (update.status, update.run_timestamp) else {
        return None;
    };

    let since = job.last_transition.unwrap_or(job.create_dt);
    let elapsed = at - since;
    if elapsed < TimeDelta::zero() {
        log::warn!(
            "{} {} transition at {} precedes its previous checkpoint {}; accumulating {}s",
            job.kind(),
            job.id,
            at,
            since,
            elapsed.num_seconds()
        );
    }

    job.run_time += elapsed;
    job.last_transition = Some(at);
    Some(elapsed)
}
