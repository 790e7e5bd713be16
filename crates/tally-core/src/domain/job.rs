//! Job status management.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{Choice, JobId};

/// Job status as stored in `jobs.status`.
///
/// State transitions (forward only):
/// - Queued -> Processing -> Completed
///
/// `Queued` is written by the producer; the worker only moves a job forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker (the producer may also write this as `pending`).
    #[serde(alias = "pending")]
    Queued,

    /// Picked up by a worker; the vote is not counted yet.
    Processing,

    /// The vote is counted.
    Completed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
        }
    }

    /// Can a job in `self` be moved to `next` without going backwards?
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next.rank() >= self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" | "pending" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A `jobs` row, as listed by the results view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub choice: Choice,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}
