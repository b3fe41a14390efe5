//! Job lifecycle status and the transition rules every writer must respect.
//!
//! The only legal path is `PENDING -> RUNNING -> {SUCCEEDED, FAILED, CANCELLED}`.
//! Terminal statuses are write-once.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Statuses from which no further transition is permitted.
pub const TERMINAL_STATUSES: [JobStatus; 3] = [
    JobStatus::Succeeded,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

impl JobStatus {
    /// Name as persisted in the `jobs.status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    /// The statuses a record must currently hold for a move to `self` to be legal.
    ///
    /// `PENDING` has no predecessor: it is only ever set by insertion.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Running => &[JobStatus::Pending],
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => {
                &[JobStatus::Running]
            }
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessors().contains(&self)
    }

    /// Whether a `result` value may accompany a move to this status.
    pub fn carries_result(self) -> bool {
        self == JobStatus::Succeeded
    }

    /// Whether an `error` message may accompany a move to this status.
    pub fn carries_error(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
