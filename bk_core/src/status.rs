use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle state. See the state machine transition table for which
/// moves are legal; this type only carries the stable names, not the rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Reserved,
    Running,
    Retrying,
    Completed,
    Failed,
    Dead,
    Cancelled,
}

impl JobStatus {
    /// The stable API name for this status. Never rename these.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Reserved => "RESERVED",
            JobStatus::Running => "RUNNING",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Dead => "DEAD",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether a job in this status can undergo no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Dead | JobStatus::Cancelled
        )
    }

    /// Whether a worker id and reservation deadline must be set for a job
    /// in this status (data model invariant (4)/(5)).
    pub fn holds_reservation(self) -> bool {
        matches!(self, JobStatus::Reserved | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "RESERVED" => Ok(JobStatus::Reserved),
            "RUNNING" => Ok(JobStatus::Running),
            "RETRYING" => Ok(JobStatus::Retrying),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "DEAD" => Ok(JobStatus::Dead),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(crate::Error::Validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}
