//! Query and mutation shapes passed to a `Storage` implementation.

use bk_core::JobStatus;
use chrono::{DateTime, Utc};

/// Filter for `Storage::find_jobs` / `JobManager::list_jobs`. Every field is
/// optional; an absent field means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub queue_name: Option<String>,
    pub statuses: Option<Vec<JobStatus>>,
    pub task_name: Option<String>,
    pub tag: Option<String>,
    pub scheduled_by_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Fields a conditional job update may change. `None` means "leave
/// unchanged"; this mirrors the teacher's `UpdateJobRequest` convention.
/// Clearing `worker_id` / `reservation_deadline` (on release) is expressed
/// with the dedicated `clear_reservation` flag rather than a nested Option,
/// since those two fields are always cleared together.
#[derive(Debug, Clone, Default)]
pub struct JobMutation {
    pub new_status: Option<JobStatus>,
    pub worker_id: Option<String>,
    pub clear_reservation: bool,
    pub reservation_deadline: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub attempt: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub error_detail: Option<serde_json::Value>,
    pub dead_letter: Option<bool>,
    pub cancel_requested: Option<bool>,
}

impl JobMutation {
    pub fn to_status(status: JobStatus) -> Self {
        Self {
            new_status: Some(status),
            ..Default::default()
        }
    }
}
