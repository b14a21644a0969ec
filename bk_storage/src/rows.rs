//! Wire-level row types persisted by a storage backend.
//!
//! These are intentionally flatter than the domain types `bk_queue` and
//! `bk_scheduler` work with: timestamps are `DateTime<Utc>`, status and
//! priority are their stable string forms, and argument/metadata bundles
//! are opaque `serde_json::Value`s. A driver only needs to round-trip these
//! shapes; it never sees the richer domain structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub task_name: String,
    pub task_version: Option<String>,
    pub queue_name: String,
    pub priority: String,
    pub status: String,
    pub args_positional: serde_json::Value,
    pub args_kwargs: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: i64,
    pub max_attempts: i64,
    pub retry_delay_base_seconds: i64,
    pub retry_backoff_factor: f64,
    pub retry_jitter: bool,
    pub retry_delay_ceiling_seconds: i64,
    pub timeout_seconds: Option<i64>,
    pub unique_key: Option<String>,
    pub worker_id: Option<String>,
    pub reservation_deadline: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub error_detail: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
    pub dead_letter: bool,
    pub scheduled_by_id: Option<String>,
    pub cancel_requested: bool,
}

/// A named queue's administrative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    pub name: String,
    pub paused: bool,
    pub dead_letter_target: Option<String>,
}

/// A persisted schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: String,
    pub name: String,
    pub task_name: String,
    pub task_version: Option<String>,
    pub queue_name: String,
    pub priority: String,
    pub kind: String,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub anchor_at: Option<DateTime<Utc>>,
    pub times_of_day: Vec<String>,
    pub days_of_week: Vec<u8>,
    pub days_of_month: Vec<u8>,
    pub event_topic: Option<String>,
    pub timezone: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub unique_instance: bool,
    pub args_positional: serde_json::Value,
    pub args_kwargs: serde_json::Value,
    pub metadata: serde_json::Value,
    pub tags: Vec<String>,
    pub last_fire_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub skipped_count: i64,
    pub lock_holder_id: Option<String>,
    pub lock_deadline: Option<DateTime<Utc>>,
    pub version: i64,
}

/// A registered worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistrationRow {
    pub worker_id: String,
    pub host: String,
    pub queue_names: Vec<String>,
    pub priority_filter: Vec<String>,
    pub capacity: i64,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub current_job_ids: Vec<String>,
    pub jobs_processed: i64,
    pub jobs_failed: i64,
}

/// A named distributed lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRow {
    pub name: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Aggregate counts for a single queue, keyed by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatsRow {
    pub queue_name: String,
    pub pending: i64,
    pub reserved: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
    pub cancelled: i64,
}

impl QueueStatsRow {
    pub fn total(&self) -> i64 {
        self.pending
            + self.reserved
            + self.running
            + self.retrying
            + self.completed
            + self.failed
            + self.dead
            + self.cancelled
    }
}

/// Overall storage backend health, used by `JobManager::health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    pub reachable: bool,
    pub message: Option<String>,
}
