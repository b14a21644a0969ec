//! The domain `Job` type `Queue` operations return, and its conversions to
//! and from the storage-facing `JobRow`.

use bk_core::{ArgBundle, Error, ErrorRecord, Id, JobStatus, Priority, Result, RetryPolicy};
use bk_storage::JobRow;
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// A job as `Queue` callers see it: richer types than the wire row
/// (`Priority`, `JobStatus`, `ArgBundle`) in place of the row's plain
/// strings and split JSON values.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Id,
    pub task_name: String,
    pub task_version: Option<String>,
    pub queue_name: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub args: ArgBundle,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub retry_policy: RetryPolicy,
    pub timeout_seconds: Option<u64>,
    pub unique_key: Option<String>,
    pub worker_id: Option<String>,
    pub reservation_deadline: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<ErrorRecord>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<String>,
    pub dead_letter: bool,
    pub scheduled_by_id: Option<String>,
    pub cancel_requested: bool,
}

impl Job {
    pub fn from_row(row: JobRow) -> Result<Self> {
        let priority = Priority::from_str(&row.priority)?;
        let status = JobStatus::from_str(&row.status)?;
        let metadata = match row.metadata {
            serde_json::Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        let error = match (row.error_kind, row.error_message) {
            (Some(kind), Some(message)) => Some(ErrorRecord {
                kind,
                message,
                detail: row.error_detail,
            }),
            _ => None,
        };
        Ok(Self {
            id: Id::from_str(&row.id).map_err(|e| Error::Fatal(format!("malformed job id: {e}")))?,
            task_name: row.task_name,
            task_version: row.task_version,
            queue_name: row.queue_name,
            priority,
            status,
            args: ArgBundle::from_row_values(row.args_positional, row.args_kwargs),
            created_at: row.created_at,
            available_at: row.available_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            attempt: row.attempt.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            retry_policy: RetryPolicy {
                max_attempts: row.max_attempts.max(0) as u32,
                delay_base_seconds: row.retry_delay_base_seconds.max(0) as u64,
                backoff_factor: row.retry_backoff_factor,
                jitter: row.retry_jitter,
                delay_ceiling_seconds: row.retry_delay_ceiling_seconds.max(0) as u64,
            },
            timeout_seconds: row.timeout_seconds.map(|t| t.max(0) as u64),
            unique_key: row.unique_key,
            worker_id: row.worker_id,
            reservation_deadline: row.reservation_deadline,
            result: row.result,
            error,
            metadata,
            tags: row.tags,
            dead_letter: row.dead_letter,
            scheduled_by_id: row.scheduled_by_id,
            cancel_requested: row.cancel_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> JobRow {
        let now = Utc::now();
        JobRow {
            id: Id::new().to_string(),
            task_name: "send_email".into(),
            task_version: None,
            queue_name: "default".into(),
            priority: Priority::Normal.as_str().into(),
            status: JobStatus::Pending.as_str().into(),
            args_positional: serde_json::json!([]),
            args_kwargs: serde_json::json!({}),
            created_at: now,
            available_at: now,
            started_at: None,
            completed_at: None,
            attempt: 0,
            max_attempts: 3,
            retry_delay_base_seconds: 1,
            retry_backoff_factor: 2.0,
            retry_jitter: true,
            retry_delay_ceiling_seconds: 3600,
            timeout_seconds: Some(30),
            unique_key: None,
            worker_id: None,
            reservation_deadline: None,
            result: None,
            error_kind: None,
            error_message: None,
            error_detail: None,
            metadata: serde_json::json!({}),
            tags: vec![],
            dead_letter: false,
            scheduled_by_id: None,
            cancel_requested: false,
        }
    }

    #[test]
    fn from_row_parses_stable_string_fields() {
        let job = Job::from_row(sample_row()).unwrap();
        assert_eq!(job.priority, Priority::Normal);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn from_row_rejects_unparsable_status() {
        let mut row = sample_row();
        row.status = "BOGUS".into();
        assert!(Job::from_row(row).is_err());
    }

    #[test]
    fn from_row_carries_error_record_only_when_both_parts_present() {
        let mut row = sample_row();
        row.error_kind = Some("TaskExecution".into());
        row.error_message = Some("boom".into());
        let job = Job::from_row(row).unwrap();
        assert_eq!(job.error.unwrap().kind, "TaskExecution");
    }
}
