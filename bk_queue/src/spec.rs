//! The producer-facing shape handed to `Queue::enqueue`.

use bk_core::{ArgBundle, Priority, RetryPolicy};
use chrono::{DateTime, Utc};

/// Everything a producer may specify about a job; any field left `None`
/// falls back to the resolved task's `TaskConfig` default.
#[derive(Debug, Clone, Default)]
pub struct EnqueueSpec {
    pub task_name: String,
    pub task_version: Option<String>,
    pub args: ArgBundle,
    pub queue_name: Option<String>,
    pub priority: Option<Priority>,
    pub available_at: Option<DateTime<Utc>>,
    pub max_attempts: Option<u32>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_seconds: Option<u64>,
    pub unique_key: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub scheduled_by_id: Option<String>,
}

impl EnqueueSpec {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: ArgBundle) -> Self {
        self.args = args;
        self
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_scheduled_by(mut self, schedule_id: impl Into<String>) -> Self {
        self.scheduled_by_id = Some(schedule_id.into());
        self
    }
}
