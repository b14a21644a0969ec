//! The producer-facing shape handed to `Scheduler::create_schedule`,
//! mirroring `bk_queue::EnqueueSpec`'s builder convention.

use crate::kind::ScheduleKind;
use bk_core::{ArgBundle, Priority};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    pub name: String,
    pub task_name: String,
    pub task_version: Option<String>,
    pub queue_name: String,
    pub priority: Priority,
    pub kind: ScheduleKind,
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
    pub args: ArgBundle,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub tags: Vec<String>,
}

impl ScheduleSpec {
    pub fn new(name: impl Into<String>, task_name: impl Into<String>, kind: ScheduleKind) -> Self {
        Self {
            name: name.into(),
            task_name: task_name.into(),
            task_version: None,
            queue_name: "default".to_string(),
            priority: Priority::default(),
            kind,
            cron_expression: None,
            interval_seconds: None,
            anchor_at: None,
            times_of_day: Vec::new(),
            days_of_week: Vec::new(),
            days_of_month: Vec::new(),
            event_topic: None,
            timezone: "UTC".to_string(),
            start_at: None,
            end_at: None,
            enabled: true,
            unique_instance: false,
            args: ArgBundle::new(),
            metadata: serde_json::Map::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_args(mut self, args: ArgBundle) -> Self {
        self.args = args;
        self
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn with_interval_seconds(mut self, seconds: i64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    pub fn with_anchor_at(mut self, at: DateTime<Utc>) -> Self {
        self.anchor_at = Some(at);
        self
    }

    pub fn with_time_of_day(mut self, time: impl Into<String>) -> Self {
        self.times_of_day.push(time.into());
        self
    }

    pub fn with_day_of_week(mut self, day: u8) -> Self {
        self.days_of_week.push(day);
        self
    }

    pub fn with_day_of_month(mut self, day: u8) -> Self {
        self.days_of_month.push(day);
        self
    }

    pub fn with_event_topic(mut self, topic: impl Into<String>) -> Self {
        self.event_topic = Some(topic.into());
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    pub fn with_start_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_at = Some(at);
        self
    }

    pub fn with_end_at(mut self, at: DateTime<Utc>) -> Self {
        self.end_at = Some(at);
        self
    }

    pub fn with_unique_instance(mut self, unique: bool) -> Self {
        self.unique_instance = unique;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
