//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Layered settings for the queue, worker runtime, scheduler, and job manager

use bk_core::{Error, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level configuration for a job manager process.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub queue: QueueConfig,
    #[validate(nested)]
    pub worker: WorkerConfig,
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    #[validate(nested)]
    pub manager: ManagerConfig,
}

/// Queue-level defaults: reaper cadence and the retry policy new tasks
/// inherit unless a `TaskEntry` overrides it.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct QueueConfig {
    #[validate(range(min = 1, max = 3600))]
    pub reaper_interval_seconds: u64,
    #[validate(range(min = 1))]
    pub default_max_attempts: u32,
    #[validate(range(min = 1))]
    pub default_retry_delay_seconds: u64,
    #[validate(range(min = 1.0))]
    pub default_backoff_factor: f64,
    pub default_jitter: bool,
    #[validate(range(min = 1))]
    pub retry_delay_ceiling_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            reaper_interval_seconds: 30,
            default_max_attempts: 3,
            default_retry_delay_seconds: 1,
            default_backoff_factor: 2.0,
            default_jitter: true,
            retry_delay_ceiling_seconds: 3600,
        }
    }
}

/// Worker runtime defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct WorkerConfig {
    #[validate(range(min = 1, max = 10_000))]
    pub capacity: usize,
    #[validate(range(min = 1, max = 300))]
    pub poll_interval_ms: u64,
    #[validate(range(min = 1, max = 300))]
    pub poll_jitter_ms: u64,
    #[validate(range(min = 1))]
    pub heartbeat_interval_seconds: u64,
    #[validate(range(min = 1))]
    pub liveness_threshold_seconds: u64,
    #[validate(range(min = 1))]
    pub default_lease_seconds: u64,
    #[validate(range(min = 1))]
    pub default_timeout_seconds: u64,
    pub enable_prefetch: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            poll_interval_ms: 250,
            poll_jitter_ms: 50,
            heartbeat_interval_seconds: 15,
            liveness_threshold_seconds: 60,
            default_lease_seconds: 60,
            default_timeout_seconds: 300,
            enable_prefetch: false,
        }
    }
}

/// How the scheduler handles schedules whose `next_fire_at` is more than
/// `missed_threshold_seconds` in the past when it finally gets to tick them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissedSchedulePolicy {
    /// Drop the missed window entirely and resume from the next boundary after now.
    #[default]
    Skip,
    /// Fire exactly one catch-up job for the missed window, then resume normally.
    TriggerOnce,
    /// Fire one job per missed boundary, capped at `max_missed`.
    TriggerAll,
}

/// Scheduler tick and missed-fire handling defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SchedulerConfig {
    #[validate(range(min = 1, max = 3600))]
    pub check_interval_seconds: u64,
    #[validate(range(min = 1))]
    pub lock_lease_seconds: i64,
    #[validate(range(min = 1))]
    pub missed_threshold_seconds: i64,
    #[validate(range(min = 1, max = 10_000))]
    pub max_missed: u32,
    pub missed_schedule_policy: MissedSchedulePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            lock_lease_seconds: 300,
            missed_threshold_seconds: 120,
            max_missed: 10,
            missed_schedule_policy: MissedSchedulePolicy::Skip,
        }
    }
}

/// Job manager-wide defaults: shutdown sequencing.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ManagerConfig {
    #[validate(range(min = 1, max = 3600))]
    pub shutdown_deadline_seconds: u64,
    #[validate(range(min = 1, max = 3600))]
    pub metrics_sync_interval_seconds: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            shutdown_deadline_seconds: 30,
            metrics_sync_interval_seconds: 10,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional `config.toml`, and
    /// `BK_`-prefixed environment variables, in that order of precedence.
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("queue.reaper_interval_seconds", 30)?
            .set_default("queue.default_max_attempts", 3)?
            .set_default("queue.default_retry_delay_seconds", 1)?
            .set_default("queue.default_backoff_factor", 2.0)?
            .set_default("queue.default_jitter", true)?
            .set_default("queue.retry_delay_ceiling_seconds", 3600)?
            .set_default("worker.capacity", 10)?
            .set_default("worker.poll_interval_ms", 250)?
            .set_default("worker.poll_jitter_ms", 50)?
            .set_default("worker.heartbeat_interval_seconds", 15)?
            .set_default("worker.liveness_threshold_seconds", 60)?
            .set_default("worker.default_lease_seconds", 60)?
            .set_default("worker.default_timeout_seconds", 300)?
            .set_default("worker.enable_prefetch", false)?
            .set_default("scheduler.check_interval_seconds", 60)?
            .set_default("scheduler.lock_lease_seconds", 300)?
            .set_default("scheduler.missed_threshold_seconds", 120)?
            .set_default("scheduler.max_missed", 10)?
            .set_default("scheduler.missed_schedule_policy", "SKIP")?
            .set_default("manager.shutdown_deadline_seconds", 30)?
            .set_default("manager.metrics_sync_interval_seconds", 10)?;

        builder = builder.add_source(File::with_name("config").required(false));
        builder = builder.add_source(
            Environment::with_prefix("BK")
                .try_parsing(true)
                .separator("_"),
        );

        let built = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build config: {e}")))?;

        let parsed: Config = built
            .try_deserialize()
            .map_err(|e| Error::Config(format!("failed to deserialize config: {e}")))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("config validation failed: {e}")))?;

        Ok(parsed)
    }
}
