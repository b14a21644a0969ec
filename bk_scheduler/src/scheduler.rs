//! The tick loop that materializes jobs from recurring schedules.
//!
//! Grounded in `gl_scheduler::lib::JobScheduler::execute_now`'s acquire-lock,
//! resolve, dispatch, release pattern, generalized from "run one job now"
//! to "advance every due schedule exactly once per tick, under one
//! fleet-wide lock".

use crate::distributed_lock::SchedulerLock;
use crate::kind::ScheduleKind;
use crate::schedule::Schedule;
use crate::spec::ScheduleSpec;
use bk_config::{MissedSchedulePolicy, SchedulerConfig};
use bk_core::{ArgBundle, Error, Id, JobStatus, Result};
use bk_queue::{EnqueueSpec, Queue};
use bk_storage::{InstanceId, JobFilter, ScheduleRow, Storage};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LOCK_NAME: &str = "scheduler";

/// Outcome of a single `tick_once` call, mostly useful for tests and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A peer instance currently holds the scheduler lock; this tick did
    /// nothing.
    LockHeldByPeer,
    /// This instance held the lock and examined every enabled schedule;
    /// the count is how many had `next_fire_at <= now`.
    Processed(usize),
}

/// The background task a started scheduler owns.
pub struct SchedulerHandle {
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Owns the tick loop and the schedule CRUD surface the job manager exposes
/// to admins.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    queue: Arc<Queue>,
    config: SchedulerConfig,
    instance_id: InstanceId,
    lock: SchedulerLock,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<Queue>,
        config: SchedulerConfig,
        instance_id: InstanceId,
    ) -> Arc<Self> {
        let lock = SchedulerLock::new(
            storage.clone(),
            LOCK_NAME,
            instance_id.clone(),
            config.lock_lease_seconds,
        );
        Arc::new(Self {
            storage,
            queue,
            config,
            instance_id,
            lock,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Spawn the tick loop. Takes `Arc<Self>` by value; callers that need to
    /// keep calling admin methods afterwards should `clone()` the `Arc`
    /// first.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        info!(
            instance = %self.instance_id,
            interval_seconds = self.config.check_interval_seconds,
            "scheduler starting"
        );
        let join = tokio::spawn(self.run_loop());
        SchedulerHandle { join }
    }

    /// Signal the tick loop to stop after its current tick, draining the
    /// lock before the loop exits.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.check_interval_seconds);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.tick_once().await {
                Ok(TickOutcome::Processed(n)) if n > 0 => {
                    debug!(instance = %self.instance_id, fired = n, "scheduler tick processed due schedules");
                }
                Ok(_) => {}
                Err(e) => error!(instance = %self.instance_id, error = %e, "scheduler tick failed"),
            }
        }
        if let Err(e) = self.lock.release().await {
            warn!(instance = %self.instance_id, error = %e, "failed to release scheduler lock on shutdown");
        }
        info!(instance = %self.instance_id, "scheduler stopped");
    }

    /// Run one tick synchronously: try the distributed lock, and if held,
    /// examine every enabled schedule whose `next_fire_at <= now`.
    pub async fn tick_once(&self) -> Result<TickOutcome> {
        if !self.lock.try_acquire().await? {
            return Ok(TickOutcome::LockHeldByPeer);
        }
        let now = Utc::now();
        let rows = self.storage.list_schedules(true).await?;
        let mut processed = 0usize;
        for row in rows {
            if row.next_fire_at.map_or(false, |t| t <= now) {
                self.process_due_schedule(row, now).await;
                processed += 1;
            }
        }
        Ok(TickOutcome::Processed(processed))
    }

    async fn process_due_schedule(&self, row: ScheduleRow, now: DateTime<Utc>) {
        let id = row.id.clone();
        let expected_version = row.version;
        let mut schedule = match Schedule::from_row(row) {
            Ok(s) => s,
            Err(e) => {
                error!(schedule_id = %id, error = %e, "skipping malformed schedule row");
                return;
            }
        };

        let Some(due_at) = schedule.next_fire_at else {
            return;
        };
        if due_at > now {
            return;
        }

        let overdue = now.signed_duration_since(due_at);
        let missed_threshold = chrono::Duration::seconds(self.config.missed_threshold_seconds);
        let boundaries = if overdue > missed_threshold {
            self.missed_boundaries(&schedule, due_at, now)
        } else {
            vec![due_at]
        };

        for boundary in &boundaries {
            match self.fire_boundary(&mut schedule, *boundary).await {
                Ok(true) => {}
                Ok(false) => schedule.skipped_count += 1,
                Err(e) => {
                    error!(schedule_id = %id, error = %e, "failed to enqueue scheduled job");
                    schedule.error_count += 1;
                }
            }
        }

        let from = boundaries.last().copied().unwrap_or(due_at).max(now);
        schedule.next_fire_at = match schedule.compute_next_fire(from) {
            Ok(next) => next,
            Err(e) => {
                error!(schedule_id = %id, error = %e, "failed to compute next fire time, disabling schedule");
                schedule.enabled = false;
                None
            }
        };

        match self
            .storage
            .update_schedule(&id, expected_version, schedule.to_row())
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => debug!(schedule_id = %id, "schedule changed concurrently, retrying next tick"),
            Err(e) => error!(schedule_id = %id, error = %e, "failed to persist schedule tick"),
        }
    }

    /// Expand a missed fire into the boundaries that should actually be
    /// enqueued, per the configured `MissedSchedulePolicy`.
    fn missed_boundaries(
        &self,
        schedule: &Schedule,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        match self.config.missed_schedule_policy {
            MissedSchedulePolicy::Skip => Vec::new(),
            MissedSchedulePolicy::TriggerOnce => vec![due_at],
            MissedSchedulePolicy::TriggerAll => {
                let mut boundaries = vec![due_at];
                let mut probe = schedule.clone();
                probe.last_fire_at = Some(due_at);
                let mut cursor = due_at;
                while boundaries.len() < self.config.max_missed as usize {
                    match probe.compute_next_fire(cursor) {
                        Ok(Some(next)) if next <= now => {
                            boundaries.push(next);
                            probe.last_fire_at = Some(next);
                            cursor = next;
                        }
                        _ => break,
                    }
                }
                boundaries
            }
        }
    }

    /// Enqueue one job for `schedule` at `boundary`. Returns `Ok(false)`
    /// without enqueuing if `unique_instance` is set and a non-terminal job
    /// from this schedule is already in flight.
    async fn fire_boundary(&self, schedule: &mut Schedule, boundary: DateTime<Utc>) -> Result<bool> {
        if schedule.unique_instance && self.has_active_instance(&schedule.id.to_string()).await? {
            return Ok(false);
        }

        let mut spec = EnqueueSpec::new(schedule.task_name.clone())
            .with_args(schedule.args.clone())
            .with_queue(schedule.queue_name.clone())
            .with_priority(schedule.priority)
            .with_scheduled_by(schedule.id.to_string());
        spec.task_version = schedule.task_version.clone();
        spec.tags = schedule.tags.clone();
        spec.metadata = schedule.metadata.clone();

        self.queue.enqueue(spec).await?;
        schedule.run_count += 1;
        schedule.success_count += 1;
        schedule.last_fire_at = Some(boundary);
        Ok(true)
    }

    async fn has_active_instance(&self, schedule_id: &str) -> Result<bool> {
        let filter = JobFilter {
            scheduled_by_id: Some(schedule_id.to_string()),
            statuses: Some(vec![
                JobStatus::Pending,
                JobStatus::Reserved,
                JobStatus::Running,
                JobStatus::Retrying,
            ]),
            ..Default::default()
        };
        Ok(!self.queue.list(filter).await?.is_empty())
    }

    fn validate_spec(spec: &ScheduleSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(Error::Validation("schedule name is required".into()));
        }
        if spec.task_name.trim().is_empty() {
            return Err(Error::Validation("task_name is required".into()));
        }
        spec.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| Error::Validation(format!("invalid timezone '{}': {e}", spec.timezone)))?;
        match spec.kind {
            ScheduleKind::Cron => {
                let expr = spec
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| Error::Validation("CRON schedule requires cron_expression".into()))?;
                cron::Schedule::from_str(&format!("0 {expr}"))
                    .map_err(|e| Error::Validation(format!("invalid cron expression '{expr}': {e}")))?;
            }
            ScheduleKind::Interval => {
                if spec.interval_seconds.map_or(true, |s| s <= 0) {
                    return Err(Error::Validation(
                        "INTERVAL schedule requires a positive interval_seconds".into(),
                    ));
                }
            }
            ScheduleKind::OneShot => {
                if spec.anchor_at.is_none() {
                    return Err(Error::Validation("ONE_SHOT schedule requires anchor_at".into()));
                }
            }
            ScheduleKind::Daily => {
                if spec.times_of_day.is_empty() {
                    return Err(Error::Validation("DAILY schedule requires times_of_day".into()));
                }
            }
            ScheduleKind::Weekly => {
                if spec.times_of_day.is_empty() || spec.days_of_week.is_empty() {
                    return Err(Error::Validation(
                        "WEEKLY schedule requires times_of_day and days_of_week".into(),
                    ));
                }
            }
            ScheduleKind::Monthly => {
                if spec.times_of_day.is_empty() || spec.days_of_month.is_empty() {
                    return Err(Error::Validation(
                        "MONTHLY schedule requires times_of_day and days_of_month".into(),
                    ));
                }
            }
            ScheduleKind::Event => {
                if spec.event_topic.is_none() {
                    return Err(Error::Validation("EVENT schedule requires event_topic".into()));
                }
            }
        }
        Ok(())
    }

    /// Validate, compute the initial `next_fire_at`, and durably insert a
    /// new schedule. Fails with `Error::Uniqueness` if `spec.name` is
    /// already taken.
    pub async fn create_schedule(&self, spec: ScheduleSpec) -> Result<Id> {
        Self::validate_spec(&spec)?;

        let id = Id::new();
        let mut schedule = Schedule {
            id,
            name: spec.name,
            task_name: spec.task_name,
            task_version: spec.task_version,
            queue_name: spec.queue_name,
            priority: spec.priority,
            kind: spec.kind,
            cron_expression: spec.cron_expression,
            interval_seconds: spec.interval_seconds,
            anchor_at: spec.anchor_at,
            times_of_day: spec.times_of_day,
            days_of_week: spec.days_of_week,
            days_of_month: spec.days_of_month,
            event_topic: spec.event_topic,
            timezone: spec.timezone,
            start_at: spec.start_at,
            end_at: spec.end_at,
            enabled: spec.enabled,
            unique_instance: spec.unique_instance,
            args: spec.args,
            metadata: spec.metadata,
            tags: spec.tags,
            last_fire_at: None,
            next_fire_at: None,
            run_count: 0,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            lock_holder_id: None,
            lock_deadline: None,
            version: 0,
        };
        schedule.next_fire_at = schedule.compute_next_fire(Utc::now())?;

        let row = self.storage.insert_schedule(schedule.to_row()).await?;
        info!(schedule_id = %row.id, name = %row.name, kind = %row.kind, "schedule created");
        Ok(id)
    }

    pub async fn get_schedule(&self, id: &Id) -> Result<Schedule> {
        let row = self
            .storage
            .get_schedule(&id.to_string())
            .await?
            .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
        Schedule::from_row(row)
    }

    pub async fn list_schedules(&self, enabled_only: bool) -> Result<Vec<Schedule>> {
        self.storage
            .list_schedules(enabled_only)
            .await?
            .into_iter()
            .map(Schedule::from_row)
            .collect()
    }

    pub async fn delete_schedule(&self, id: &Id) -> Result<()> {
        self.storage.delete_schedule(&id.to_string()).await
    }

    /// Replace a schedule's configurable fields (leaving bookkeeping counters
    /// and `version` alone), recomputing `next_fire_at` if the cadence
    /// changed. Retries internally on concurrent version conflicts.
    pub async fn update_schedule(&self, id: &Id, spec: ScheduleSpec) -> Result<Schedule> {
        Self::validate_spec(&spec)?;
        self.apply_update(id, move |schedule| {
            schedule.name = spec.name.clone();
            schedule.task_name = spec.task_name.clone();
            schedule.task_version = spec.task_version.clone();
            schedule.queue_name = spec.queue_name.clone();
            schedule.priority = spec.priority;
            schedule.kind = spec.kind;
            schedule.cron_expression = spec.cron_expression.clone();
            schedule.interval_seconds = spec.interval_seconds;
            schedule.anchor_at = spec.anchor_at;
            schedule.times_of_day = spec.times_of_day.clone();
            schedule.days_of_week = spec.days_of_week.clone();
            schedule.days_of_month = spec.days_of_month.clone();
            schedule.event_topic = spec.event_topic.clone();
            schedule.timezone = spec.timezone.clone();
            schedule.start_at = spec.start_at;
            schedule.end_at = spec.end_at;
            schedule.enabled = spec.enabled;
            schedule.unique_instance = spec.unique_instance;
            schedule.args = spec.args.clone();
            schedule.metadata = spec.metadata.clone();
            schedule.tags = spec.tags.clone();
            schedule.last_fire_at = None;
            schedule.next_fire_at = None;
        })
        .await
    }

    pub async fn enable_schedule(&self, id: &Id) -> Result<Schedule> {
        self.apply_update(id, |schedule| {
            schedule.enabled = true;
            schedule.next_fire_at = None;
        })
        .await
    }

    pub async fn disable_schedule(&self, id: &Id) -> Result<Schedule> {
        self.apply_update(id, |schedule| schedule.enabled = false).await
    }

    /// Load-mutate-CAS loop shared by every admin update. Recomputes
    /// `next_fire_at` from the mutated state before persisting.
    async fn apply_update(&self, id: &Id, mutate: impl Fn(&mut Schedule)) -> Result<Schedule> {
        const MAX_ATTEMPTS: usize = 20;
        for _ in 0..MAX_ATTEMPTS {
            let row = self
                .storage
                .get_schedule(&id.to_string())
                .await?
                .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;
            let expected_version = row.version;
            let mut schedule = Schedule::from_row(row)?;
            mutate(&mut schedule);
            if schedule.next_fire_at.is_none() && schedule.kind != ScheduleKind::Event {
                schedule.next_fire_at = schedule.compute_next_fire(Utc::now())?;
            }

            match self
                .storage
                .update_schedule(&id.to_string(), expected_version, schedule.to_row())
                .await?
            {
                Some(updated) => return Schedule::from_row(updated),
                None => continue,
            }
        }
        Err(Error::Fatal(format!(
            "schedule {id} update lost the version race {MAX_ATTEMPTS} times in a row"
        )))
    }

    /// Enqueue one job for `schedule_id` immediately, without disturbing its
    /// regular cadence or bookkeeping counters.
    pub async fn trigger_now(&self, schedule_id: &Id, overrides: Option<ArgBundle>) -> Result<Id> {
        let schedule = self.get_schedule(schedule_id).await?;
        let args = overrides.unwrap_or_else(|| schedule.args.clone());
        let mut spec = EnqueueSpec::new(schedule.task_name.clone())
            .with_args(args)
            .with_queue(schedule.queue_name.clone())
            .with_priority(schedule.priority)
            .with_scheduled_by(schedule.id.to_string());
        spec.task_version = schedule.task_version.clone();
        spec.tags = schedule.tags.clone();
        spec.metadata = schedule.metadata.clone();
        self.queue.enqueue(spec).await
    }

    /// Fire every enabled `EVENT` schedule subscribed to `topic`, returning
    /// the new job ids.
    pub async fn trigger_event(&self, topic: &str, payload: ArgBundle) -> Result<Vec<Id>> {
        let rows = self.storage.list_schedules(true).await?;
        let mut ids = Vec::new();
        for row in rows {
            let schedule = Schedule::from_row(row)?;
            if schedule.kind != ScheduleKind::Event {
                continue;
            }
            if schedule.event_topic.as_deref() != Some(topic) {
                continue;
            }
            let mut spec = EnqueueSpec::new(schedule.task_name.clone())
                .with_args(payload.clone())
                .with_queue(schedule.queue_name.clone())
                .with_priority(schedule.priority)
                .with_scheduled_by(schedule.id.to_string());
            spec.task_version = schedule.task_version.clone();
            spec.tags = schedule.tags.clone();
            spec.metadata = schedule.metadata.clone();
            ids.push(self.queue.enqueue(spec).await?);
        }
        Ok(ids)
    }

    /// A lazy sequence of the next `count` instants `schedule_id` would
    /// fire at, simulating successive fires without mutating persisted
    /// state.
    pub async fn get_next_run_times(&self, schedule_id: &Id, count: usize) -> Result<Vec<DateTime<Utc>>> {
        let mut schedule = self.get_schedule(schedule_id).await?;
        let mut results = Vec::with_capacity(count);
        let mut after = Utc::now();
        for _ in 0..count {
            match schedule.compute_next_fire(after)? {
                Some(next) => {
                    results.push(next);
                    schedule.last_fire_at = Some(next);
                    after = next;
                }
                None => break,
            }
        }
        Ok(results)
    }
}
