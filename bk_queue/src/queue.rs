use crate::job::Job;
use crate::spec::EnqueueSpec;
use bk_config::QueueConfig;
use bk_core::{ArgBundle, Error, ErrorRecord, Id, JobStatus, Priority, PriorityFilter, Result, RetryPolicy};
use bk_registry::TaskRegistry;
use bk_storage::{JobFilter, JobMutation, JobRow, QueueRow, QueueStatsRow, Storage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Priority-ordered, persistent job queue. Wraps the `Storage` contract and
/// the `TaskRegistry`; every operation here is the sole legal way to mutate
/// a job (data model ownership rule in spec.md §3).
pub struct Queue {
    storage: Arc<dyn Storage>,
    registry: Arc<TaskRegistry>,
    config: QueueConfig,
}

impl Queue {
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<TaskRegistry>, config: QueueConfig) -> Self {
        Self {
            storage,
            registry,
            config,
        }
    }

    fn row_to_job(row: JobRow) -> Result<Job> {
        Job::from_row(row)
    }

    async fn fresh(&self, id: &Id) -> Result<Job> {
        let row = self
            .storage
            .get_job(&id.to_string())
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {id}")))?;
        Self::row_to_job(row)
    }

    /// §4.2 `enqueue`. Resolves task defaults, validates the target queue
    /// isn't paused, and durably inserts a PENDING row.
    pub async fn enqueue(&self, spec: EnqueueSpec) -> Result<Id> {
        if spec.task_name.trim().is_empty() {
            return Err(Error::Validation("task_name is required".into()));
        }
        let entry = self
            .registry
            .lookup(&spec.task_name, spec.task_version.as_deref())?;

        let queue_name = spec
            .queue_name
            .clone()
            .unwrap_or_else(|| entry.config.queue_default.clone());

        if let Some(queue_row) = self.storage.get_queue(&queue_name).await? {
            if queue_row.paused {
                return Err(Error::QueuePaused(queue_name));
            }
        } else {
            self.storage
                .upsert_queue(QueueRow {
                    name: queue_name.clone(),
                    paused: false,
                    dead_letter_target: None,
                })
                .await?;
        }

        let unique_key = spec.unique_key.clone().or_else(|| {
            entry
                .config
                .unique_key_fn
                .as_ref()
                .and_then(|f| f(&spec.args))
        });

        let retry_policy = spec.retry_policy.unwrap_or(entry.config.retry_policy);
        let max_attempts = spec.max_attempts.unwrap_or(retry_policy.max_attempts);
        let priority = spec.priority.unwrap_or(entry.config.priority_default);
        let now = Utc::now();
        let available_at = spec.available_at.unwrap_or(now);
        let id = Id::new();
        let (positional, kwargs) = spec.args.to_row_values();

        let row = JobRow {
            id: id.to_string(),
            task_name: spec.task_name.clone(),
            task_version: spec.task_version.clone(),
            queue_name: queue_name.clone(),
            priority: priority.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            args_positional: positional,
            args_kwargs: kwargs,
            created_at: now,
            available_at,
            started_at: None,
            completed_at: None,
            attempt: 0,
            max_attempts: max_attempts as i64,
            retry_delay_base_seconds: retry_policy.delay_base_seconds as i64,
            retry_backoff_factor: retry_policy.backoff_factor,
            retry_jitter: retry_policy.jitter,
            retry_delay_ceiling_seconds: retry_policy.delay_ceiling_seconds as i64,
            timeout_seconds: Some(
                spec.timeout_seconds.unwrap_or(entry.config.timeout_seconds) as i64,
            ),
            unique_key,
            worker_id: None,
            reservation_deadline: None,
            result: None,
            error_kind: None,
            error_message: None,
            error_detail: None,
            metadata: serde_json::Value::Object(spec.metadata),
            tags: spec.tags,
            dead_letter: false,
            scheduled_by_id: spec.scheduled_by_id,
            cancel_requested: false,
        };

        let inserted = self.storage.insert_job(row).await?;
        info!(job_id = %inserted.id, task = %spec.task_name, queue = %queue_name, "enqueued job");
        Ok(id)
    }

    /// §4.2 `reserve`. Ordering (priority, available_at, created_at, id) and
    /// the skip-locked semantics live in the `Storage` implementation; this
    /// layer only translates the priority filter into ranks.
    pub async fn reserve(
        &self,
        queue_name: &str,
        worker_id: &str,
        priority_filter: &PriorityFilter,
        lease: chrono::Duration,
        batch_size: usize,
    ) -> Result<Vec<Job>> {
        let ranks: Vec<u8> = Priority::all()
            .into_iter()
            .filter(|p| priority_filter.accepts(*p))
            .map(|p| p.rank())
            .collect();
        let now = Utc::now();
        let rows = self
            .storage
            .reserve_jobs(
                queue_name,
                worker_id,
                &ranks,
                now,
                lease.num_seconds(),
                batch_size,
            )
            .await?;
        debug!(queue = %queue_name, worker = %worker_id, count = rows.len(), "reserved jobs");
        rows.into_iter().map(Self::row_to_job).collect()
    }

    /// §4.2 `start`. Advances the attempt counter: `attempt` counts
    /// attempts *entered*, so the job reads `attempt == N` for its Nth try
    /// from the moment execution begins, not only once it fails or
    /// completes.
    pub async fn start(&self, job_id: &Id, worker_id: &str) -> Result<Job> {
        let id_str = job_id.to_string();
        let current = self
            .storage
            .get_job(&id_str)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {job_id}")))?;

        if current.status != JobStatus::Reserved.as_str() || current.worker_id.as_deref() != Some(worker_id) {
            return Err(Error::WrongOwner(format!(
                "worker {worker_id} does not hold reservation for job {job_id}"
            )));
        }

        let mutation = JobMutation {
            new_status: Some(JobStatus::Running),
            started_at: Some(Utc::now()),
            attempt: Some(current.attempt + 1),
            ..Default::default()
        };
        let previous = self
            .storage
            .conditional_update_job(&id_str, JobStatus::Reserved, Some(worker_id), mutation)
            .await?;
        if previous.is_none() {
            return Err(Error::WrongOwner(format!(
                "job {job_id} was reserved by someone else before start() landed"
            )));
        }
        info!(job_id = %job_id, worker = %worker_id, "started job");
        self.fresh(job_id).await
    }

    /// §4.2 `complete`. Idempotent: a retried completion call for a job
    /// that is no longer RUNNING under this worker fails with `WrongOwner`
    /// rather than silently re-applying the result.
    pub async fn complete(&self, job_id: &Id, worker_id: &str, result: serde_json::Value) -> Result<Job> {
        let id_str = job_id.to_string();
        let mutation = JobMutation {
            new_status: Some(JobStatus::Completed),
            completed_at: Some(Utc::now()),
            result: Some(result),
            clear_reservation: true,
            ..Default::default()
        };
        let previous = self
            .storage
            .conditional_update_job(&id_str, JobStatus::Running, Some(worker_id), mutation)
            .await?;
        if previous.is_none() {
            return Err(Error::WrongOwner(format!(
                "worker {worker_id} does not own running job {job_id}"
            )));
        }
        info!(job_id = %job_id, worker = %worker_id, "completed job");
        let job = self.fresh(job_id).await?;
        if let Ok(entry) = self.registry.lookup(&job.task_name, job.task_version.as_deref()) {
            if let Some(hook) = &entry.config.on_success {
                hook(job_id, job.result.as_ref().unwrap_or(&serde_json::Value::Null));
            }
        }
        Ok(job)
    }

    /// §4.2 `fail`. Classifies into RETRYING / FAILED / DEAD per the
    /// attempt budget and dead-letter configuration.
    pub async fn fail(
        &self,
        job_id: &Id,
        worker_id: &str,
        error: ErrorRecord,
        retryable_hint: Option<bool>,
    ) -> Result<Job> {
        let id_str = job_id.to_string();
        let current = self
            .storage
            .get_job(&id_str)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {job_id}")))?;
        if current.status != JobStatus::Running.as_str() || current.worker_id.as_deref() != Some(worker_id) {
            return Err(Error::WrongOwner(format!(
                "worker {worker_id} does not own running job {job_id}"
            )));
        }

        let retryable = retryable_hint.unwrap_or(true);
        let retry_policy = RetryPolicy {
            max_attempts: current.max_attempts.max(0) as u32,
            delay_base_seconds: current.retry_delay_base_seconds.max(0) as u64,
            backoff_factor: current.retry_backoff_factor,
            jitter: current.retry_jitter,
            delay_ceiling_seconds: current.retry_delay_ceiling_seconds.max(0) as u64,
        };
        let job = self
            .apply_failure(&current, worker_id, retryable, retry_policy, error)
            .await?;

        if let Ok(entry) = self.registry.lookup(&job.task_name, job.task_version.as_deref()) {
            match job.status {
                JobStatus::Retrying => {
                    if let Some(hook) = &entry.config.on_retry {
                        hook(job_id, job.attempt);
                    }
                }
                JobStatus::Failed | JobStatus::Dead => {
                    if let Some(hook) = &entry.config.on_failure {
                        if let Some(record) = &job.error {
                            hook(job_id, &Error::TaskExecution(record.message.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(job)
    }

    /// Shared by `fail` and the reaper's crashed-worker compensation: given
    /// a snapshot row, an attempt count to judge against, and the error to
    /// record, apply the correct status transition atomically.
    async fn apply_failure(
        &self,
        current: &JobRow,
        expected_worker_id: &str,
        retryable: bool,
        retry_policy: RetryPolicy,
        error: ErrorRecord,
    ) -> Result<Job> {
        let id_str = current.id.clone();
        let expected_status = current
            .status
            .parse::<JobStatus>()
            .map_err(|_| Error::Fatal(format!("unparsable job status on {id_str}")))?;
        let attempt = current.attempt.max(0) as u32;

        if retryable && !retry_policy.is_exhausted(attempt) {
            let now = Utc::now();
            let available_at = retry_policy.next_available_at(now, attempt);
            let mutation = JobMutation {
                new_status: Some(JobStatus::Retrying),
                available_at: Some(available_at),
                clear_reservation: true,
                error_kind: Some(error.kind.clone()),
                error_message: Some(error.message.clone()),
                error_detail: error.detail.clone(),
                ..Default::default()
            };
            let previous = self
                .storage
                .conditional_update_job(
                    &id_str,
                    expected_status,
                    Some(expected_worker_id),
                    mutation,
                )
                .await?;
            if previous.is_none() {
                return Err(Error::WrongOwner(format!(
                    "job {id_str} changed ownership before failure could be recorded"
                )));
            }
            warn!(job_id = %id_str, attempt, "job failed, scheduled retry");
            return Job::from_row(self.storage.get_job(&id_str).await?.ok_or_else(|| {
                Error::Fatal(format!("job {id_str} vanished after conditional update"))
            })?);
        }

        self.route_exhausted(current, expected_status, expected_worker_id, error)
            .await
    }

    /// Exhausted (or non-retryable) failure: route to the queue's
    /// dead-letter target if one is configured, else leave the job FAILED.
    async fn route_exhausted(
        &self,
        current: &JobRow,
        expected_status: JobStatus,
        expected_worker_id: &str,
        error: ErrorRecord,
    ) -> Result<Job> {
        let id_str = current.id.clone();
        let dlq_target = self
            .storage
            .get_queue(&current.queue_name)
            .await?
            .and_then(|q| q.dead_letter_target);

        let final_status = if dlq_target.is_some() {
            JobStatus::Dead
        } else {
            JobStatus::Failed
        };

        let mutation = JobMutation {
            new_status: Some(final_status),
            completed_at: Some(Utc::now()),
            attempt: Some(current.attempt),
            clear_reservation: true,
            error_kind: Some(error.kind.clone()),
            error_message: Some(error.message.clone()),
            error_detail: error.detail.clone(),
            dead_letter: Some(dlq_target.is_some()),
            ..Default::default()
        };
        let previous = self
            .storage
            .conditional_update_job(&id_str, expected_status, Some(expected_worker_id), mutation)
            .await?;
        if previous.is_none() {
            return Err(Error::WrongOwner(format!(
                "job {id_str} changed ownership before failure could be recorded"
            )));
        }

        if let Some(dlq_name) = dlq_target {
            let mut lineage_metadata = match &current.metadata {
                serde_json::Value::Object(m) => m.clone(),
                _ => serde_json::Map::new(),
            };
            lineage_metadata.insert("origin_job_id".into(), serde_json::json!(current.id));
            lineage_metadata.insert(
                "origin_queue".into(),
                serde_json::json!(current.queue_name),
            );

            if self.storage.get_queue(&dlq_name).await?.is_none() {
                self.storage
                    .upsert_queue(QueueRow {
                        name: dlq_name.clone(),
                        paused: false,
                        dead_letter_target: None,
                    })
                    .await?;
            }

            let now = Utc::now();
            let dlq_row = JobRow {
                id: Id::new().to_string(),
                task_name: current.task_name.clone(),
                task_version: current.task_version.clone(),
                queue_name: dlq_name.clone(),
                priority: current.priority.clone(),
                status: JobStatus::Pending.as_str().to_string(),
                args_positional: current.args_positional.clone(),
                args_kwargs: current.args_kwargs.clone(),
                created_at: now,
                available_at: now,
                started_at: None,
                completed_at: None,
                attempt: 0,
                max_attempts: current.max_attempts,
                retry_delay_base_seconds: current.retry_delay_base_seconds,
                retry_backoff_factor: current.retry_backoff_factor,
                retry_jitter: current.retry_jitter,
                retry_delay_ceiling_seconds: current.retry_delay_ceiling_seconds,
                timeout_seconds: current.timeout_seconds,
                unique_key: None,
                worker_id: None,
                reservation_deadline: None,
                result: None,
                error_kind: None,
                error_message: None,
                error_detail: None,
                metadata: serde_json::Value::Object(lineage_metadata),
                tags: current.tags.clone(),
                dead_letter: false,
                scheduled_by_id: current.scheduled_by_id.clone(),
                cancel_requested: false,
            };
            self.storage.insert_job(dlq_row).await?;
            warn!(job_id = %id_str, dlq = %dlq_name, "retries exhausted, routed to dead-letter queue");
        } else {
            warn!(job_id = %id_str, "retries exhausted, no dead-letter target configured");
        }

        Job::from_row(
            self.storage
                .get_job(&id_str)
                .await?
                .ok_or_else(|| Error::Fatal(format!("job {id_str} vanished after routing")))?,
        )
    }

    /// §4.2 `cancel`. PENDING/RETRYING cancel unconditionally; RESERVED/
    /// RUNNING only set a cooperative flag.
    pub async fn cancel(&self, job_id: &Id) -> Result<Job> {
        let id_str = job_id.to_string();
        let current = self
            .storage
            .get_job(&id_str)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {job_id}")))?;
        let status = current
            .status
            .parse::<JobStatus>()
            .map_err(|_| Error::Fatal(format!("unparsable job status on {id_str}")))?;

        match status {
            JobStatus::Pending | JobStatus::Retrying => {
                let mutation = JobMutation::to_status(JobStatus::Cancelled);
                let previous = self
                    .storage
                    .conditional_update_job(&id_str, status, None, mutation)
                    .await?;
                if previous.is_none() {
                    return Err(Error::Validation(format!(
                        "job {job_id} changed state before cancellation landed"
                    )));
                }
                info!(job_id = %job_id, "cancelled job");
            }
            JobStatus::Reserved | JobStatus::Running => {
                let mutation = JobMutation {
                    cancel_requested: Some(true),
                    ..Default::default()
                };
                self.storage
                    .conditional_update_job(&id_str, status, None, mutation)
                    .await?;
                info!(job_id = %job_id, "requested cooperative cancellation");
            }
            _ => {
                return Err(Error::Validation(format!(
                    "job {job_id} is in terminal status {status} and cannot be cancelled"
                )));
            }
        }
        self.fresh(job_id).await
    }

    /// Worker-invoked: the handler observed `cancel_requested` and the task
    /// actually stopped running. Lands the job in CANCELLED directly,
    /// bypassing `fail`/`apply_failure`/`route_exhausted` entirely so a
    /// cancellation never gets retried or routed to a dead-letter queue,
    /// per the Cancelled error kind being terminal and never retried.
    pub async fn acknowledge_cancellation(&self, job_id: &Id, worker_id: &str) -> Result<Job> {
        let id_str = job_id.to_string();
        let current = self
            .storage
            .get_job(&id_str)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {job_id}")))?;
        let status = current
            .status
            .parse::<JobStatus>()
            .map_err(|_| Error::Fatal(format!("unparsable job status on {id_str}")))?;

        if status == JobStatus::Cancelled {
            return self.fresh(job_id).await;
        }
        if current.worker_id.as_deref() != Some(worker_id) {
            return Err(Error::WrongOwner(format!(
                "worker {worker_id} does not own job {job_id}"
            )));
        }

        match status {
            JobStatus::Reserved | JobStatus::Running => {
                let mutation = JobMutation {
                    new_status: Some(JobStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    clear_reservation: true,
                    ..Default::default()
                };
                let previous = self
                    .storage
                    .conditional_update_job(&id_str, status, Some(worker_id), mutation)
                    .await?;
                if previous.is_none() {
                    return Err(Error::WrongOwner(format!(
                        "job {job_id} changed ownership before cancellation could be recorded"
                    )));
                }
                info!(job_id = %job_id, "worker acknowledged cancellation");
            }
            _ => {
                return Err(Error::Validation(format!(
                    "job {job_id} is in status {status}, not RESERVED/RUNNING/CANCELLED"
                )));
            }
        }
        self.fresh(job_id).await
    }

    /// §4.2 `retry`, admin-invoked. Moves FAILED or DEAD back to PENDING
    /// with the attempt counter preserved.
    pub async fn retry(&self, job_id: &Id) -> Result<Job> {
        let id_str = job_id.to_string();
        let current = self
            .storage
            .get_job(&id_str)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {job_id}")))?;
        let status = current
            .status
            .parse::<JobStatus>()
            .map_err(|_| Error::Fatal(format!("unparsable job status on {id_str}")))?;
        if !matches!(status, JobStatus::Failed | JobStatus::Dead) {
            return Err(Error::Validation(format!(
                "job {job_id} is in status {status}, only FAILED/DEAD jobs can be admin-retried"
            )));
        }
        let mutation = JobMutation {
            new_status: Some(JobStatus::Pending),
            available_at: Some(Utc::now()),
            dead_letter: Some(false),
            ..Default::default()
        };
        let previous = self
            .storage
            .conditional_update_job(&id_str, status, None, mutation)
            .await?;
        if previous.is_none() {
            return Err(Error::Validation(format!(
                "job {job_id} changed state before admin retry landed"
            )));
        }
        info!(job_id = %job_id, "admin retry requeued job");
        self.fresh(job_id).await
    }

    pub async fn get(&self, job_id: &Id) -> Result<Job> {
        self.fresh(job_id).await
    }

    /// Heartbeat-driven lease extension: push a RESERVED/RUNNING job's
    /// `reservation_deadline` out to `new_deadline`, owned by `worker_id`.
    pub async fn renew_lease(&self, job_id: &Id, worker_id: &str, new_deadline: DateTime<Utc>) -> Result<Job> {
        let id_str = job_id.to_string();
        let current = self
            .storage
            .get_job(&id_str)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {job_id}")))?;
        let status = current
            .status
            .parse::<JobStatus>()
            .map_err(|_| Error::Fatal(format!("unparsable job status on {id_str}")))?;
        if !matches!(status, JobStatus::Reserved | JobStatus::Running) || current.worker_id.as_deref() != Some(worker_id) {
            return Err(Error::WrongOwner(format!(
                "worker {worker_id} does not hold a renewable lease on job {job_id}"
            )));
        }
        let mutation = JobMutation {
            reservation_deadline: Some(new_deadline),
            ..Default::default()
        };
        self.storage
            .conditional_update_job(&id_str, status, Some(worker_id), mutation)
            .await?;
        self.fresh(job_id).await
    }

    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>> {
        let rows = self.storage.find_jobs(&filter).await?;
        rows.into_iter().map(Self::row_to_job).collect()
    }

    pub async fn statistics(&self, queue_name: &str) -> Result<QueueStatsRow> {
        self.storage.queue_statistics(queue_name).await
    }

    pub async fn pause(&self, queue_name: &str) -> Result<()> {
        let mut row = self.storage.get_queue(queue_name).await?.unwrap_or(QueueRow {
            name: queue_name.to_string(),
            paused: false,
            dead_letter_target: None,
        });
        row.paused = true;
        self.storage.upsert_queue(row).await?;
        info!(queue = %queue_name, "paused queue");
        Ok(())
    }

    pub async fn resume(&self, queue_name: &str) -> Result<()> {
        let mut row = self.storage.get_queue(queue_name).await?.unwrap_or(QueueRow {
            name: queue_name.to_string(),
            paused: false,
            dead_letter_target: None,
        });
        row.paused = false;
        self.storage.upsert_queue(row).await?;
        info!(queue = %queue_name, "resumed queue");
        Ok(())
    }

    /// Configure (or clear) a queue's dead-letter routing target.
    pub async fn set_dead_letter_target(&self, queue_name: &str, target: Option<String>) -> Result<()> {
        let mut row = self.storage.get_queue(queue_name).await?.unwrap_or(QueueRow {
            name: queue_name.to_string(),
            paused: false,
            dead_letter_target: None,
        });
        row.dead_letter_target = target;
        self.storage.upsert_queue(row).await?;
        Ok(())
    }

    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let terminal = [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Dead,
            JobStatus::Cancelled,
        ];
        self.storage.prune_jobs(older_than, &terminal).await
    }

    /// The reaper's periodic sweep: compensate for reservations whose
    /// deadline has already passed.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.storage.sweep_expired_reservations(now).await?;
        self.compensate_rows(rows, now).await
    }

    /// Admin-invoked equivalent of the reaper sweep, scoped to reservations
    /// older than an explicit cutoff rather than "now".
    pub async fn requeue_stuck(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let rows = self.storage.sweep_expired_reservations(older_than).await?;
        self.compensate_rows(rows, Utc::now()).await
    }

    async fn compensate_rows(&self, rows: Vec<JobRow>, now: DateTime<Utc>) -> Result<usize> {
        let mut compensated = 0;
        for row in rows {
            // A job caught still RESERVED never reached `start()`, so its
            // attempt was never advanced for this try; charge it here. A
            // RUNNING job already paid that cost when `start()` ran.
            let was_reserved = row.status == JobStatus::Reserved.as_str();
            let attempt = if was_reserved {
                row.attempt + 1
            } else {
                row.attempt
            };
            let retry_policy = RetryPolicy {
                max_attempts: row.max_attempts.max(0) as u32,
                delay_base_seconds: row.retry_delay_base_seconds.max(0) as u64,
                backoff_factor: row.retry_backoff_factor,
                jitter: row.retry_jitter,
                delay_ceiling_seconds: row.retry_delay_ceiling_seconds.max(0) as u64,
            };
            let expected_status = match row.status.parse::<JobStatus>() {
                Ok(s) => s,
                Err(_) => continue,
            };
            let Some(worker_id) = row.worker_id.clone() else {
                continue;
            };
            let error = ErrorRecord::new(
                "Timeout",
                "reservation expired before the job completed; worker presumed crashed",
            );

            let mut charged = row.clone();
            charged.attempt = attempt;

            let succeeded = if !retry_policy.is_exhausted(attempt) {
                let available_at = retry_policy.next_available_at(now, attempt);
                let mutation = JobMutation {
                    new_status: Some(JobStatus::Retrying),
                    available_at: Some(available_at),
                    attempt: Some(attempt),
                    clear_reservation: true,
                    error_kind: Some(error.kind.clone()),
                    error_message: Some(error.message.clone()),
                    ..Default::default()
                };
                self.storage
                    .conditional_update_job(&row.id, expected_status, Some(&worker_id), mutation)
                    .await?
                    .is_some()
            } else {
                match self
                    .route_exhausted(&charged, expected_status, &worker_id, error)
                    .await
                {
                    Ok(_) => true,
                    Err(Error::WrongOwner(_)) => false,
                    Err(e) => return Err(e),
                }
            };

            if succeeded {
                compensated += 1;
                warn!(job_id = %row.id, "reaper compensated expired reservation");
            }
        }
        Ok(compensated)
    }

    /// Promote RETRYING jobs whose delay has elapsed back to PENDING so
    /// they become reservation-eligible again.
    pub async fn promote_ready_retries(&self, now: DateTime<Utc>) -> Result<usize> {
        let filter = JobFilter {
            statuses: Some(vec![JobStatus::Retrying]),
            ..Default::default()
        };
        let rows = self.storage.find_jobs(&filter).await?;
        let mut promoted = 0;
        for row in rows {
            if row.available_at > now {
                continue;
            }
            let mutation = JobMutation::to_status(JobStatus::Pending);
            let previous = self
                .storage
                .conditional_update_job(&row.id, JobStatus::Retrying, None, mutation)
                .await?;
            if previous.is_some() {
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
