//! The reserve/dispatch/report loop every concurrency variant shares,
//! grounded in `gl_scheduler::JobScheduler::execute_now` (timeout via
//! `tokio::time::timeout`, tracked in-flight count, atomic metrics
//! counters) generalized from one fire-and-forget execution to the full
//! batch-reserve, per-job dispatch, and heartbeat loop spec.md §4.4 needs.

use crate::lifecycle::WorkerLifecycle;
use crate::metrics::WorkerMetrics;
use crate::variant::ConcurrencyModel;
use bk_config::WorkerConfig;
use bk_core::{noop_sink, Error, MetricsSink, PriorityFilter, Result};
use bk_queue::Queue;
use bk_registry::{JobContext, TaskRegistry};
use bk_storage::{Storage, WorkerRegistrationRow};
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot of a worker's liveness, returned by `Worker::health`.
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub lifecycle: WorkerLifecycle,
    pub in_flight: usize,
    pub capacity: usize,
}

/// The two background tasks a started worker owns.
pub struct WorkerHandle {
    pub worker_id: String,
    main_loop: JoinHandle<()>,
    heartbeat_loop: JoinHandle<()>,
}

impl WorkerHandle {
    /// Wait for both loops to exit (they do, once `shutdown`/`shutdown_now`
    /// moves the worker into `Stopped`).
    pub async fn join(self) {
        let _ = self.main_loop.await;
        let _ = self.heartbeat_loop.await;
    }
}

/// A single worker process's view of one queue: reserves jobs within its
/// priority filter, dispatches them under its concurrency model, and
/// reports outcomes back through `Queue`.
pub struct Worker {
    id: String,
    queue_name: String,
    priority_filter: PriorityFilter,
    concurrency: ConcurrencyModel,
    queue: Arc<Queue>,
    registry: Arc<TaskRegistry>,
    storage: Arc<dyn Storage>,
    config: WorkerConfig,
    lifecycle: RwLock<WorkerLifecycle>,
    in_flight: AtomicUsize,
    running_jobs: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
    metrics: WorkerMetrics,
    metrics_sink: RwLock<Arc<dyn MetricsSink>>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        queue_name: impl Into<String>,
        priority_filter: PriorityFilter,
        concurrency: ConcurrencyModel,
        queue: Arc<Queue>,
        registry: Arc<TaskRegistry>,
        storage: Arc<dyn Storage>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            queue_name: queue_name.into(),
            priority_filter,
            concurrency,
            queue,
            registry,
            storage,
            config,
            lifecycle: RwLock::new(WorkerLifecycle::Created),
            in_flight: AtomicUsize::new(0),
            running_jobs: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            metrics: WorkerMetrics::new(),
            metrics_sink: RwLock::new(noop_sink()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attach the aggregate sink job lifecycle events are mirrored into.
    /// `JobManager::add_worker` calls this with its own `ManagerMetrics`;
    /// a worker built directly (as the tests here do) stays on the no-op
    /// default and just relies on `Worker::metrics()` instead.
    pub fn set_metrics_sink(&self, sink: Arc<dyn MetricsSink>) {
        *self.metrics_sink.write().expect("metrics sink lock poisoned") = sink;
    }

    fn metrics_sink(&self) -> Arc<dyn MetricsSink> {
        self.metrics_sink.read().expect("metrics sink lock poisoned").clone()
    }

    fn set_lifecycle(&self, state: WorkerLifecycle) {
        *self.lifecycle.write().expect("worker lifecycle lock poisoned") = state;
    }

    fn lifecycle(&self) -> WorkerLifecycle {
        *self.lifecycle.read().expect("worker lifecycle lock poisoned")
    }

    /// Register with storage and spawn the reserve/dispatch loop plus the
    /// heartbeat loop. Takes `Arc<Self>` by value; callers that need to keep
    /// calling `pause`/`shutdown`/`health` afterwards should `clone()` the
    /// `Arc` before calling this.
    pub async fn start(self: Arc<Self>) -> Result<WorkerHandle> {
        self.set_lifecycle(WorkerLifecycle::Starting);
        let now = Utc::now();
        self.storage
            .upsert_worker_registration(WorkerRegistrationRow {
                worker_id: self.id.clone(),
                host: hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string()),
                queue_names: vec![self.queue_name.clone()],
                priority_filter: bk_core::Priority::all()
                    .into_iter()
                    .filter(|p| self.priority_filter.accepts(*p))
                    .map(|p| p.as_str().to_string())
                    .collect(),
                capacity: self.concurrency.capacity() as i64,
                started_at: now,
                last_heartbeat_at: now,
                current_job_ids: vec![],
                jobs_processed: 0,
                jobs_failed: 0,
            })
            .await?;
        self.set_lifecycle(WorkerLifecycle::Running);
        info!(worker = %self.id, queue = %self.queue_name, capacity = self.concurrency.capacity(), "worker starting");

        let main_loop = tokio::spawn(self.clone().run_loop());
        let heartbeat_loop = tokio::spawn(self.clone().run_heartbeat());

        Ok(WorkerHandle {
            worker_id: self.id.clone(),
            main_loop,
            heartbeat_loop,
        })
    }

    pub fn pause(&self) {
        if self.lifecycle() == WorkerLifecycle::Running {
            self.set_lifecycle(WorkerLifecycle::Paused);
            info!(worker = %self.id, "worker paused");
        }
    }

    pub fn resume(&self) {
        if self.lifecycle() == WorkerLifecycle::Paused {
            self.set_lifecycle(WorkerLifecycle::Running);
            info!(worker = %self.id, "worker resumed");
        }
    }

    /// Stop accepting new work and wait up to `deadline` for in-flight jobs
    /// to finish before the loop exits regardless.
    pub async fn shutdown(&self, deadline: Duration) {
        self.set_lifecycle(WorkerLifecycle::Draining);
        info!(worker = %self.id, ?deadline, "worker draining");
        let start = tokio::time::Instant::now();
        while self.in_flight.load(Ordering::Acquire) > 0 && start.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.shutdown_now();
    }

    /// Cancel immediately, without waiting for in-flight jobs.
    pub fn shutdown_now(&self) {
        self.shutdown.cancel();
        let _ = self.storage.remove_worker_registration(&self.id);
        info!(worker = %self.id, "worker shutdown requested");
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            worker_id: self.id.clone(),
            lifecycle: self.lifecycle(),
            in_flight: self.in_flight.load(Ordering::Acquire),
            capacity: self.concurrency.capacity(),
        }
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    fn poll_delay(&self) -> Duration {
        let jitter_ms = if self.config.poll_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.poll_jitter_ms)
        };
        Duration::from_millis(self.config.poll_interval_ms + jitter_ms)
    }

    async fn run_loop(self: Arc<Self>) {
        debug!(worker = %self.id, "reserve loop starting");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let lifecycle = self.lifecycle();
            if lifecycle.is_shutdown() {
                break;
            }
            if !lifecycle.accepts_new_work() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_delay()) => {}
                }
                continue;
            }

            let capacity = self.concurrency.capacity();
            let available = capacity.saturating_sub(self.in_flight.load(Ordering::Acquire));
            if available == 0 {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_delay()) => {}
                }
                continue;
            }

            let lease = chrono::Duration::seconds(self.config.default_lease_seconds as i64);
            let reserved = match self
                .queue
                .reserve(&self.queue_name, &self.id, &self.priority_filter, lease, available)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "reserve failed, backing off");
                    tokio::time::sleep(self.poll_delay()).await;
                    continue;
                }
            };

            if reserved.is_empty() {
                let mut new_jobs = self.storage.subscribe_new_jobs(&self.queue_name);
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_delay()) => {}
                    _ = new_jobs.recv() => {}
                }
                continue;
            }

            self.metrics
                .jobs_reserved
                .fetch_add(reserved.len() as u64, Ordering::Relaxed);
            for job in reserved {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                let worker = self.clone();
                tokio::spawn(async move {
                    let job_id = job.id.clone();
                    let worker_id = worker.id.clone();
                    worker.clone().dispatch(job).await;
                    worker.in_flight.fetch_sub(1, Ordering::AcqRel);
                    debug!(worker = %worker_id, job_id = %job_id, "dispatch finished");
                });
            }
        }
        self.set_lifecycle(WorkerLifecycle::Stopped);
        info!(worker = %self.id, "reserve loop stopped");
    }

    async fn run_heartbeat(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.heartbeat_interval_seconds);
        let lease = chrono::Duration::seconds(self.config.default_lease_seconds as i64);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if self.lifecycle() == WorkerLifecycle::Stopped {
                break;
            }

            let running: Vec<String> = self
                .running_jobs
                .lock()
                .expect("running_jobs lock poisoned")
                .iter()
                .cloned()
                .collect();
            let new_deadline = Utc::now() + lease;
            for job_id in &running {
                if let Ok(id) = job_id.parse() {
                    if let Err(e) = self.queue.renew_lease(&id, &self.id, new_deadline).await {
                        debug!(worker = %self.id, job_id = %job_id, error = %e, "lease renewal skipped");
                    }
                }
            }

            if let Ok(Some(mut row)) = self.storage.get_worker_registration(&self.id).await {
                row.last_heartbeat_at = Utc::now();
                row.current_job_ids = running;
                row.jobs_processed = self.metrics.completed() as i64;
                row.jobs_failed = self.metrics.failed() as i64;
                if let Err(e) = self.storage.upsert_worker_registration(row).await {
                    warn!(worker = %self.id, error = %e, "heartbeat failed to persist");
                }
            }
        }
    }

    /// `start()` the reservation, execute the handler under the effective
    /// deadline, then report `complete`/`fail` based on the outcome.
    async fn dispatch(self: Arc<Self>, job: bk_queue::Job) {
        let started = match self.queue.start(&job.id, &self.id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not start reserved job, skipping");
                return;
            }
        };
        self.metrics_sink().record_started();

        let job_id_str = started.id.to_string();
        self.running_jobs
            .lock()
            .expect("running_jobs lock poisoned")
            .insert(job_id_str.clone());

        // Looked up after `start()`, not before: a job can only be reported
        // as failed once it is RUNNING, so a missing handler still needs the
        // attempt charged before it can be routed to failure/dead-letter.
        let entry = match self.registry.lookup(&started.task_name, started.task_version.as_deref()) {
            Ok(entry) => entry,
            Err(e) => {
                error!(job_id = %started.id, error = %e, "reserved job has no registered handler");
                if let Err(fail_err) = self
                    .queue
                    .fail(&started.id, &self.id, e.to_record(), Some(false))
                    .await
                {
                    error!(job_id = %started.id, error = %fail_err, "failed to record missing-handler failure");
                }
                self.running_jobs
                    .lock()
                    .expect("running_jobs lock poisoned")
                    .remove(&job_id_str);
                return;
            }
        };

        let timeout_seconds = started.timeout_seconds.unwrap_or(entry.config.timeout_seconds);
        let timeout_deadline = Utc::now() + chrono::Duration::seconds(timeout_seconds as i64);
        let deadline = match started.reservation_deadline {
            Some(reservation_deadline) => reservation_deadline.min(timeout_deadline),
            None => timeout_deadline,
        };

        let metadata: HashMap<String, String> = started
            .metadata
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();
        let ctx = JobContext::new(started.id.clone(), started.attempt, deadline).with_metadata(metadata);

        if started.cancel_requested {
            ctx.cancel();
        }

        for middleware in &entry.config.middleware {
            if let Err(e) = middleware.before(&ctx, &started.args) {
                self.report_outcome(&started, &entry, Err(e)).await;
                self.running_jobs
                    .lock()
                    .expect("running_jobs lock poisoned")
                    .remove(&job_id_str);
                return;
            }
        }

        let watch_active = CancellationToken::new();
        let watch_active_inner = watch_active.clone();
        let watch_token = ctx.cancellation_token();
        let watch_storage = self.storage.clone();
        let watch_id = started.id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch_active_inner.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        match watch_storage.get_job(&watch_id).await {
                            Ok(Some(row)) if row.cancel_requested => {
                                watch_token.cancel();
                                break;
                            }
                            Ok(Some(_)) => {}
                            _ => break,
                        }
                    }
                }
            }
        });

        let remaining = (deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        let cancellation = ctx.cancellation_token();
        let outcome = tokio::select! {
            result = tokio::time::timeout(remaining, entry.handler.execute(ctx.clone(), started.args.clone())) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::Timeout(format!("job {} exceeded its deadline", started.id))),
                }
            }
            _ = cancellation.cancelled() => {
                if let Some(grace) = self.concurrency.termination_grace() {
                    tokio::time::sleep(grace).await;
                }
                Err(Error::Cancelled(format!("job {} was cooperatively cancelled", started.id)))
            }
        };
        watch_active.cancel();

        for middleware in &entry.config.middleware {
            middleware.after(&ctx, &outcome);
        }

        self.report_outcome(&started, &entry, outcome).await;
        self.running_jobs
            .lock()
            .expect("running_jobs lock poisoned")
            .remove(&job_id_str);
    }

    async fn report_outcome(
        &self,
        job: &bk_queue::Job,
        entry: &bk_registry::TaskEntry,
        outcome: Result<serde_json::Value>,
    ) {
        match outcome {
            Ok(value) => {
                self.metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
                let started_at = job.started_at.unwrap_or(job.created_at);
                let execution_seconds = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
                self.metrics_sink().record_completed(execution_seconds.max(0.0));
                if let Err(e) = self.queue.complete(&job.id, &self.id, value).await {
                    error!(job_id = %job.id, error = %e, "failed to record completion");
                }
            }
            Err(Error::Cancelled(_message)) => {
                self.metrics.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self
                    .queue
                    .acknowledge_cancellation(&job.id, &self.id)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "failed to record cancellation");
                }
            }
            Err(e) => {
                if matches!(e, Error::Timeout(_)) {
                    self.metrics.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
                }
                self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                self.metrics_sink().record_failed();
                let retryable = (entry.config.retryable)(&e);
                let record = e.to_record();
                if let Err(fail_err) = self.queue.fail(&job.id, &self.id, record, Some(retryable)).await {
                    error!(job_id = %job.id, error = %fail_err, "failed to record failure");
                }
            }
        }
    }
}
