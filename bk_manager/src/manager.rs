//! The thin coordinating layer: constructs and owns Storage, Queue,
//! Worker(s), Scheduler, and TaskRegistry, exposes the administrative
//! surface, and sequences graceful shutdown.
//!
//! Grounded in `gl_scheduler::JobScheduler`'s construction-and-wiring shape
//! (config + storage + dependent services passed in, `start`/`stop`
//! spawning and tearing down background tasks) and `app/src/main.rs`'s
//! construct-then-start bootstrap order, generalized from one hard-wired
//! process into a reusable constructor.

use crate::health::{ComponentHealth, SystemHealth};
use crate::metrics::ManagerMetrics;
use crate::metrics_sync::{MetricsSync, MetricsSyncHandle};
use crate::reaper::{Reaper, ReaperHandle};
use bk_config::Config;
use bk_core::{ArgBundle, Id, PriorityFilter, Result};
use bk_queue::{EnqueueSpec, Job, Queue};
use bk_registry::TaskRegistry;
use bk_scheduler::{Schedule, ScheduleSpec, Scheduler, SchedulerHandle};
use bk_storage::{InstanceId, JobFilter, QueueStatsRow, Storage, WorkerRegistrationRow};
use bk_worker::{ConcurrencyModel, Worker, WorkerHandle};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

/// Handles the running manager owns, taken back out of `running` on
/// `shutdown` so the join awaits never happen under the lock.
struct RunningHandles {
    scheduler: SchedulerHandle,
    reaper: ReaperHandle,
    metrics_sync: Arc<MetricsSync>,
    metrics_sync_handle: MetricsSyncHandle,
    workers: Vec<WorkerHandle>,
}

pub struct JobManager {
    storage: Arc<dyn Storage>,
    registry: Arc<TaskRegistry>,
    queue: Arc<Queue>,
    scheduler: Arc<Scheduler>,
    reaper: Arc<Reaper>,
    metrics: Arc<ManagerMetrics>,
    config: Config,
    workers: RwLock<Vec<Arc<Worker>>>,
    queue_names: RwLock<Vec<String>>,
    running: std::sync::Mutex<Option<RunningHandles>>,
}

impl JobManager {
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<TaskRegistry>, config: Config) -> Arc<Self> {
        let queue = Arc::new(Queue::new(storage.clone(), registry.clone(), config.queue.clone()));
        let instance_id = InstanceId::new();
        let scheduler = Scheduler::new(
            storage.clone(),
            queue.clone(),
            config.scheduler.clone(),
            instance_id,
        );
        let reaper = Reaper::new(
            storage.clone(),
            queue.clone(),
            config.queue.reaper_interval_seconds,
            config.worker.liveness_threshold_seconds,
        );

        Arc::new(Self {
            storage,
            registry,
            queue,
            scheduler,
            reaper,
            metrics: Arc::new(ManagerMetrics::new()),
            config,
            workers: RwLock::new(Vec::new()),
            queue_names: RwLock::new(Vec::new()),
            running: std::sync::Mutex::new(None),
        })
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ManagerMetrics> {
        &self.metrics
    }

    /// Add a worker bound to `queue_name`; it isn't started until `start`
    /// runs. Uses the manager's default `WorkerConfig` unless `config` is
    /// given.
    pub fn add_worker(
        &self,
        id: impl Into<String>,
        queue_name: impl Into<String>,
        priority_filter: PriorityFilter,
        concurrency: ConcurrencyModel,
        config: Option<bk_config::WorkerConfig>,
    ) -> Arc<Worker> {
        let queue_name = queue_name.into();
        let worker = Worker::new(
            id,
            queue_name.clone(),
            priority_filter,
            concurrency,
            self.queue.clone(),
            self.registry.clone(),
            self.storage.clone(),
            config.unwrap_or_else(|| self.config.worker.clone()),
        );
        worker.set_metrics_sink(self.metrics.clone());
        self.workers
            .write()
            .expect("workers lock poisoned")
            .push(worker.clone());
        let mut queue_names = self.queue_names.write().expect("queue names lock poisoned");
        if !queue_names.contains(&queue_name) {
            queue_names.push(queue_name);
        }
        worker
    }

    /// Start the scheduler, the reaper, the metrics sync loop, and every
    /// registered worker.
    pub async fn start(&self) -> Result<()> {
        info!("job manager starting");
        let scheduler_handle = self.scheduler.clone().start();
        let reaper_handle = self.reaper.clone().start();

        let workers = self.workers.read().expect("workers lock poisoned").clone();
        let queue_names = self.queue_names.read().expect("queue names lock poisoned").clone();
        let metrics_sync = MetricsSync::new(
            self.queue.clone(),
            workers.clone(),
            queue_names,
            self.metrics.clone(),
            self.config.manager.metrics_sync_interval_seconds,
        );
        let metrics_sync_handle = metrics_sync.clone().start();

        let mut worker_handles = Vec::with_capacity(workers.len());
        for worker in workers {
            worker_handles.push(worker.start().await?);
        }

        *self.running.lock().expect("running lock poisoned") = Some(RunningHandles {
            scheduler: scheduler_handle,
            reaper: reaper_handle,
            metrics_sync,
            metrics_sync_handle,
            workers: worker_handles,
        });
        info!("job manager started");
        Ok(())
    }

    /// Stop the scheduler first (draining its distributed lock), then
    /// signal every worker to drain within `shutdown_deadline_seconds`,
    /// then stop the reaper. Storage has no explicit close in this
    /// contract; its connections are released when the last `Arc` drops.
    pub async fn shutdown(&self) {
        info!("job manager shutting down");
        let handles = self.running.lock().expect("running lock poisoned").take();

        self.scheduler.shutdown();

        let deadline = Duration::from_secs(self.config.manager.shutdown_deadline_seconds);
        let workers = self.workers.read().expect("workers lock poisoned").clone();
        for worker in &workers {
            worker.shutdown(deadline).await;
        }
        self.reaper.shutdown();

        if let Some(handles) = handles {
            handles.metrics_sync.shutdown();
            handles.scheduler.join().await;
            for worker_handle in handles.workers {
                worker_handle.join().await;
            }
            handles.reaper.join().await;
            handles.metrics_sync_handle.join().await;
        }
        info!("job manager stopped");
    }

    // ---- Job admin surface ----

    pub async fn enqueue(&self, spec: EnqueueSpec) -> Result<Id> {
        let id = self.queue.enqueue(spec).await?;
        self.metrics.record_enqueued();
        Ok(id)
    }

    pub async fn cancel(&self, job_id: &Id) -> Result<Job> {
        let job = self.queue.cancel(job_id).await?;
        self.metrics.record_cancelled();
        Ok(job)
    }

    pub async fn retry(&self, job_id: &Id) -> Result<Job> {
        let job = self.queue.retry(job_id).await?;
        self.metrics.record_retried();
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &Id) -> Result<Job> {
        self.queue.get(job_id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.queue.list(filter).await
    }

    pub async fn queue_statistics(&self, queue_name: &str) -> Result<QueueStatsRow> {
        self.queue.statistics(queue_name).await
    }

    pub async fn pause_queue(&self, queue_name: &str) -> Result<()> {
        self.queue.pause(queue_name).await
    }

    pub async fn resume_queue(&self, queue_name: &str) -> Result<()> {
        self.queue.resume(queue_name).await
    }

    // ---- Schedule admin surface ----

    pub async fn create_schedule(&self, spec: ScheduleSpec) -> Result<Id> {
        self.scheduler.create_schedule(spec).await
    }

    pub async fn get_schedule(&self, id: &Id) -> Result<Schedule> {
        self.scheduler.get_schedule(id).await
    }

    pub async fn list_schedules(&self, enabled_only: bool) -> Result<Vec<Schedule>> {
        self.scheduler.list_schedules(enabled_only).await
    }

    pub async fn update_schedule(&self, id: &Id, spec: ScheduleSpec) -> Result<Schedule> {
        self.scheduler.update_schedule(id, spec).await
    }

    pub async fn enable_schedule(&self, id: &Id) -> Result<Schedule> {
        self.scheduler.enable_schedule(id).await
    }

    pub async fn disable_schedule(&self, id: &Id) -> Result<Schedule> {
        self.scheduler.disable_schedule(id).await
    }

    pub async fn delete_schedule(&self, id: &Id) -> Result<()> {
        self.scheduler.delete_schedule(id).await
    }

    pub async fn trigger_schedule_now(&self, id: &Id, overrides: Option<ArgBundle>) -> Result<Id> {
        self.scheduler.trigger_now(id, overrides).await
    }

    pub async fn trigger_event(&self, topic: &str, payload: ArgBundle) -> Result<Vec<Id>> {
        self.scheduler.trigger_event(topic, payload).await
    }

    // ---- Worker and health introspection ----

    /// Every registered worker across the fleet, read back through Storage
    /// rather than the local `workers` list, since a production deployment
    /// runs more than one manager process sharing the same backend.
    pub async fn list_workers(&self) -> Result<Vec<WorkerRegistrationRow>> {
        self.storage.list_worker_registrations().await
    }

    pub async fn health(&self) -> Result<SystemHealth> {
        let mut components = Vec::new();

        match self.storage.health().await {
            Ok(health) if health.reachable => {
                components.push(ComponentHealth::healthy(
                    "storage",
                    health.message.unwrap_or_else(|| "reachable".to_string()),
                ));
            }
            Ok(health) => {
                components.push(ComponentHealth::unhealthy(
                    "storage",
                    health.message.unwrap_or_else(|| "unreachable".to_string()),
                ));
            }
            Err(e) => components.push(ComponentHealth::unhealthy("storage", e.to_string())),
        }

        components.push(ComponentHealth::healthy(
            "scheduler",
            format!("instance {}", self.scheduler.instance_id()),
        ));

        let liveness_threshold =
            chrono::Duration::seconds(self.config.worker.liveness_threshold_seconds as i64);
        let now = Utc::now();
        match self.storage.list_worker_registrations().await {
            Ok(registrations) if registrations.is_empty() => {
                components.push(ComponentHealth::degraded("workers", "no workers registered"));
            }
            Ok(registrations) => {
                for registration in registrations {
                    let age = now.signed_duration_since(registration.last_heartbeat_at);
                    if age > liveness_threshold {
                        components.push(ComponentHealth::unhealthy(
                            format!("worker:{}", registration.worker_id),
                            format!("no heartbeat in {}s", age.num_seconds()),
                        ));
                    } else {
                        components.push(ComponentHealth::healthy(
                            format!("worker:{}", registration.worker_id),
                            format!("{} jobs processed", registration.jobs_processed),
                        ));
                    }
                }
            }
            Err(e) => components.push(ComponentHealth::unhealthy("workers", e.to_string())),
        }

        Ok(SystemHealth::from_components(components))
    }
}
