//! Manager-wide Prometheus metrics, following the same flat-counter style
//! as `gl_db::metrics::PoolMetrics` and `gl_obs::Metrics`: a `Registry` plus
//! a handful of named counters/gauges/histograms, exposed through
//! `ManagerMetrics::encode` for the out-of-scope admin collaborator to
//! scrape.

use bk_core::{MetricsSink, Result};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge, histogram::Histogram};
use prometheus_client::registry::Registry;
use std::sync::Mutex;

pub struct ManagerMetrics {
    registry: Mutex<Registry>,
    pub jobs_enqueued_total: Counter,
    pub jobs_started_total: Counter,
    pub jobs_completed_total: Counter,
    pub jobs_failed_total: Counter,
    pub jobs_retried_total: Counter,
    pub jobs_cancelled_total: Counter,
    pub queue_length: Gauge,
    pub workers_busy: Gauge,
    pub workers_idle: Gauge,
    pub job_execution_seconds: Histogram,
    pub job_wait_seconds: Histogram,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let jobs_enqueued_total = Counter::default();
        registry.register("jobs_enqueued", "Total jobs enqueued", jobs_enqueued_total.clone());

        let jobs_started_total = Counter::default();
        registry.register("jobs_started", "Total jobs started", jobs_started_total.clone());

        let jobs_completed_total = Counter::default();
        registry.register("jobs_completed", "Total jobs completed", jobs_completed_total.clone());

        let jobs_failed_total = Counter::default();
        registry.register("jobs_failed", "Total jobs failed", jobs_failed_total.clone());

        let jobs_retried_total = Counter::default();
        registry.register("jobs_retried", "Total jobs retried", jobs_retried_total.clone());

        let jobs_cancelled_total = Counter::default();
        registry.register("jobs_cancelled", "Total jobs cancelled", jobs_cancelled_total.clone());

        let queue_length = Gauge::default();
        registry.register("queue_length", "Pending job count across watched queues", queue_length.clone());

        let workers_busy = Gauge::default();
        registry.register("workers_busy", "Workers currently holding at least one job", workers_busy.clone());

        let workers_idle = Gauge::default();
        registry.register("workers_idle", "Workers holding no jobs", workers_idle.clone());

        let job_execution_seconds = Histogram::new([0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0].into_iter());
        registry.register(
            "job_execution_seconds",
            "Job handler execution duration",
            job_execution_seconds.clone(),
        );

        let job_wait_seconds = Histogram::new([0.01, 0.1, 1.0, 10.0, 60.0, 300.0].into_iter());
        registry.register("job_wait_seconds", "Time a job spent pending before reservation", job_wait_seconds.clone());

        Self {
            registry: Mutex::new(registry),
            jobs_enqueued_total,
            jobs_started_total,
            jobs_completed_total,
            jobs_failed_total,
            jobs_retried_total,
            jobs_cancelled_total,
            queue_length,
            workers_busy,
            workers_idle,
            job_execution_seconds,
            job_wait_seconds,
        }
    }

    pub fn record_enqueued(&self) {
        self.jobs_enqueued_total.inc();
    }

    pub fn record_started(&self) {
        self.jobs_started_total.inc();
    }

    pub fn record_completed(&self, execution_seconds: f64) {
        self.jobs_completed_total.inc();
        self.job_execution_seconds.observe(execution_seconds);
    }

    pub fn record_failed(&self) {
        self.jobs_failed_total.inc();
    }

    pub fn record_retried(&self) {
        self.jobs_retried_total.inc();
    }

    pub fn record_cancelled(&self) {
        self.jobs_cancelled_total.inc();
    }

    pub fn set_queue_length(&self, length: i64) {
        self.queue_length.set(length);
    }

    pub fn set_worker_occupancy(&self, busy: i64, idle: i64) {
        self.workers_busy.set(busy);
        self.workers_idle.set(idle);
    }

    pub fn encode(&self) -> Result<String> {
        let registry = self
            .registry
            .lock()
            .map_err(|e| bk_core::Error::Fatal(format!("metrics registry lock poisoned: {e}")))?;
        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| bk_core::Error::Fatal(format!("failed to encode metrics: {e}")))?;
        Ok(buffer)
    }
}

impl Default for ManagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets `Worker` report its lifecycle events straight into the manager's
/// counters/histogram without `bk_worker` depending on `bk_manager`.
impl MetricsSink for ManagerMetrics {
    fn record_started(&self) {
        self.record_started();
    }

    fn record_completed(&self, execution_seconds: f64) {
        self.record_completed(execution_seconds);
    }

    fn record_failed(&self) {
        self.record_failed();
    }
}
