//! Periodically folds queue depth and worker occupancy into
//! `ManagerMetrics`'s gauges, grounded in the same spawned-interval-loop
//! idiom as `Reaper`. Per-job counters and the execution histogram are
//! updated as the events happen (see `Worker::set_metrics_sink`); gauges
//! are sampled since "how many workers are busy right now" has no single
//! event to hang off of.

use crate::metrics::ManagerMetrics;
use bk_queue::Queue;
use bk_worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct MetricsSyncHandle {
    join: JoinHandle<()>,
}

impl MetricsSyncHandle {
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

pub struct MetricsSync {
    queue: Arc<Queue>,
    workers: Vec<Arc<Worker>>,
    queue_names: Vec<String>,
    metrics: Arc<ManagerMetrics>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl MetricsSync {
    pub fn new(
        queue: Arc<Queue>,
        workers: Vec<Arc<Worker>>,
        queue_names: Vec<String>,
        metrics: Arc<ManagerMetrics>,
        interval_seconds: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            workers,
            queue_names,
            metrics,
            interval: Duration::from_secs(interval_seconds.max(1)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn start(self: Arc<Self>) -> MetricsSyncHandle {
        info!(interval = ?self.interval, "metrics sync starting");
        let join = tokio::spawn(self.run_loop());
        MetricsSyncHandle { join }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(e) = self.tick_once().await {
                error!(error = %e, "metrics sync tick failed");
            }
        }
        info!("metrics sync stopped");
    }

    pub async fn tick_once(&self) -> bk_core::Result<()> {
        let mut pending = 0i64;
        for queue_name in &self.queue_names {
            let stats = self.queue.statistics(queue_name).await?;
            pending += stats.pending + stats.retrying;
        }
        self.metrics.set_queue_length(pending);

        let busy = self
            .workers
            .iter()
            .filter(|w| w.health().in_flight > 0)
            .count() as i64;
        let idle = self.workers.len() as i64 - busy;
        self.metrics.set_worker_occupancy(busy, idle);
        Ok(())
    }
}
