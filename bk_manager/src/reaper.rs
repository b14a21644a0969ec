//! The background sweep that compensates stuck job reservations and prunes
//! stale worker registrations, grounded in the same spawned-interval-loop
//! idiom as `gl_scheduler::JobScheduler::start`'s lock cleanup task.

use bk_queue::Queue;
use bk_storage::Storage;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts from a single `Reaper::tick_once` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub expired_reservations_compensated: usize,
    pub retries_promoted: usize,
    pub stale_workers_removed: usize,
}

pub struct ReaperHandle {
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Sweeps reservations whose lease expired without a completion report and
/// removes worker registrations nobody has heartbeat for a while, so
/// `JobManager::list_workers`/`health` never reports a ghost.
pub struct Reaper {
    storage: Arc<dyn Storage>,
    queue: Arc<Queue>,
    interval: Duration,
    liveness_threshold: ChronoDuration,
    shutdown: CancellationToken,
}

impl Reaper {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<Queue>,
        interval_seconds: u64,
        liveness_threshold_seconds: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            queue,
            interval: Duration::from_secs(interval_seconds.max(1)),
            liveness_threshold: ChronoDuration::seconds(liveness_threshold_seconds.max(1) as i64),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn start(self: Arc<Self>) -> ReaperHandle {
        info!(interval = ?self.interval, "reaper starting");
        let join = tokio::spawn(self.run_loop());
        ReaperHandle { join }
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
            match self.tick_once().await {
                Ok(outcome) if outcome != ReapOutcome::default() => {
                    debug!(?outcome, "reaper tick compensated state");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "reaper tick failed"),
            }
        }
        info!("reaper stopped");
    }

    pub async fn tick_once(&self) -> bk_core::Result<ReapOutcome> {
        let now = Utc::now();
        let expired_reservations_compensated = self.queue.reap_expired(now).await?;
        let retries_promoted = self.queue.promote_ready_retries(now).await?;
        let stale_workers_removed = self.sweep_stale_workers(now).await?;
        Ok(ReapOutcome {
            expired_reservations_compensated,
            retries_promoted,
            stale_workers_removed,
        })
    }

    async fn sweep_stale_workers(&self, now: chrono::DateTime<Utc>) -> bk_core::Result<usize> {
        let threshold = now - self.liveness_threshold;
        let stale = self.storage.find_stale_worker_registrations(threshold).await?;
        let mut removed = 0;
        for registration in stale {
            self.storage
                .remove_worker_registration(&registration.worker_id)
                .await?;
            warn!(worker_id = %registration.worker_id, "removed stale worker registration");
            removed += 1;
        }
        Ok(removed)
    }
}
