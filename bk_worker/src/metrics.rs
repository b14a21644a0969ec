//! Worker-local counters, read back through `Worker::metrics` for §6
//! introspection and, at the manager level, folded into `prometheus-client`
//! gauges.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct WorkerMetrics {
    pub jobs_reserved: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_timed_out: AtomicU64,
    pub jobs_cancelled: AtomicU64,
}

impl Clone for WorkerMetrics {
    fn clone(&self) -> Self {
        Self {
            jobs_reserved: AtomicU64::new(self.jobs_reserved.load(Ordering::Relaxed)),
            jobs_completed: AtomicU64::new(self.jobs_completed.load(Ordering::Relaxed)),
            jobs_failed: AtomicU64::new(self.jobs_failed.load(Ordering::Relaxed)),
            jobs_timed_out: AtomicU64::new(self.jobs_timed_out.load(Ordering::Relaxed)),
            jobs_cancelled: AtomicU64::new(self.jobs_cancelled.load(Ordering::Relaxed)),
        }
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            jobs_reserved: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
        }
    }

    pub fn reserved(&self) -> u64 {
        self.jobs_reserved.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.jobs_timed_out.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.jobs_cancelled.load(Ordering::Relaxed)
    }
}
