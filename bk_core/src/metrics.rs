//! The narrow seam `bk_worker` reports job lifecycle events through,
//! without depending on whatever crate actually aggregates them.
//! `bk_manager::ManagerMetrics` is the one real implementation; tests and
//! standalone workers get `NoopMetricsSink` by default.

use std::sync::Arc;

/// Job lifecycle events a worker emits. Every method has a no-op default
/// so an implementor only needs to override what it cares about.
pub trait MetricsSink: Send + Sync {
    fn record_started(&self) {}
    fn record_completed(&self, _execution_seconds: f64) {}
    fn record_failed(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

/// Convenience default so callers can write `MetricsSink::default_sink()`
/// at construction time instead of spelling out the `Arc::new` dance.
pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetricsSink)
}
