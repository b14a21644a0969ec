//! ABOUTME: Coordinating layer owning Storage, Queue, Workers, Scheduler, and TaskRegistry
//! ABOUTME: Exposes the administrative surface, the reaper, and graceful shutdown sequencing

pub mod health;
pub mod manager;
pub mod metrics;
pub mod metrics_sync;
pub mod reaper;

pub use health::{ComponentHealth, HealthStatus, SystemHealth};
pub use manager::JobManager;
pub use metrics::ManagerMetrics;
pub use metrics_sync::{MetricsSync, MetricsSyncHandle};
pub use reaper::{ReapOutcome, Reaper, ReaperHandle};
