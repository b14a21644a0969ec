//! ABOUTME: Worker runtime that reserves and executes jobs under a chosen concurrency model
//! ABOUTME: Shared lifecycle, heartbeat, and dispatch loop for all five concurrency variants

pub mod lifecycle;
pub mod metrics;
pub mod variant;
pub mod worker;

pub use lifecycle::WorkerLifecycle;
pub use metrics::WorkerMetrics;
pub use variant::ConcurrencyModel;
pub use worker::{Worker, WorkerHandle, WorkerHealth};
