//! ABOUTME: Core types, errors, IDs, priority, and tracing utilities
//! ABOUTME: Foundation crate used by every other bk_* component

pub mod args;
pub mod error;
pub mod id;
pub mod metrics;
pub mod priority;
pub mod retry;
pub mod status;
pub mod telemetry;
pub mod time;

pub use args::ArgBundle;
pub use error::{Error, ErrorRecord, Result};
pub use id::Id;
pub use metrics::{noop_sink, MetricsSink, NoopMetricsSink};
pub use priority::{Priority, PriorityFilter};
pub use retry::RetryPolicy;
pub use status::JobStatus;
pub use time::{now_iso8601, to_rfc3339, utc_now, MonotonicTimer};
