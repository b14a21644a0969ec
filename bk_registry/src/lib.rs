//! ABOUTME: Task registry mapping task name and version to an executable handler
//! ABOUTME: Carries the static per-task configuration workers dispatch against

pub mod context;
pub mod handler;
pub mod registry;

pub use context::JobContext;
pub use handler::{Middleware, RetryPredicate, TaskConfig, TaskEntry, TaskHandler};
pub use registry::TaskRegistry;
