//! ABOUTME: Priority-ordered, persistent job queue with reservation semantics
//! ABOUTME: enqueue/reserve/start/complete/fail/cancel/retry plus pause, prune, and the reaper

pub mod job;
pub mod spec;
pub mod state_machine;

mod queue;

pub use bk_storage::{JobFilter, QueueStatsRow};
pub use job::Job;
pub use queue::Queue;
pub use spec::EnqueueSpec;
pub use state_machine::{transition, InvalidTransition, Trigger};
