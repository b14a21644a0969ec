//! ABOUTME: Distributed scheduler that materializes jobs from recurring schedules
//! ABOUTME: Owns the per-fleet tick lock, missed-fire policy, and manual triggering surface

pub mod distributed_lock;
pub mod kind;
pub mod schedule;
pub mod scheduler;
pub mod spec;

pub use distributed_lock::SchedulerLock;
pub use kind::ScheduleKind;
pub use schedule::Schedule;
pub use scheduler::{Scheduler, SchedulerHandle, TickOutcome};
pub use spec::ScheduleSpec;
