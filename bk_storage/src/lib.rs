//! ABOUTME: Storage contract consumed by the queue, scheduler, and worker registry
//! ABOUTME: Defines the trait every persistence backend must implement, not a driver itself

pub mod filter;
pub mod lock;
pub mod rows;
pub mod storage;

pub use filter::{JobFilter, JobMutation};
pub use lock::InstanceId;
pub use rows::{
    JobRow, LockRow, QueueRow, QueueStatsRow, ScheduleRow, StorageHealth, WorkerRegistrationRow,
};
pub use storage::Storage;
