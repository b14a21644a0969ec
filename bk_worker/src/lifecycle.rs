//! Worker lifecycle state, shared across every concurrency variant.

use std::fmt;

/// `CREATED -> STARTING -> RUNNING -> PAUSED? -> DRAINING -> STOPPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    Created,
    Starting,
    Running,
    Paused,
    Draining,
    Stopped,
}

impl WorkerLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerLifecycle::Created => "CREATED",
            WorkerLifecycle::Starting => "STARTING",
            WorkerLifecycle::Running => "RUNNING",
            WorkerLifecycle::Paused => "PAUSED",
            WorkerLifecycle::Draining => "DRAINING",
            WorkerLifecycle::Stopped => "STOPPED",
        }
    }

    /// Whether the reserve/execute loop should keep reserving new jobs in
    /// this state.
    pub fn accepts_new_work(self) -> bool {
        matches!(self, WorkerLifecycle::Running)
    }

    pub fn is_shutdown(self) -> bool {
        matches!(self, WorkerLifecycle::Draining | WorkerLifecycle::Stopped)
    }
}

impl fmt::Display for WorkerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_accepts_new_work() {
        assert!(WorkerLifecycle::Running.accepts_new_work());
        assert!(!WorkerLifecycle::Paused.accepts_new_work());
        assert!(!WorkerLifecycle::Draining.accepts_new_work());
    }

    #[test]
    fn draining_and_stopped_are_shutdown_states() {
        assert!(WorkerLifecycle::Draining.is_shutdown());
        assert!(WorkerLifecycle::Stopped.is_shutdown());
        assert!(!WorkerLifecycle::Running.is_shutdown());
    }
}
