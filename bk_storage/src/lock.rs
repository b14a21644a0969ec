//! Identity of a process competing for named locks (scheduler singleton,
//! reaper at-most-one-runner).

use std::fmt;

/// Unique identifier for a running process instance, used as the holder
/// value for named locks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// Derive an instance id from the local hostname and process id.
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self(format!("{host}:{}", std::process::id()))
    }

    /// Build an instance id from an arbitrary string, for tests that need
    /// deterministic or simulated competing holders.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
