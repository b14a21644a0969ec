/// Core error taxonomy shared by every bk_* crate.
///
/// Variants map onto the error kinds a producer, worker, or administrator can
/// observe: validation and ownership problems are caller mistakes, storage
/// unavailability is transient and retried internally before it ever reaches
/// here, and `Fatal` indicates a contract violation from the storage layer
/// that should stop the owning worker rather than compound the damage.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("uniqueness violated: {0}")]
    Uniqueness(String),

    #[error("queue paused: {0}")]
    QueuePaused(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wrong owner: {0}")]
    WrongOwner(String),

    #[error("task execution failed: {0}")]
    TaskExecution(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("fatal storage contract violation: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error kind represents a transient condition that callers
    /// may reasonably retry without changing their request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }

    /// The stable taxonomy name for this error kind (§7), used to build
    /// `ErrorRecord`s and to label the metrics surface by `error_kind`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Validation(_) => "Validation",
            Error::Uniqueness(_) => "Uniqueness",
            Error::QueuePaused(_) => "QueuePaused",
            Error::NotFound(_) => "NotFound",
            Error::WrongOwner(_) => "WrongOwner",
            Error::TaskExecution(_) => "TaskExecution",
            Error::Timeout(_) => "Timeout",
            Error::Cancelled(_) => "Cancelled",
            Error::StorageUnavailable(_) => "StorageUnavailable",
            Error::Fatal(_) => "Fatal",
            Error::Config(_) => "Config",
            Error::Io(_) => "Io",
        }
    }

    /// Build a structured `ErrorRecord` from this error, for persistence on
    /// a job's error field.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.kind_name(), self.to_string())
    }
}

/// A structured error record persisted on a job: kind taxonomy (§7), a
/// human-readable message, and an optional structured detail blob (e.g. a
/// truncation-bounded backtrace string under a `backtrace` key).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

/// Backtraces are truncated to this many bytes before being stored, so a
/// pathological handler panic can't balloon a job row.
const BACKTRACE_TRUNCATION_BYTES: usize = 8192;

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        let mut backtrace = backtrace.into();
        if backtrace.len() > BACKTRACE_TRUNCATION_BYTES {
            backtrace.truncate(BACKTRACE_TRUNCATION_BYTES);
            backtrace.push_str("...[truncated]");
        }
        self.detail = Some(serde_json::json!({ "backtrace": backtrace }));
        self
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_unavailable_is_transient() {
        let err = Error::StorageUnavailable("timeout".into());
        assert!(err.is_transient());
    }

    #[test]
    fn validation_is_not_transient() {
        let err = Error::Validation("missing field".into());
        assert!(!err.is_transient());
    }
}
