use bk_core::Id;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Everything a handler receives alongside its arguments: identity,
/// cancellation, and the effective deadline the worker computed as
/// `min(reservation_deadline, now + task_timeout)`.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Id,
    pub attempt: u32,
    pub metadata: HashMap<String, String>,
    pub deadline: DateTime<Utc>,
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: Id, attempt: u32, deadline: DateTime<Utc>) -> Self {
        Self {
            job_id,
            attempt,
            metadata: HashMap::new(),
            deadline,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The token the worker cancels on cooperative-cancellation request;
    /// handlers should `select!` against `cancelled()` on long-running work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}
