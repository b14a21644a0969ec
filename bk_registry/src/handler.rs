use crate::context::JobContext;
use async_trait::async_trait;
use bk_core::{ArgBundle, Error, Id, Priority, Result, RetryPolicy};
use std::sync::Arc;

/// The invocation handle a Worker dispatches. Handler identity is opaque
/// beyond this contract: it receives a `JobContext` and the job's argument
/// bundle, and returns either a result payload or a domain error.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: JobContext, args: ArgBundle) -> Result<serde_json::Value>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(JobContext, ArgBundle) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value>> + Send,
{
    async fn execute(&self, ctx: JobContext, args: ArgBundle) -> Result<serde_json::Value> {
        (self)(ctx, args).await
    }
}

/// A hook invoked around execution; `before` may short-circuit the handler
/// by returning an error, `after` observes the outcome without changing it.
pub trait Middleware: Send + Sync {
    fn before(&self, _ctx: &JobContext, _args: &ArgBundle) -> Result<()> {
        Ok(())
    }

    fn after(&self, _ctx: &JobContext, _outcome: &Result<serde_json::Value>) {}
}

/// Whether a task's failures are normally retryable. Handlers that know a
/// given error class is never worth retrying (e.g. malformed input) can
/// install a stricter predicate via `TaskConfig::retryable_if`.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

fn default_retryable(_: &Error) -> bool {
    true
}

/// Static, per-task configuration bundled alongside the handler.
#[derive(Clone)]
pub struct TaskConfig {
    pub retry_policy: RetryPolicy,
    pub retryable: RetryPredicate,
    pub timeout_seconds: u64,
    pub queue_default: String,
    pub priority_default: Priority,
    pub unique_key_fn: Option<Arc<dyn Fn(&ArgBundle) -> Option<String> + Send + Sync>>,
    pub is_async: bool,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub resource_hints: std::collections::HashMap<String, String>,
    pub on_success: Option<Arc<dyn Fn(&Id, &serde_json::Value) + Send + Sync>>,
    pub on_failure: Option<Arc<dyn Fn(&Id, &Error) + Send + Sync>>,
    pub on_retry: Option<Arc<dyn Fn(&Id, u32) + Send + Sync>>,
}

impl std::fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskConfig")
            .field("retry_policy", &self.retry_policy)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("queue_default", &self.queue_default)
            .field("priority_default", &self.priority_default)
            .field("is_async", &self.is_async)
            .field("middleware_count", &self.middleware.len())
            .finish()
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            retryable: Arc::new(default_retryable),
            timeout_seconds: 300,
            queue_default: "default".to_string(),
            priority_default: Priority::Normal,
            unique_key_fn: None,
            is_async: true,
            middleware: Vec::new(),
            resource_hints: std::collections::HashMap::new(),
            on_success: None,
            on_failure: None,
            on_retry: None,
        }
    }
}

impl TaskConfig {
    pub fn retryable_if(mut self, predicate: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// A registered task: its handler plus its static configuration.
#[derive(Clone)]
pub struct TaskEntry {
    pub name: String,
    pub version: Option<String>,
    pub handler: Arc<dyn TaskHandler>,
    pub config: TaskConfig,
}
