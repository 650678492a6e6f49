//! Task handler contract and adapters.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use conveyor_core::JobId;

/// Failure reported by a task handler.
///
/// Carries a human-readable message plus optional structured detail; both end
/// up in the job's log entry for the failed step.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub detail: Option<JsonValue>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(message: impl Into<String>, detail: JsonValue) -> Self {
        Self {
            message: message.into(),
            detail: Some(detail),
        }
    }

    /// The payload recorded in the log entry's `error` field.
    pub fn to_log_payload(&self) -> JsonValue {
        match &self.detail {
            Some(detail) => serde_json::json!({ "message": self.message, "detail": detail }),
            None => serde_json::json!({ "message": self.message }),
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid task input: {err}"))
    }
}

/// Everything a handler can see about the step it is executing.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job_id: JobId,
    /// Step identity within the job: the workflow step id, or the task slug
    /// itself for single-task jobs.
    pub task_id: String,
    pub task_slug: String,
    /// 1-based execution attempt for this step, counting retries.
    pub attempt: u32,
    /// The job's input payload.
    pub input: JsonValue,
    /// Outputs of previously succeeded steps in the same job, keyed by step id.
    pub step_outputs: serde_json::Map<String, JsonValue>,
}

/// A unit of work that can be dispatched by the runner.
///
/// Handlers must be cancel-safe at await points only in the sense that the
/// runner never aborts them mid-flight; cancellation prevents future claims,
/// it does not preempt a running handler.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<JsonValue, TaskError>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, TaskError>> + Send,
{
    async fn run(&self, ctx: TaskContext) -> Result<JsonValue, TaskError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, TaskError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct TypedHandler<I, O, F> {
    f: F,
    _io: PhantomData<fn(I) -> O>,
}

#[async_trait::async_trait]
impl<I, O, F, Fut> TaskHandler for TypedHandler<I, O, F>
where
    I: DeserializeOwned + Send,
    O: Serialize,
    F: Fn(I, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, TaskError>> + Send,
{
    async fn run(&self, ctx: TaskContext) -> Result<JsonValue, TaskError> {
        let input: I = serde_json::from_value(ctx.input.clone())?;
        let output = (self.f)(input, ctx).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Wrap an async closure over typed input/output as a [`TaskHandler`].
///
/// The job's JSON input is deserialized into `I` before the closure runs; a
/// shape mismatch fails the step like any other handler error.
pub fn typed_handler<I, O, F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
    F: Fn(I, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
{
    Arc::new(TypedHandler { f, _io: PhantomData })
}
