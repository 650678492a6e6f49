//! `conveyor-engine` — durable job queueing, selection, execution and
//! cancellation.
//!
//! Submissions become [`Job`] records in a [`JobStore`]. Batch runs select
//! eligible records, claim each one atomically and dispatch it through the
//! registered task or workflow definition. Failures feed the retry schedule;
//! cancellation writes terminal state directly and bypasses the runner.

pub mod batch;
pub mod cancel;
pub mod config;
mod runner;
pub mod store;
pub mod submit;
pub mod worker;

use std::sync::Arc;

use thiserror::Error;

use conveyor_auth::{AccessError, AccessGate, AllowAll, QueueAction};

use crate::runner::JobRunner;

pub use crate::batch::{RunByIdOptions, RunByIdResult, RunOptions, RunSummary};
pub use crate::cancel::CancelOptions;
pub use crate::config::{OrderConfig, QueueConfig};
pub use crate::store::{
    InMemoryJobStore, JobFilter, JobPage, JobStore, JobStoreError, JobUpdate, NewJob,
    OrderDirection, OrderField, ProcessingOrder, UpdateOptions,
};
pub use crate::submit::{
    DirectWriter, JobHook, JobWriter, PipelineWriter, QueueRequest,
};
pub use crate::worker::{WorkerConfig, WorkerHandle};

pub use conveyor_auth::Actor;
pub use conveyor_core::{
    DomainError, Job, JobId, JobLogEntry, JobOutcome, JobState, RetryPolicy, StepState, Target,
};
pub use conveyor_registry::{
    Registry, TaskContext, TaskDefinition, TaskError, WorkflowDefinition, handler_fn,
    typed_handler,
};

/// Operation-level failure of a queue API call.
///
/// Per-job handler failures never surface here; they are recorded on the job
/// and summarized by the batch result.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0}")]
    Domain(#[from] DomainError),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("access denied: {0}")]
    AccessDenied(#[from] AccessError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// How an operation authenticates against the access gate.
#[derive(Debug, Clone, Default)]
pub enum Access {
    /// Skip the gate; the operation runs with full access. The default for
    /// trusted in-process callers.
    #[default]
    Override,
    /// Consult the gate as this actor before touching any job.
    As(Actor),
}

/// The queue facade: submit, run, cancel.
///
/// Cheap to share behind an [`Arc`]; all operations take `&self`.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    gate: Arc<dyn AccessGate>,
    writer: Arc<dyn JobWriter>,
    config: QueueConfig,
    runner: JobRunner,
}

impl JobQueue {
    pub fn builder(registry: Registry) -> JobQueueBuilder {
        JobQueueBuilder {
            registry: Arc::new(registry),
            store: None,
            gate: Arc::new(AllowAll),
            config: QueueConfig::default(),
            hooks: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Submit a job and immediately execute it, returning both the created
    /// record and the run result.
    ///
    /// Not atomic: a crash between the two steps leaves a pending job behind,
    /// which the next batch run picks up normally.
    pub async fn queue_and_run(
        &self,
        request: QueueRequest,
    ) -> Result<QueueAndRunResult, QueueError> {
        let job = self.queue(request).await?;
        let run = self
            .run_by_id(job.id, RunByIdOptions::returning_task_output())
            .await?;
        Ok(QueueAndRunResult { job, run })
    }

    pub(crate) fn check_access(
        &self,
        access: &Access,
        action: QueueAction,
    ) -> Result<(), QueueError> {
        match access {
            Access::Override => Ok(()),
            Access::As(actor) => {
                self.gate.check(actor, action)?;
                Ok(())
            }
        }
    }
}

/// Result of [`JobQueue::queue_and_run`].
#[derive(Debug, Clone)]
pub struct QueueAndRunResult {
    /// The job as created, before execution.
    pub job: Job,
    pub run: RunByIdResult,
}

/// Builder for [`JobQueue`]. Defaults: in-memory store, allow-all gate,
/// default configuration, no hooks.
pub struct JobQueueBuilder {
    registry: Arc<Registry>,
    store: Option<Arc<dyn JobStore>>,
    gate: Arc<dyn AccessGate>,
    config: QueueConfig,
    hooks: Vec<Arc<dyn JobHook>>,
}

impl JobQueueBuilder {
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an after-create hook. Any registered hook forces the pipeline
    /// write path regardless of configuration.
    pub fn hook(mut self, hook: Arc<dyn JobHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> JobQueue {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));

        // The write-path strategy is fixed here, not re-evaluated per call.
        let writer: Arc<dyn JobWriter> = if self.config.direct_writes() && self.hooks.is_empty() {
            Arc::new(DirectWriter::new(store.clone()))
        } else {
            Arc::new(PipelineWriter::new(
                store.clone(),
                self.gate.clone(),
                self.hooks,
            ))
        };

        JobQueue {
            runner: JobRunner::new(store.clone(), self.registry.clone()),
            store,
            registry: self.registry,
            gate: self.gate,
            writer,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::builder()
            .task(TaskDefinition::new(
                "greet",
                handler_fn(|ctx| async move {
                    let name = ctx.input["name"].as_str().unwrap_or("world");
                    Ok(json!(format!("hello {name}")))
                }),
            ))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn queue_and_run_returns_the_job_and_its_output() {
        let queue = JobQueue::builder(registry()).build();

        let result = queue
            .queue_and_run(QueueRequest::task("greet", json!({"name": "ada"})))
            .await
            .unwrap();

        assert_eq!(
            result.run.summary.job_status.get(&result.job.id),
            Some(&JobOutcome::Success)
        );
        let output = result.run.task_output.unwrap();
        assert_eq!(output.get("greet"), Some(&json!("hello ada")));
        // The returned job is the pre-execution snapshot.
        assert!(result.job.completed_at.is_none());
    }

    #[test]
    fn access_defaults_to_override() {
        assert!(matches!(Access::default(), Access::Override));
    }
}
