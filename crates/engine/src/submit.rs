//! Queue submission: validation, queue-name resolution and the write path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use conveyor_auth::{AccessGate, QueueAction};
use conveyor_core::{DomainError, DomainResult, Job, Target};
use conveyor_registry::Registry;

use crate::store::{JobStore, NewJob};
use crate::{Access, JobQueue, QueueError};

/// A submission to enqueue one task or workflow invocation.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub target: Target,
    pub input: JsonValue,
    /// Explicit queue name; wins over the workflow's declared default.
    pub queue: Option<String>,
    /// Defer eligibility until this time.
    pub wait_until: Option<DateTime<Utc>>,
    pub access: Access,
}

impl QueueRequest {
    pub fn task(slug: impl Into<String>, input: JsonValue) -> Self {
        Self::new(Target::task(slug), input)
    }

    pub fn workflow(slug: impl Into<String>, input: JsonValue) -> Self {
        Self::new(Target::workflow(slug), input)
    }

    pub fn new(target: Target, input: JsonValue) -> Self {
        Self {
            target,
            input,
            queue: None,
            wait_until: None,
            access: Access::Override,
        }
    }

    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn delay_until(mut self, at: DateTime<Utc>) -> Self {
        self.wait_until = Some(at);
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }
}

/// Side effects observed after a job record is created.
///
/// Only the pipeline write path runs hooks; the direct path is chosen
/// precisely when none are configured.
#[async_trait::async_trait]
pub trait JobHook: Send + Sync {
    async fn after_create(&self, job: &Job);
}

/// Strategy for persisting newly submitted jobs, selected once when the
/// queue is built rather than branched per call.
#[async_trait::async_trait]
pub trait JobWriter: Send + Sync {
    async fn write(&self, new_job: NewJob, access: &Access) -> Result<Job, QueueError>;
}

/// Fast path: write straight to storage, no gate, no hooks.
///
/// Must produce an externally identical job shape to [`PipelineWriter`].
pub struct DirectWriter {
    store: Arc<dyn JobStore>,
}

impl DirectWriter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl JobWriter for DirectWriter {
    async fn write(&self, new_job: NewJob, _access: &Access) -> Result<Job, QueueError> {
        Ok(self.store.create(new_job).await?)
    }
}

/// Full pipeline: access gate, storage write, then after-create hooks.
pub struct PipelineWriter {
    store: Arc<dyn JobStore>,
    gate: Arc<dyn AccessGate>,
    hooks: Vec<Arc<dyn JobHook>>,
}

impl PipelineWriter {
    pub fn new(
        store: Arc<dyn JobStore>,
        gate: Arc<dyn AccessGate>,
        hooks: Vec<Arc<dyn JobHook>>,
    ) -> Self {
        Self { store, gate, hooks }
    }
}

#[async_trait::async_trait]
impl JobWriter for PipelineWriter {
    async fn write(&self, new_job: NewJob, access: &Access) -> Result<Job, QueueError> {
        if let Access::As(actor) = access {
            self.gate.check(actor, QueueAction::Enqueue)?;
        }

        let job = self.store.create(new_job).await?;
        for hook in &self.hooks {
            hook.after_create(&job).await;
        }
        Ok(job)
    }
}

/// Resolve the effective queue name: explicit argument, then the workflow's
/// declared default, then none.
pub(crate) fn resolve_queue(
    registry: &Registry,
    target: &Target,
    explicit: Option<String>,
) -> Option<String> {
    explicit.or_else(|| registry.default_queue(target).map(str::to_string))
}

pub(crate) fn validate_target(registry: &Registry, target: &Target) -> DomainResult<()> {
    if registry.contains(target) {
        return Ok(());
    }
    let kind = if target.is_workflow() {
        "workflow"
    } else {
        "task"
    };
    Err(DomainError::validation(format!(
        "unknown {kind} slug '{}'",
        target.slug()
    )))
}

impl JobQueue {
    /// Enqueue a task or workflow invocation as a durable job record.
    pub async fn queue(&self, request: QueueRequest) -> Result<Job, QueueError> {
        validate_target(&self.registry, &request.target)?;

        let queue = resolve_queue(&self.registry, &request.target, request.queue);
        let new_job = NewJob {
            input: request.input,
            target: request.target,
            queue,
            wait_until: request.wait_until,
        };

        let job = self.writer.write(new_job, &request.access).await?;
        debug!(job_id = %job.id, queue = ?job.queue, "job queued");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conveyor_auth::{Actor, AllowAll, PermissionGate};
    use conveyor_registry::{TaskDefinition, WorkflowDefinition, handler_fn};
    use serde_json::json;

    use crate::store::InMemoryJobStore;

    fn registry() -> Registry {
        Registry::builder()
            .task(TaskDefinition::new(
                "send-email",
                handler_fn(|_ctx| async { Ok(json!(null)) }),
            ))
            .workflow(
                WorkflowDefinition::new("onboarding")
                    .with_queue("nightly")
                    .step("welcome", "send-email"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn task_submission_without_queue_stays_unassigned() {
        let queue = JobQueue::builder(registry()).build();
        let job = queue
            .queue(QueueRequest::task("send-email", json!({"to": "a@b.c"})))
            .await
            .unwrap();

        assert_eq!(job.queue, None);
        assert_eq!(job.input, json!({"to": "a@b.c"}));
    }

    #[tokio::test]
    async fn workflow_submission_inherits_the_declared_queue() {
        let queue = JobQueue::builder(registry()).build();
        let job = queue
            .queue(QueueRequest::workflow("onboarding", json!({})))
            .await
            .unwrap();

        assert_eq!(job.queue.as_deref(), Some("nightly"));
    }

    #[tokio::test]
    async fn explicit_queue_wins_over_the_workflow_default() {
        let queue = JobQueue::builder(registry()).build();
        let job = queue
            .queue(QueueRequest::workflow("onboarding", json!({})).in_queue("urgent"))
            .await
            .unwrap();

        assert_eq!(job.queue.as_deref(), Some("urgent"));
    }

    #[tokio::test]
    async fn unknown_slugs_are_rejected_before_any_write() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::builder(registry()).store(store.clone()).build();

        let err = queue
            .queue(QueueRequest::task("nope", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueueError::Domain(DomainError::Validation(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn kind_mismatch_is_a_validation_error() {
        let queue = JobQueue::builder(registry()).build();

        // "onboarding" exists, but as a workflow.
        let err = queue
            .queue(QueueRequest::task("onboarding", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::Domain(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn both_write_paths_produce_the_same_job_shape() {
        let direct = JobQueue::builder(registry()).build();
        let pipeline = JobQueue::builder(registry())
            .config(crate::QueueConfig {
                run_hooks: true,
                ..Default::default()
            })
            .gate(Arc::new(AllowAll))
            .build();

        let a = direct
            .queue(QueueRequest::workflow("onboarding", json!({"x": 1})).in_queue("urgent"))
            .await
            .unwrap();
        let b = pipeline
            .queue(QueueRequest::workflow("onboarding", json!({"x": 1})).in_queue("urgent"))
            .await
            .unwrap();

        let mut a = serde_json::to_value(&a).unwrap();
        let mut b = serde_json::to_value(&b).unwrap();
        for value in [&mut a, &mut b] {
            let map = value.as_object_mut().unwrap();
            map.remove("id");
            map.remove("created_at");
            map.remove("updated_at");
        }
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn pipeline_gate_vetoes_before_any_write() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::builder(registry())
            .store(store.clone())
            .gate(Arc::new(PermissionGate))
            .config(crate::QueueConfig {
                run_hooks: true,
                ..Default::default()
            })
            .build();

        let err = queue
            .queue(
                QueueRequest::task("send-email", json!({}))
                    .with_access(Access::As(Actor::anonymous())),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::AccessDenied(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn hooks_observe_created_jobs_on_the_pipeline_path() {
        struct Counter(AtomicUsize);

        #[async_trait::async_trait]
        impl JobHook for Counter {
            async fn after_create(&self, _job: &Job) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = JobQueue::builder(registry())
            .config(crate::QueueConfig {
                run_hooks: true,
                ..Default::default()
            })
            .hook(counter.clone())
            .build();

        queue
            .queue(QueueRequest::task("send-email", json!({})))
            .await
            .unwrap();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
