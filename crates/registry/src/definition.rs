//! Task and workflow definitions.
//!
//! Definitions are declarative and immutable once the registry is built; the
//! runner treats them as a static lookup table.

use std::sync::Arc;

use conveyor_core::RetryPolicy;

use crate::handler::TaskHandler;

/// A registered task: slug, handler and retry policy.
#[derive(Clone)]
pub struct TaskDefinition {
    pub slug: String,
    pub handler: Arc<dyn TaskHandler>,
    pub retry_policy: RetryPolicy,
}

impl TaskDefinition {
    pub fn new(slug: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            slug: slug.into(),
            handler,
            retry_policy: RetryPolicy::no_retry(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl core::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("slug", &self.slug)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// One step of a workflow: which task to invoke, under which step id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    /// Step identity, unique within the workflow. Log entries and resume
    /// bookkeeping key on this, so re-using a task slug across steps is fine.
    pub id: String,
    pub task_slug: String,
    /// Overrides the task's retry attempt ceiling for this step only.
    pub retries: Option<u32>,
}

/// A registered workflow: ordered steps plus an optional default queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    pub slug: String,
    /// Default queue for jobs targeting this workflow, when the submission
    /// does not name one.
    pub queue: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            queue: None,
            steps: Vec::new(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn step(mut self, id: impl Into<String>, task_slug: impl Into<String>) -> Self {
        self.steps.push(WorkflowStep {
            id: id.into(),
            task_slug: task_slug.into(),
            retries: None,
        });
        self
    }

    pub fn step_with_retries(
        mut self,
        id: impl Into<String>,
        task_slug: impl Into<String>,
        retries: u32,
    ) -> Self {
        self.steps.push(WorkflowStep {
            id: id.into(),
            task_slug: task_slug.into(),
            retries: Some(retries),
        });
        self
    }
}
