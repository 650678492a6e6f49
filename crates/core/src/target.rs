//! Execution target of a job: a single task or a workflow.

use serde::{Deserialize, Serialize};

/// What a job executes.
///
/// The persisted shape carries two optional slug fields of which exactly one
/// is set; this enum makes the "both" and "neither" states unrepresentable in
/// memory, and the serde bridge below preserves the two-field wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTarget", into = "RawTarget")]
pub enum Target {
    /// Run one registered task.
    Task(String),
    /// Run a declared multi-step workflow.
    Workflow(String),
}

impl Target {
    pub fn task(slug: impl Into<String>) -> Self {
        Self::Task(slug.into())
    }

    pub fn workflow(slug: impl Into<String>) -> Self {
        Self::Workflow(slug.into())
    }

    /// The slug, whichever kind it names.
    pub fn slug(&self) -> &str {
        match self {
            Self::Task(slug) | Self::Workflow(slug) => slug,
        }
    }

    pub fn task_slug(&self) -> Option<&str> {
        match self {
            Self::Task(slug) => Some(slug),
            Self::Workflow(_) => None,
        }
    }

    pub fn workflow_slug(&self) -> Option<&str> {
        match self {
            Self::Task(_) => None,
            Self::Workflow(slug) => Some(slug),
        }
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self, Self::Workflow(_))
    }
}

/// Wire shape of [`Target`]: two optional columns, exactly one set.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_slug: Option<String>,
}

impl From<Target> for RawTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Task(slug) => Self {
                task_slug: Some(slug),
                workflow_slug: None,
            },
            Target::Workflow(slug) => Self {
                task_slug: None,
                workflow_slug: Some(slug),
            },
        }
    }
}

impl TryFrom<RawTarget> for Target {
    type Error = String;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        match (raw.task_slug, raw.workflow_slug) {
            (Some(task), None) => Ok(Target::Task(task)),
            (None, Some(workflow)) => Ok(Target::Workflow(workflow)),
            (Some(_), Some(_)) => Err("job names both a task and a workflow".into()),
            (None, None) => Err("job names neither a task nor a workflow".into()),
        }
    }
}
