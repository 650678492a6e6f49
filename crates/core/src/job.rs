//! The durable job record and its derived state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::JobId;
use crate::target::Target;

/// Outcome of one step execution, as recorded in a job's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "error-reached-max-retries")]
    ReachedMaxRetries,
}

/// One step-execution record appended to a job's log.
///
/// Entries are immutable once appended; a retry appends a new entry rather
/// than rewriting the failed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    /// Step identity within the job: the workflow step id, or the task slug
    /// itself for single-task jobs.
    pub task_id: String,
    pub task_slug: String,
    pub state: StepState,
    pub input: JsonValue,
    /// Present only when the step succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    /// Present only when the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonValue>,
    pub executed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Derived lifecycle state of a job.
///
/// Never persisted: the stored record keeps the boolean/timestamp shape, and
/// this enum is recomputed from it on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// The unit of durable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque payload handed to the task handler (or the workflow's steps).
    pub input: JsonValue,
    #[serde(flatten)]
    pub target: Target,
    /// Logical queue name. Absent when the submission named none and the
    /// target declared no default; never defaulted to an empty string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Not eligible for selection before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,
    /// Soft lock: true while a runner owns execution of this job.
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub has_error: bool,
    /// Structured error detail. Cancellation writes a distinguished
    /// `{"cancelled": true}` marker here instead of a task-level failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonValue>,
    /// Set exactly once, when the job reaches terminal success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of run passes this job has consumed, counting retries.
    #[serde(default)]
    pub total_tried: u32,
    #[serde(default)]
    pub log: Vec<JobLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The error payload cancellation writes.
pub fn cancellation_error() -> JsonValue {
    serde_json::json!({ "cancelled": true })
}

impl Job {
    /// Create a pending job record.
    pub fn new(target: Target, input: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            input,
            target,
            queue: None,
            wait_until: None,
            processing: false,
            has_error: false,
            error: None,
            completed_at: None,
            total_tried: 0,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_wait_until(mut self, at: DateTime<Utc>) -> Self {
        self.wait_until = Some(at);
        self
    }

    /// Derive the lifecycle state from the persisted flags.
    pub fn state(&self) -> JobState {
        if self.completed_at.is_some() {
            JobState::Succeeded
        } else if self.processing {
            JobState::Running
        } else if self.has_error {
            if self.is_cancelled() {
                JobState::Cancelled
            } else {
                JobState::Failed
            }
        } else {
            JobState::Pending
        }
    }

    /// Whether the job was closed by cancellation rather than a task failure.
    ///
    /// Both shapes carry `has_error=true` with `completed_at` unset; only the
    /// `cancelled` marker in the error payload distinguishes them.
    pub fn is_cancelled(&self) -> bool {
        self.has_error
            && self
                .error
                .as_ref()
                .and_then(|e| e.get("cancelled"))
                .and_then(JsonValue::as_bool)
                .unwrap_or(false)
    }

    /// Whether a selector may hand this job to a runner at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.completed_at.is_none()
            && !self.processing
            && !self.has_error
            && self.wait_until.is_none_or(|at| at <= now)
    }

    /// Number of failed executions recorded for one step.
    pub fn failed_attempts(&self, task_id: &str) -> u32 {
        self.log
            .iter()
            .filter(|entry| entry.task_id == task_id && entry.state != StepState::Succeeded)
            .count() as u32
    }

    /// The most recent succeeded entry for one step, if any.
    pub fn succeeded_entry(&self, task_id: &str) -> Option<&JobLogEntry> {
        self.log
            .iter()
            .rev()
            .find(|entry| entry.task_id == task_id && entry.state == StepState::Succeeded)
    }

    /// Outputs of succeeded steps keyed by step id, later entries winning.
    pub fn step_outputs(&self) -> serde_json::Map<String, JsonValue> {
        let mut outputs = serde_json::Map::new();
        for entry in &self.log {
            if entry.state == StepState::Succeeded {
                if let Some(output) = &entry.output {
                    outputs.insert(entry.task_id.clone(), output.clone());
                }
            }
        }
        outputs
    }

    /// Outputs of succeeded steps keyed by task slug, later entries winning.
    ///
    /// A workflow may run the same task slug more than once; the flat map
    /// deliberately keeps only the last output per slug.
    pub fn task_outputs_by_slug(&self) -> serde_json::Map<String, JsonValue> {
        let mut outputs = serde_json::Map::new();
        for entry in &self.log {
            if entry.state == StepState::Succeeded {
                if let Some(output) = &entry.output {
                    outputs.insert(entry.task_slug.clone(), output.clone());
                }
            }
        }
        outputs
    }
}
