//! Selection filters and processing order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conveyor_core::{Job, JobId};

/// Conjunctive filter over job fields. `None` means "don't care".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Restrict to these ids. An empty list matches nothing.
    pub ids: Option<Vec<JobId>>,
    pub queue: Option<String>,
    pub task_slug: Option<String>,
    pub workflow_slug: Option<String>,
    /// Presence of `completed_at`.
    pub completed: Option<bool>,
    pub processing: Option<bool>,
    pub has_error: Option<bool>,
    /// Matches jobs whose `wait_until` is unset or at/before this instant.
    pub ready_by: Option<DateTime<Utc>>,
}

struct Unsatisfiable;

fn merge_eq<T: PartialEq>(a: Option<T>, b: Option<T>) -> Result<Option<T>, Unsatisfiable> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(Unsatisfiable),
        (Some(x), _) => Ok(Some(x)),
        (None, y) => Ok(y),
    }
}

impl JobFilter {
    /// The runner's implicit restriction: not completed, not processing, not
    /// errored, and past any scheduling delay as of `now`.
    pub fn eligible(now: DateTime<Utc>) -> Self {
        Self {
            completed: Some(false),
            processing: Some(false),
            has_error: Some(false),
            ready_by: Some(now),
            ..Self::default()
        }
    }

    pub fn by_id(id: JobId) -> Self {
        Self {
            ids: Some(vec![id]),
            ..Self::default()
        }
    }

    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Whether `job` satisfies every set clause.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&job.id) {
                return false;
            }
        }
        if let Some(queue) = &self.queue {
            if job.queue.as_deref() != Some(queue.as_str()) {
                return false;
            }
        }
        if let Some(slug) = &self.task_slug {
            if job.target.task_slug() != Some(slug.as_str()) {
                return false;
            }
        }
        if let Some(slug) = &self.workflow_slug {
            if job.target.workflow_slug() != Some(slug.as_str()) {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            if job.completed_at.is_some() != completed {
                return false;
            }
        }
        if let Some(processing) = self.processing {
            if job.processing != processing {
                return false;
            }
        }
        if let Some(has_error) = self.has_error {
            if job.has_error != has_error {
                return false;
            }
        }
        if let Some(ready_by) = self.ready_by {
            if !job.wait_until.is_none_or(|at| at <= ready_by) {
                return false;
            }
        }
        true
    }

    /// Conjunction of two filters.
    ///
    /// Returns `None` when the clauses contradict each other (e.g. one side
    /// pins `processing=true` and the other `processing=false`); callers treat
    /// that as an empty selection rather than an error.
    pub fn and(self, other: JobFilter) -> Option<JobFilter> {
        self.try_and(other).ok()
    }

    fn try_and(self, other: JobFilter) -> Result<JobFilter, Unsatisfiable> {
        let ids = match (self.ids, other.ids) {
            (Some(a), Some(b)) => Some(a.into_iter().filter(|id| b.contains(id)).collect()),
            (a, b) => a.or(b),
        };
        let ready_by = match (self.ready_by, other.ready_by) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Ok(JobFilter {
            ids,
            queue: merge_eq(self.queue, other.queue)?,
            task_slug: merge_eq(self.task_slug, other.task_slug)?,
            workflow_slug: merge_eq(self.workflow_slug, other.workflow_slug)?,
            completed: merge_eq(self.completed, other.completed)?,
            processing: merge_eq(self.processing, other.processing)?,
            has_error: merge_eq(self.has_error, other.has_error)?,
            ready_by,
        })
    }
}

/// Which field a selection sorts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    CreatedAt,
    WaitUntil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// Sort expression for job selection.
///
/// Ascending by creation time is FIFO, descending is LIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOrder {
    pub field: OrderField,
    pub direction: OrderDirection,
}

impl ProcessingOrder {
    pub const FIFO: Self = Self {
        field: OrderField::CreatedAt,
        direction: OrderDirection::Ascending,
    };

    pub const LIFO: Self = Self {
        field: OrderField::CreatedAt,
        direction: OrderDirection::Descending,
    };

    /// Sort a selection in place.
    pub fn apply(&self, jobs: &mut [Job]) {
        match self.field {
            OrderField::CreatedAt => jobs.sort_by_key(|job| job.created_at),
            // Unset wait_until sorts before any set one.
            OrderField::WaitUntil => jobs.sort_by_key(|job| job.wait_until),
        }
        if self.direction == OrderDirection::Descending {
            jobs.reverse();
        }
    }
}

impl Default for ProcessingOrder {
    fn default() -> Self {
        Self::FIFO
    }
}
