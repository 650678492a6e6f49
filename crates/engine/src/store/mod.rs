//! Job record storage contract.
//!
//! The engine consumes durable storage through this trait; the in-memory
//! implementation in [`memory`] backs tests and single-process deployments,
//! and external adapters implement the same contract over a real database.

pub mod filter;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use conveyor_core::{Job, JobId, JobLogEntry, Target, cancellation_error};

pub use filter::{JobFilter, OrderDirection, OrderField, ProcessingOrder};
pub use memory::InMemoryJobStore;

/// Sparse record for creation: only supplied fields are written, absent
/// optionals stay absent rather than being defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub input: JsonValue,
    #[serde(flatten)]
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(target: Target, input: JsonValue) -> Self {
        Self {
            input,
            target,
            queue: None,
            wait_until: None,
        }
    }

    /// Materialize the full record the store persists.
    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.target, self.input);
        job.queue = self.queue;
        job.wait_until = self.wait_until;
        job
    }
}

/// Field-level patch. `None` leaves a field untouched; the double-`Option`
/// fields distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub processing: Option<bool>,
    pub has_error: Option<bool>,
    pub error: Option<Option<JsonValue>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub wait_until: Option<Option<DateTime<Utc>>>,
    pub total_tried: Option<u32>,
    /// Entries to append; the log itself is never rewritten.
    pub append_log: Vec<JobLogEntry>,
}

impl JobUpdate {
    /// The forced field set cancellation writes, regardless of current phase.
    pub fn cancelled() -> Self {
        Self {
            processing: Some(false),
            has_error: Some(true),
            error: Some(Some(cancellation_error())),
            completed_at: Some(None),
            wait_until: Some(None),
            ..Self::default()
        }
    }

    /// Apply the patch to a record, stamping `updated_at`.
    ///
    /// Shared by the in-memory store; external adapters translate the patch
    /// into their own update operations instead.
    pub fn apply_to(&self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(processing) = self.processing {
            job.processing = processing;
        }
        if let Some(has_error) = self.has_error {
            job.has_error = has_error;
        }
        if let Some(error) = &self.error {
            job.error = error.clone();
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = completed_at;
        }
        if let Some(wait_until) = self.wait_until {
            job.wait_until = wait_until;
        }
        if let Some(total_tried) = self.total_tried {
            job.total_tried = total_tried;
        }
        job.log.extend(self.append_log.iter().cloned());
        job.updated_at = now;
    }
}

/// Options forwarded to update operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Whether the caller wants the post-update record back.
    pub returning: bool,
    /// Skip transactional wrapping; advisory for adapters that support it.
    pub disable_transaction: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            returning: true,
            disable_transaction: false,
        }
    }
}

impl UpdateOptions {
    /// No returned document, no transaction. Used by bulk/point writes whose
    /// callers never read the result.
    pub fn fire_and_forget() -> Self {
        Self {
            returning: false,
            disable_transaction: true,
        }
    }

    /// Keep transactional wrapping but skip the returned document. The runner
    /// writes state back this way and re-reads only when a caller asks.
    pub fn without_document() -> Self {
        Self {
            returning: false,
            disable_transaction: false,
        }
    }
}

/// One page of query results plus the total match count before the limit.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}

#[derive(Debug, Clone, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable keyed storage for job records.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a sparse new record, assigning its id and timestamps.
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Matching jobs in `order`, truncated to `limit`, plus the total match
    /// count before truncation.
    async fn query(
        &self,
        filter: &JobFilter,
        order: ProcessingOrder,
        limit: Option<usize>,
    ) -> Result<JobPage, JobStoreError>;

    /// Patch one record. Returns the updated record when
    /// `options.returning` is set.
    async fn update_by_id(
        &self,
        id: JobId,
        update: JobUpdate,
        options: UpdateOptions,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Patch every matching record. Fire-and-forget: reports neither the
    /// affected count nor the resulting documents.
    async fn update_where(
        &self,
        filter: &JobFilter,
        update: JobUpdate,
        options: UpdateOptions,
    ) -> Result<(), JobStoreError>;

    /// Conditionally take the processing lock on one record.
    ///
    /// Succeeds only if the job is currently claimable (`processing` false,
    /// no `completed_at`, no error); returns the claimed record, or `None`
    /// when another runner holds it or the job is terminal. The scheduling
    /// delay is deliberately not checked here.
    async fn claim(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;
}

#[async_trait::async_trait]
impl<S: JobStore + ?Sized> JobStore for std::sync::Arc<S> {
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError> {
        (**self).create(new_job).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).find_by_id(id).await
    }

    async fn query(
        &self,
        filter: &JobFilter,
        order: ProcessingOrder,
        limit: Option<usize>,
    ) -> Result<JobPage, JobStoreError> {
        (**self).query(filter, order, limit).await
    }

    async fn update_by_id(
        &self,
        id: JobId,
        update: JobUpdate,
        options: UpdateOptions,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).update_by_id(id, update, options).await
    }

    async fn update_where(
        &self,
        filter: &JobFilter,
        update: JobUpdate,
        options: UpdateOptions,
    ) -> Result<(), JobStoreError> {
        (**self).update_where(filter, update, options).await
    }

    async fn claim(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).claim(id).await
    }
}
