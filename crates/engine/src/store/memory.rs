//! In-memory job store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use conveyor_core::{Job, JobId};

use super::filter::{JobFilter, ProcessingOrder};
use super::{JobPage, JobStore, JobStoreError, JobUpdate, NewJob, UpdateOptions};

/// Keyed map of job records behind a read/write lock.
///
/// Claims and guarded updates mutate under the write lock, which stands in
/// for the per-document update atomicity a real database provides.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored records, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError> {
        let job = new_job.into_job();
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&id).cloned())
    }

    async fn query(
        &self,
        filter: &JobFilter,
        order: ProcessingOrder,
        limit: Option<usize>,
    ) -> Result<JobPage, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut matched: Vec<Job> = jobs.values().filter(|job| filter.matches(job)).cloned().collect();
        order.apply(&mut matched);

        let total = matched.len() as u64;
        if let Some(limit) = limit {
            matched.truncate(limit);
        }

        Ok(JobPage {
            jobs: matched,
            total,
        })
    }

    async fn update_by_id(
        &self,
        id: JobId,
        update: JobUpdate,
        options: UpdateOptions,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        update.apply_to(job, Utc::now());
        Ok(options.returning.then(|| job.clone()))
    }

    async fn update_where(
        &self,
        filter: &JobFilter,
        update: JobUpdate,
        _options: UpdateOptions,
    ) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();
        for job in jobs.values_mut() {
            if filter.matches(job) {
                update.apply_to(job, now);
            }
        }
        Ok(())
    }

    async fn claim(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;

        if job.processing || job.completed_at.is_some() || job.has_error {
            return Ok(None);
        }

        job.processing = true;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }
}
