//! Batch selection and execution of eligible jobs.

use std::collections::HashMap;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use conveyor_auth::QueueAction;
use conveyor_core::{JobId, JobOutcome};

use crate::store::{JobFilter, ProcessingOrder};
use crate::{Access, JobQueue, QueueError};

/// Options for one batch run invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Restrict selection to this queue.
    pub queue: Option<String>,
    /// Caller predicate, conjoined with the implicit eligibility restriction.
    pub filter: Option<JobFilter>,
    /// Batch size; falls back to the configured default.
    pub limit: Option<usize>,
    /// Selection order; falls back to the configured order for the queue.
    pub processing_order: Option<ProcessingOrder>,
    /// Run jobs one at a time, each finishing before the next is claimed.
    pub sequential: bool,
    pub access: Access,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            queue: None,
            filter: None,
            limit: None,
            processing_order: None,
            sequential: false,
            access: Access::Override,
        }
    }
}

impl RunOptions {
    pub fn in_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..Default::default()
        }
    }

    pub fn limited(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sequentially(mut self) -> Self {
        self.sequential = true;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Outcome per job this invocation actually executed. Jobs whose claim
    /// was lost to a competing runner are absent.
    pub job_status: HashMap<JobId, JobOutcome>,
    /// Matching jobs the limit left untouched this round.
    pub remaining_jobs_from_queried: u64,
    /// True when selection found zero eligible jobs.
    pub no_jobs_remaining: bool,
}

impl RunSummary {
    fn drained() -> Self {
        Self {
            job_status: HashMap::new(),
            remaining_jobs_from_queried: 0,
            no_jobs_remaining: true,
        }
    }
}

/// Options for running one specific job.
#[derive(Debug, Clone, Default)]
pub struct RunByIdOptions {
    /// Collect succeeded task outputs from the log after the run. Off unless
    /// asked for; `queue_and_run` asks for it.
    pub return_task_output: bool,
    pub access: Access,
}

impl RunByIdOptions {
    pub fn returning_task_output() -> Self {
        Self {
            return_task_output: true,
            ..Self::default()
        }
    }
}

/// Result of running one specific job.
#[derive(Debug, Clone, PartialEq)]
pub struct RunByIdResult {
    pub summary: RunSummary,
    /// Succeeded task outputs keyed by task slug; when a slug succeeded more
    /// than once, the latest output wins.
    pub task_output: Option<serde_json::Map<String, JsonValue>>,
}

impl JobQueue {
    /// Select up to `limit` eligible jobs and execute them.
    ///
    /// Per-job failures are folded into the summary, never raised; an error
    /// here means the operation itself could not proceed.
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, QueueError> {
        self.check_access(&options.access, QueueAction::Run)?;

        let now = Utc::now();
        let mut selection = JobFilter::eligible(now);
        if let Some(queue) = &options.queue {
            selection.queue = Some(queue.clone());
        }
        let selection = match options.filter.clone() {
            Some(caller) => match caller.and(selection) {
                Some(merged) => merged,
                // A contradictory filter selects nothing rather than failing.
                None => {
                    debug!("run filter contradicts eligibility, selecting nothing");
                    return Ok(RunSummary::drained());
                }
            },
            None => selection,
        };

        let order = options
            .processing_order
            .unwrap_or_else(|| self.config.processing_order.resolve(options.queue.as_deref()));
        let limit = options.limit.unwrap_or(self.config.default_limit);

        let page = self.store.query(&selection, order, Some(limit)).await?;
        let no_jobs_remaining = page.jobs.is_empty();
        let remaining = page.total.saturating_sub(page.jobs.len() as u64);

        let mut job_status = HashMap::new();
        if options.sequential {
            for job in &page.jobs {
                if let Some(outcome) = self.runner.try_run(job.id).await? {
                    job_status.insert(job.id, outcome);
                }
            }
        } else {
            let runs = page.jobs.iter().map(|job| {
                let id = job.id;
                async move { (id, self.runner.try_run(id).await) }
            });
            for (id, result) in join_all(runs).await {
                if let Some(outcome) = result? {
                    job_status.insert(id, outcome);
                }
            }
        }

        if !job_status.is_empty() {
            info!(
                executed = job_status.len(),
                remaining = remaining,
                queue = ?options.queue,
                "batch run complete"
            );
        }

        Ok(RunSummary {
            job_status,
            remaining_jobs_from_queried: remaining,
            no_jobs_remaining,
        })
    }

    /// Execute one job immediately, ignoring its `wait_until` delay.
    ///
    /// Unknown ids fail; a job that is claimed elsewhere or already terminal
    /// yields an empty summary instead.
    pub async fn run_by_id(
        &self,
        id: JobId,
        options: RunByIdOptions,
    ) -> Result<RunByIdResult, QueueError> {
        self.check_access(&options.access, QueueAction::Run)?;

        if self.store.find_by_id(id).await?.is_none() {
            return Err(QueueError::NotFound(id));
        }

        let mut job_status = HashMap::new();
        match self.runner.try_run(id).await? {
            Some(outcome) => {
                job_status.insert(id, outcome);
            }
            None => debug!(job_id = %id, "job not runnable right now"),
        }

        let task_output = if options.return_task_output {
            let job = self
                .store
                .find_by_id(id)
                .await?
                .ok_or(QueueError::NotFound(id))?;
            Some(job.task_outputs_by_slug())
        } else {
            None
        };

        Ok(RunByIdResult {
            summary: RunSummary {
                job_status,
                remaining_jobs_from_queried: 0,
                no_jobs_remaining: true,
            },
            task_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use conveyor_auth::{Actor, PermissionGate};
    use conveyor_core::Target;
    use conveyor_registry::{Registry, TaskDefinition, handler_fn};
    use serde_json::json;

    use crate::store::{InMemoryJobStore, JobStore, NewJob};
    use crate::submit::QueueRequest;

    fn noop_registry() -> Registry {
        Registry::builder()
            .task(TaskDefinition::new(
                "noop",
                handler_fn(|_ctx| async { Ok(json!("done")) }),
            ))
            .build()
            .unwrap()
    }

    async fn seeded_queue(count: usize) -> (JobQueue, Arc<InMemoryJobStore>) {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::builder(noop_registry())
            .store(store.clone())
            .build();
        for i in 0..count {
            queue
                .queue(QueueRequest::task("noop", json!({ "i": i })))
                .await
                .unwrap();
        }
        (queue, store)
    }

    #[tokio::test]
    async fn the_limit_caps_a_batch_and_reports_the_rest() {
        let (queue, _store) = seeded_queue(5).await;

        let summary = queue
            .run(RunOptions::default().limited(3))
            .await
            .unwrap();
        assert_eq!(summary.job_status.len(), 3);
        assert_eq!(summary.remaining_jobs_from_queried, 2);
        assert!(!summary.no_jobs_remaining);

        let summary = queue.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.job_status.len(), 2);
        assert_eq!(summary.remaining_jobs_from_queried, 0);

        let summary = queue.run(RunOptions::default()).await.unwrap();
        assert!(summary.no_jobs_remaining);
        assert!(summary.job_status.is_empty());
    }

    #[tokio::test]
    async fn runs_are_scoped_to_the_requested_queue() {
        let (queue, store) = seeded_queue(0).await;
        queue
            .queue(QueueRequest::task("noop", json!({})).in_queue("a"))
            .await
            .unwrap();
        queue
            .queue(QueueRequest::task("noop", json!({})).in_queue("b"))
            .await
            .unwrap();

        let summary = queue.run(RunOptions::in_queue("a")).await.unwrap();
        assert_eq!(summary.job_status.len(), 1);

        let pending = store
            .query(
                &JobFilter {
                    completed: Some(false),
                    ..Default::default()
                },
                ProcessingOrder::FIFO,
                None,
            )
            .await
            .unwrap();
        assert_eq!(pending.jobs.len(), 1);
        assert_eq!(pending.jobs[0].queue.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn a_contradictory_filter_selects_nothing() {
        let (queue, _store) = seeded_queue(2).await;

        // Eligibility requires completed == false; asking for completed jobs
        // can never match.
        let summary = queue
            .run(RunOptions {
                filter: Some(JobFilter {
                    completed: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(summary.no_jobs_remaining);
        assert!(summary.job_status.is_empty());
    }

    #[tokio::test]
    async fn delayed_jobs_wait_their_turn() {
        let (queue, _store) = seeded_queue(0).await;
        queue
            .queue(
                QueueRequest::task("noop", json!({}))
                    .delay_until(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let summary = queue.run(RunOptions::default()).await.unwrap();
        assert!(summary.no_jobs_remaining);
        assert!(summary.job_status.is_empty());
    }

    #[tokio::test]
    async fn run_by_id_ignores_the_delay() {
        let (queue, _store) = seeded_queue(0).await;
        let job = queue
            .queue(
                QueueRequest::task("noop", json!({}))
                    .delay_until(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let result = queue
            .run_by_id(job.id, RunByIdOptions::returning_task_output())
            .await
            .unwrap();
        assert_eq!(result.summary.job_status.get(&job.id), Some(&JobOutcome::Success));
        let output = result.task_output.unwrap();
        assert_eq!(output.get("noop"), Some(&json!("done")));
    }

    #[tokio::test]
    async fn run_by_id_skips_output_collection_unless_asked() {
        let (queue, store) = seeded_queue(1).await;
        let page = store
            .query(&JobFilter::default(), ProcessingOrder::FIFO, None)
            .await
            .unwrap();
        let id = page.jobs[0].id;

        let result = queue.run_by_id(id, RunByIdOptions::default()).await.unwrap();
        assert_eq!(result.summary.job_status.get(&id), Some(&JobOutcome::Success));
        assert!(result.task_output.is_none());
    }

    #[tokio::test]
    async fn run_by_id_rejects_unknown_ids() {
        let (queue, _store) = seeded_queue(0).await;
        let err = queue
            .run_by_id(JobId::new(), RunByIdOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn run_by_id_on_a_busy_job_reports_nothing_executed() {
        let (queue, store) = seeded_queue(1).await;
        let page = store
            .query(&JobFilter::default(), ProcessingOrder::FIFO, None)
            .await
            .unwrap();
        let id = page.jobs[0].id;

        // Simulate a competing runner holding the claim.
        store.claim(id).await.unwrap().unwrap();

        let result = queue.run_by_id(id, RunByIdOptions::default()).await.unwrap();
        assert!(result.summary.job_status.is_empty());
    }

    #[tokio::test]
    async fn an_ungranted_actor_cannot_trigger_runs() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::builder(noop_registry())
            .store(store.clone())
            .gate(Arc::new(PermissionGate))
            .build();
        queue
            .queue(QueueRequest::task("noop", json!({})))
            .await
            .unwrap();

        let err = queue
            .run(RunOptions::default().with_access(Access::As(Actor::anonymous())))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::AccessDenied(_)));

        // Nothing was claimed or executed.
        let page = store
            .query(&JobFilter::eligible(Utc::now()), ProcessingOrder::FIFO, None)
            .await
            .unwrap();
        assert_eq!(page.jobs.len(), 1);
        assert!(page.jobs[0].log.is_empty());
    }

    #[tokio::test]
    async fn seeding_directly_against_the_store_still_runs() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::builder(noop_registry())
            .store(store.clone())
            .build();

        // Records written by another process are picked up the same way.
        store
            .create(NewJob::new(Target::task("noop"), json!({})))
            .await
            .unwrap();

        let summary = queue.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.job_status.len(), 1);
    }
}
