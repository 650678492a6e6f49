//! Cancellation: forced terminal writes that bypass the runner.

use tracing::debug;

use conveyor_auth::QueueAction;
use conveyor_core::JobId;

use crate::store::{JobFilter, JobUpdate, UpdateOptions};
use crate::{Access, JobQueue, QueueError};

/// Options for a bulk cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelOptions {
    /// Restrict cancellation to this queue.
    pub queue: Option<String>,
    pub access: Access,
}

impl CancelOptions {
    pub fn in_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            access: Access::Override,
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }
}

impl JobQueue {
    /// Cancel every matching job that has neither completed nor errored.
    ///
    /// A currently running handler is not preempted; the terminal write makes
    /// the job unclaimable afterwards.
    pub async fn cancel(
        &self,
        filter: JobFilter,
        options: CancelOptions,
    ) -> Result<(), QueueError> {
        self.check_access(&options.access, QueueAction::Cancel)?;

        let guard = JobFilter {
            queue: options.queue,
            completed: Some(false),
            has_error: Some(false),
            ..Default::default()
        };

        let Some(selection) = filter.and(guard) else {
            // The caller asked for jobs that are terminal by definition.
            debug!("cancel filter matches no cancellable jobs");
            return Ok(());
        };

        self.store
            .update_where(&selection, JobUpdate::cancelled(), UpdateOptions::fire_and_forget())
            .await?;
        debug!(queue = ?selection.queue, "cancelled matching jobs");
        Ok(())
    }

    /// Cancel one job. Unknown ids fail; already-terminal jobs are left
    /// untouched and the call succeeds.
    pub async fn cancel_by_id(&self, id: JobId, access: Access) -> Result<(), QueueError> {
        self.check_access(&access, QueueAction::Cancel)?;

        let Some(job) = self.store.find_by_id(id).await? else {
            return Err(QueueError::NotFound(id));
        };
        if job.completed_at.is_some() || job.has_error {
            debug!(job_id = %id, "cancel skipped, job already terminal");
            return Ok(());
        }

        // Filtered write rather than a blind one: the job may reach a
        // terminal state between the read above and this update.
        let guard = JobFilter {
            ids: Some(vec![id]),
            completed: Some(false),
            has_error: Some(false),
            ..Default::default()
        };
        self.store
            .update_where(&guard, JobUpdate::cancelled(), UpdateOptions::fire_and_forget())
            .await?;
        debug!(job_id = %id, "job cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use conveyor_auth::{Actor, PermissionGate};
    use conveyor_core::{JobState, Target};
    use conveyor_registry::{Registry, TaskDefinition, handler_fn};
    use serde_json::json;

    use crate::batch::RunOptions;
    use crate::store::{InMemoryJobStore, JobStore, NewJob, ProcessingOrder};
    use crate::submit::QueueRequest;

    fn registry() -> Registry {
        Registry::builder()
            .task(TaskDefinition::new(
                "noop",
                handler_fn(|_ctx| async { Ok(json!(null)) }),
            ))
            .build()
            .unwrap()
    }

    async fn queue_with_store() -> (JobQueue, Arc<InMemoryJobStore>) {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::builder(registry()).store(store.clone()).build();
        (queue, store)
    }

    #[tokio::test]
    async fn cancellation_writes_the_terminal_shape() {
        let (queue, store) = queue_with_store().await;
        let job = queue
            .queue(
                QueueRequest::task("noop", json!({}))
                    .delay_until(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        queue.cancel_by_id(job.id, Access::Override).await.unwrap();

        let job = store.find_by_id(job.id).await.unwrap().unwrap();
        assert!(job.is_cancelled());
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.completed_at, None);
        assert_eq!(job.wait_until, None);
        assert!(!job.processing);
        assert!(job.has_error);
        assert_eq!(job.error, Some(json!({ "cancelled": true })));
    }

    #[tokio::test]
    async fn cancelled_jobs_are_never_claimed_again() {
        let (queue, store) = queue_with_store().await;
        let job = queue
            .queue(QueueRequest::task("noop", json!({})))
            .await
            .unwrap();

        queue.cancel_by_id(job.id, Access::Override).await.unwrap();
        assert_eq!(store.claim(job.id).await.unwrap(), None);

        let summary = queue.run(RunOptions::default()).await.unwrap();
        assert!(summary.job_status.is_empty());
    }

    #[tokio::test]
    async fn completed_jobs_are_left_alone() {
        let (queue, store) = queue_with_store().await;
        let job = queue
            .queue(QueueRequest::task("noop", json!({})))
            .await
            .unwrap();
        queue.run(RunOptions::default()).await.unwrap();

        let done = store.find_by_id(job.id).await.unwrap().unwrap();
        assert!(done.completed_at.is_some());

        // Idempotent success, not an error, and no state change.
        queue.cancel_by_id(job.id, Access::Override).await.unwrap();
        let after = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(after.completed_at, done.completed_at);
        assert!(!after.has_error);
        assert_eq!(after.state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn unknown_ids_are_an_error() {
        let (queue, _store) = queue_with_store().await;
        let err = queue
            .cancel_by_id(conveyor_core::JobId::new(), Access::Override)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn bulk_cancel_is_scoped_by_queue_and_filter() {
        let (queue, store) = queue_with_store().await;
        queue
            .queue(QueueRequest::task("noop", json!({})).in_queue("a"))
            .await
            .unwrap();
        queue
            .queue(QueueRequest::task("noop", json!({})).in_queue("b"))
            .await
            .unwrap();

        queue
            .cancel(JobFilter::default(), CancelOptions::in_queue("a"))
            .await
            .unwrap();

        let all = store
            .query(&JobFilter::default(), ProcessingOrder::FIFO, None)
            .await
            .unwrap();
        for job in &all.jobs {
            match job.queue.as_deref() {
                Some("a") => assert!(job.is_cancelled()),
                Some("b") => assert!(!job.has_error),
                other => panic!("unexpected queue {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn a_filter_that_targets_terminal_jobs_is_a_no_op() {
        let (queue, store) = queue_with_store().await;
        let job = queue
            .queue(QueueRequest::task("noop", json!({})))
            .await
            .unwrap();

        queue
            .cancel(
                JobFilter {
                    has_error: Some(true),
                    ..Default::default()
                },
                CancelOptions::default(),
            )
            .await
            .unwrap();

        let job = store.find_by_id(job.id).await.unwrap().unwrap();
        assert!(!job.has_error);
    }

    #[tokio::test]
    async fn errored_jobs_stay_errored_through_bulk_cancel() {
        let (queue, store) = queue_with_store().await;
        let pending = queue
            .queue(QueueRequest::task("noop", json!({})))
            .await
            .unwrap();
        let errored = store
            .create(NewJob::new(Target::task("noop"), json!({})))
            .await
            .unwrap();
        store
            .update_by_id(
                errored.id,
                JobUpdate {
                    has_error: Some(true),
                    error: Some(Some(json!({ "message": "kept" }))),
                    ..Default::default()
                },
                UpdateOptions::default(),
            )
            .await
            .unwrap();

        queue
            .cancel(JobFilter::default(), CancelOptions::default())
            .await
            .unwrap();

        let errored = store.find_by_id(errored.id).await.unwrap().unwrap();
        assert_eq!(errored.error, Some(json!({ "message": "kept" })));

        let pending = store.find_by_id(pending.id).await.unwrap().unwrap();
        assert!(pending.is_cancelled());
    }

    #[tokio::test]
    async fn the_gate_guards_cancellation() {
        let (_, store) = queue_with_store().await;
        let queue = JobQueue::builder(registry())
            .store(store.clone())
            .gate(Arc::new(PermissionGate))
            .build();
        let job = queue
            .queue(QueueRequest::task("noop", json!({})))
            .await
            .unwrap();

        let err = queue
            .cancel_by_id(job.id, Access::As(Actor::anonymous()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::AccessDenied(_)));

        let job = store.find_by_id(job.id).await.unwrap().unwrap();
        assert!(!job.has_error);
    }
}
