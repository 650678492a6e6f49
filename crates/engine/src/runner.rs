//! Single-job execution: claim, dispatch, retry bookkeeping, write-back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use conveyor_core::{Job, JobId, JobLogEntry, JobOutcome, RetryPolicy, StepState, Target};
use conveyor_registry::{Registry, TaskContext, TaskHandler};

use crate::QueueError;
use crate::store::{JobStore, JobUpdate, UpdateOptions};

/// One dispatchable step: the task slug plus its identity and retry policy
/// within this particular job.
struct StepRun {
    task_id: String,
    task_slug: String,
    /// 1-based attempt number, counting prior failures of this step.
    attempt: u32,
    policy: RetryPolicy,
}

enum StepVerdict {
    Succeeded,
    /// Failed but within budget; the job re-enters the pool after `delay`.
    Retry { delay: Duration },
    /// Failed with no budget left.
    Exhausted { error: JsonValue },
}

/// Executes one claimed job through the task or workflow state machine.
///
/// Handler failures become state on the job record; only storage faults
/// surface as errors from here.
pub(crate) struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
}

impl JobRunner {
    pub(crate) fn new(store: Arc<dyn JobStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Claim and execute one job. `None` means the claim was refused: some
    /// other runner holds the job, or it already reached a terminal state.
    pub(crate) async fn try_run(&self, id: JobId) -> Result<Option<JobOutcome>, QueueError> {
        let Some(job) = self.store.claim(id).await? else {
            debug!(job_id = %id, "claim refused, skipping");
            return Ok(None);
        };

        let outcome = match job.target.clone() {
            Target::Task(slug) => self.run_task_job(job, &slug).await?,
            Target::Workflow(slug) => self.run_workflow_job(job, &slug).await?,
        };
        Ok(Some(outcome))
    }

    async fn run_task_job(&self, job: Job, slug: &str) -> Result<JobOutcome, QueueError> {
        let Some(definition) = self.registry.task(slug) else {
            return self
                .fail_unrunnable(&job, format!("no registered task '{slug}'"))
                .await;
        };

        let tried = job.total_tried + 1;
        let step = StepRun {
            task_id: slug.to_string(),
            task_slug: slug.to_string(),
            attempt: job.failed_attempts(slug) + 1,
            policy: definition.retry_policy.clone(),
        };
        let handler = definition.handler.clone();

        let (entry, verdict) = self.execute_step(&job, &step, handler).await;
        match verdict {
            StepVerdict::Succeeded => {
                let completed_at = entry.completed_at;
                self.store
                    .update_by_id(
                        job.id,
                        JobUpdate {
                            processing: Some(false),
                            completed_at: Some(Some(completed_at)),
                            total_tried: Some(tried),
                            append_log: vec![entry],
                            ..Default::default()
                        },
                        UpdateOptions::without_document(),
                    )
                    .await?;
                Ok(JobOutcome::Success)
            }
            StepVerdict::Retry { delay } => {
                self.release_for_retry(&job, tried, entry, delay).await?;
                Ok(JobOutcome::Error)
            }
            StepVerdict::Exhausted { error } => {
                self.mark_exhausted(&job, tried, entry, error).await?;
                Ok(JobOutcome::ReachedMaxRetries)
            }
        }
    }

    async fn run_workflow_job(&self, mut job: Job, slug: &str) -> Result<JobOutcome, QueueError> {
        let Some(definition) = self.registry.workflow(slug) else {
            return self
                .fail_unrunnable(&job, format!("no registered workflow '{slug}'"))
                .await;
        };

        let tried = job.total_tried + 1;

        for step in &definition.steps {
            // Resume: steps that already succeeded on a previous pass stay done.
            if job.succeeded_entry(&step.id).is_some() {
                continue;
            }

            let Some(task) = self.registry.task(&step.task_slug) else {
                return self
                    .fail_unrunnable(
                        &job,
                        format!(
                            "no registered task '{}' for workflow step '{}'",
                            step.task_slug, step.id
                        ),
                    )
                    .await;
            };

            let mut policy = task.retry_policy.clone();
            if let Some(retries) = step.retries {
                policy = policy.with_max_attempts(retries);
            }

            let run = StepRun {
                task_id: step.id.clone(),
                task_slug: step.task_slug.clone(),
                attempt: job.failed_attempts(&step.id) + 1,
                policy,
            };
            let (entry, verdict) = self.execute_step(&job, &run, task.handler.clone()).await;

            match verdict {
                StepVerdict::Succeeded => {
                    // Persist each step as it lands so a crash between steps
                    // loses at most the in-flight one. The job stays claimed.
                    self.store
                        .update_by_id(
                            job.id,
                            JobUpdate {
                                total_tried: Some(tried),
                                append_log: vec![entry.clone()],
                                ..Default::default()
                            },
                            UpdateOptions::without_document(),
                        )
                        .await?;
                    job.log.push(entry);
                    job.total_tried = tried;
                }
                StepVerdict::Retry { delay } => {
                    self.release_for_retry(&job, tried, entry, delay).await?;
                    return Ok(JobOutcome::Error);
                }
                StepVerdict::Exhausted { error } => {
                    self.mark_exhausted(&job, tried, entry, error).await?;
                    return Ok(JobOutcome::ReachedMaxRetries);
                }
            }
        }

        self.store
            .update_by_id(
                job.id,
                JobUpdate {
                    processing: Some(false),
                    completed_at: Some(Some(Utc::now())),
                    total_tried: Some(tried),
                    ..Default::default()
                },
                UpdateOptions::without_document(),
            )
            .await?;
        debug!(job_id = %job.id, workflow = %slug, "workflow complete");
        Ok(JobOutcome::Success)
    }

    /// Run one step's handler and classify the result against its policy.
    async fn execute_step(
        &self,
        job: &Job,
        step: &StepRun,
        handler: Arc<dyn TaskHandler>,
    ) -> (JobLogEntry, StepVerdict) {
        let ctx = TaskContext {
            job_id: job.id,
            task_id: step.task_id.clone(),
            task_slug: step.task_slug.clone(),
            attempt: step.attempt,
            input: job.input.clone(),
            step_outputs: job.step_outputs(),
        };

        let executed_at = Utc::now();
        let result = handler.run(ctx).await;
        let completed_at = Utc::now();

        let mut entry = JobLogEntry {
            task_id: step.task_id.clone(),
            task_slug: step.task_slug.clone(),
            state: StepState::Succeeded,
            input: job.input.clone(),
            output: None,
            error: None,
            executed_at,
            completed_at,
        };

        match result {
            Ok(output) => {
                debug!(job_id = %job.id, task = %step.task_id, attempt = step.attempt, "step succeeded");
                entry.output = Some(output);
                (entry, StepVerdict::Succeeded)
            }
            Err(err) => {
                let payload = err.to_log_payload();
                entry.error = Some(payload.clone());
                // `attempt` equals the failure count once this one is included.
                if step.policy.should_retry(step.attempt) {
                    let delay = step.policy.delay_for_attempt(step.attempt);
                    debug!(
                        job_id = %job.id,
                        task = %step.task_id,
                        attempt = step.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "step failed, will retry"
                    );
                    entry.state = StepState::Failed;
                    (entry, StepVerdict::Retry { delay })
                } else {
                    warn!(
                        job_id = %job.id,
                        task = %step.task_id,
                        attempt = step.attempt,
                        error = %err,
                        "step failed with retries exhausted"
                    );
                    entry.state = StepState::ReachedMaxRetries;
                    (entry, StepVerdict::Exhausted { error: payload })
                }
            }
        }
    }

    /// Unlock the job and schedule its next attempt after the backoff delay.
    /// `has_error` stays false so the job remains eligible once due.
    async fn release_for_retry(
        &self,
        job: &Job,
        tried: u32,
        entry: JobLogEntry,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let next_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self.store
            .update_by_id(
                job.id,
                JobUpdate {
                    processing: Some(false),
                    wait_until: Some(Some(next_at)),
                    total_tried: Some(tried),
                    append_log: vec![entry],
                    ..Default::default()
                },
                UpdateOptions::without_document(),
            )
            .await?;
        Ok(())
    }

    /// Park the job permanently: `has_error = true` removes it from selection
    /// until an operator intervenes.
    async fn mark_exhausted(
        &self,
        job: &Job,
        tried: u32,
        entry: JobLogEntry,
        error: JsonValue,
    ) -> Result<(), QueueError> {
        self.store
            .update_by_id(
                job.id,
                JobUpdate {
                    processing: Some(false),
                    has_error: Some(true),
                    error: Some(Some(error)),
                    total_tried: Some(tried),
                    append_log: vec![entry],
                    ..Default::default()
                },
                UpdateOptions::without_document(),
            )
            .await?;
        Ok(())
    }

    /// A claimed job references a slug the registry does not know. Park it
    /// with `has_error` so it cannot spin through claim cycles forever.
    async fn fail_unrunnable(&self, job: &Job, message: String) -> Result<JobOutcome, QueueError> {
        warn!(job_id = %job.id, error = %message, "job is not runnable");
        self.store
            .update_by_id(
                job.id,
                JobUpdate {
                    processing: Some(false),
                    has_error: Some(true),
                    error: Some(Some(serde_json::json!({ "message": message }))),
                    ..Default::default()
                },
                UpdateOptions::without_document(),
            )
            .await?;
        Ok(JobOutcome::Error)
    }
}
