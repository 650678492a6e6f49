//! Background polling worker that drives batch runs on an interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::JobQueue;
use crate::batch::RunOptions;

/// Configuration for one polling worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to drain; `None` polls across all queues.
    pub queue: Option<String>,
    pub poll_interval: Duration,
    /// Batch size per poll; falls back to the queue's configured default.
    pub limit: Option<usize>,
    /// Run each batch sequentially instead of concurrently.
    pub sequential: bool,
    /// Exit once a poll finds no eligible jobs.
    pub drain: bool,
    /// Name used in log output.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: None,
            poll_interval: Duration::from_millis(100),
            limit: None,
            sequential: false,
            drain: false,
            name: "queue-worker".to_string(),
        }
    }
}

/// Handle to a running worker task.
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request a graceful stop and wait for the loop to exit. In-flight jobs
    /// finish their current pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }

    /// Wait for the worker to exit on its own, e.g. after draining.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

/// Spawn a worker that polls the queue until shut down (or drained, when
/// configured to stop there).
pub fn spawn(queue: Arc<JobQueue>, config: WorkerConfig) -> WorkerHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        info!(worker = %config.name, queue = ?config.queue, "queue worker started");
        let mut interval = tokio::time::interval(config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    let options = RunOptions {
                        queue: config.queue.clone(),
                        limit: config.limit,
                        sequential: config.sequential,
                        ..Default::default()
                    };
                    match queue.run(options).await {
                        Ok(summary) => {
                            if !summary.job_status.is_empty() {
                                let failed = summary
                                    .job_status
                                    .values()
                                    .filter(|outcome| !outcome.is_success())
                                    .count();
                                debug!(
                                    worker = %config.name,
                                    executed = summary.job_status.len(),
                                    failed = failed,
                                    remaining = summary.remaining_jobs_from_queried,
                                    "poll executed jobs"
                                );
                            }
                            if summary.no_jobs_remaining && config.drain {
                                break;
                            }
                        }
                        Err(err) => {
                            error!(worker = %config.name, error = %err, "batch run failed");
                        }
                    }
                }
            }
        }

        info!(worker = %config.name, "queue worker stopped");
    });

    WorkerHandle {
        shutdown: shutdown_tx,
        join,
    }
}
