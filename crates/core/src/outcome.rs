//! Terminal classification of a job within a run summary.

use serde::{Deserialize, Serialize};

/// How one job ended during a batch or single-job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    #[serde(rename = "success")]
    Success,
    /// Failed this round but still within its retry budget.
    #[serde(rename = "error")]
    Error,
    /// Failed and exhausted its retry budget.
    #[serde(rename = "error-reached-max-retries")]
    ReachedMaxRetries,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
