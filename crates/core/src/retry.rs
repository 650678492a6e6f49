//! Retry policies for failed step executions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy applied between retries of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Retry policy attached to a task definition.
///
/// The default policy allows no retries: a step runs once and a failure is
/// final unless the definition opts in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Retry up to `max_attempts` times with a fixed delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Retry up to `max_attempts` times with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Replace the attempt ceiling, keeping delays as configured.
    ///
    /// Used when a workflow step overrides the retry count of the task it
    /// invokes.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether another retry is allowed after `failed` failures.
    pub fn should_retry(&self, failed: u32) -> bool {
        failed > 0 && failed <= self.max_attempts
    }

    /// Delay before the retry numbered `attempt` (1-indexed; attempt 1 is the
    /// first retry after the initial failure).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => base_ms * 2_f64.powi((attempt - 1) as i32),
            BackoffStrategy::Linear => base_ms * attempt as f64,
        };
        let capped_ms = raw_ms.min(max_ms.max(base_ms));

        // Deterministic jitter keyed on the attempt number, so scheduling
        // stays reproducible in tests.
        let jittered_ms = if self.jitter > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            capped_ms + capped_ms * self.jitter * (pseudo_random - 0.5) * 2.0
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms.max(0.0) as u64)
    }
}
