//! `conveyor-core` — queue domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the job record, its derived state, execution targets and retry policies.

pub mod error;
pub mod id;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod target;

pub use error::{DomainError, DomainResult};
pub use id::{ActorId, JobId};
pub use job::{Job, JobLogEntry, JobState, StepState, cancellation_error};
pub use outcome::JobOutcome;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use target::Target;
