//! Shared observability setup for queue workers and embedding processes.

/// Initialize process-wide observability (tracing/logging).
///
/// Safe to call multiple times; subsequent calls become no-ops, so workers
/// and tests can each call it without coordinating.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Logging configuration.
pub mod logging {}

/// Metrics setup and exporters.
pub mod metrics {}
