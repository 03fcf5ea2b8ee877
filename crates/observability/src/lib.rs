//! Tracing setup plus logging and metrics fed by queue events.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber initialization (filters, output format).
pub mod tracing;

/// Status change logging.
pub mod logging;

/// In-process counters.
pub mod metrics;

pub use logging::QueueEventLogger;
pub use metrics::{MetricsSnapshot, QueueMetrics};
