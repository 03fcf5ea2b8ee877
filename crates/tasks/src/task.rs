use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::TaskError;

/// A unit of background work.
///
/// Implementations are plain serde values: the queue persists
/// [`Task::to_payload`] and restores the task through the registry factory
/// registered under [`Task::task_type`]. A task that wants to resume after an
/// interruption keeps its position in its own serialized state and saves it
/// with [`TaskContext::checkpoint`].
pub trait Task: Send {
    /// Stable discriminator (e.g. `"ScheduleCheckTask"`).
    fn task_type(&self) -> &'static str;

    /// Serialized state, stored on the queue item.
    fn to_payload(&self) -> Result<JsonValue, TaskError>;

    /// Run to completion or return an error. Progress and liveness go through
    /// `ctx`; the queue item is kept up to date as they are reported.
    fn execute(&mut self, ctx: &mut dyn TaskContext) -> Result<(), TaskError>;

    /// Inactivity after which a running item is considered dead.
    ///
    /// `None` uses the engine default.
    fn max_inactivity_period(&self) -> Option<Duration> {
        None
    }

    /// Reset internal state before a retry from scratch.
    fn reconfigure(&mut self) {}
}

/// What a running task may signal back to the queue.
pub trait TaskContext {
    /// Report progress in base points (0..=10000). Progress never decreases.
    fn report_progress(&mut self, base_points: u32) -> Result<(), TaskError>;

    /// Report progress together with the task's serialized state, persisted
    /// in one write. A requeued item resumes from the last checkpoint.
    fn checkpoint(&mut self, base_points: u32, state: JsonValue) -> Result<(), TaskError>;

    /// Refresh the item's liveness without changing progress.
    fn report_alive(&mut self) -> Result<(), TaskError>;

    /// Tenant scope of the item being executed.
    fn context(&self) -> &str;

    fn now(&self) -> DateTime<Utc>;
}
