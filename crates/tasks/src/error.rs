use shipq_core::QueueError;
use thiserror::Error;

/// Failure of a task body.
///
/// Whatever a task returns here ends up, formatted, in the queue item's
/// failure description.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("task state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<TaskError> for QueueError {
    fn from(value: TaskError) -> Self {
        match value {
            TaskError::Queue(err) => err,
            other => QueueError::execution(other.to_string()),
        }
    }
}
