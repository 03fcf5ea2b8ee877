use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::TaskError;
use crate::task::Task;

/// Serialized task: discriminator plus opaque state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_type: String,
    pub payload: JsonValue,
}

impl TaskPayload {
    pub fn new(task_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
        }
    }

    /// Snapshot a live task.
    pub fn of(task: &dyn Task) -> Result<Self, TaskError> {
        Ok(Self::new(task.task_type(), task.to_payload()?))
    }
}
