use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipq_core::{QueueItemId, QueueItemStatus};

/// Whether a status change notification precedes or follows the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChangePhase {
    Before,
    After,
}

/// Signals emitted by the queue engine.
///
/// Consumed by logging, metrics and the scheduler bootstrap; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A running task reported progress.
    Progress {
        item_id: QueueItemId,
        base_points: u32,
    },
    /// A running task reported it is still alive.
    Alive { item_id: QueueItemId },
    /// A queue item status transition. `Before` is published ahead of the
    /// write, `After` once storage accepted it.
    StatusChanged {
        phase: StatusChangePhase,
        item_id: QueueItemId,
        queue_name: String,
        task_type: String,
        previous: Option<QueueItemStatus>,
        current: QueueItemStatus,
    },
    /// Fired after every runner sweep.
    Tick { at: DateTime<Utc> },
}

impl QueueEvent {
    /// Stable name for logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::Progress { .. } => "queue.progress",
            QueueEvent::Alive { .. } => "queue.alive",
            QueueEvent::StatusChanged { .. } => "queue.status_changed",
            QueueEvent::Tick { .. } => "queue.tick",
        }
    }

    pub fn item_id(&self) -> Option<QueueItemId> {
        match self {
            QueueEvent::Progress { item_id, .. }
            | QueueEvent::Alive { item_id }
            | QueueEvent::StatusChanged { item_id, .. } => Some(*item_id),
            QueueEvent::Tick { .. } => None,
        }
    }
}
