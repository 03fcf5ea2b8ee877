//! Fire-and-forget dispatch over the host's own HTTP endpoint.

pub mod batch;
pub mod starter;
pub mod transport;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shipq_core::{Entity, FilterValue, Filterable, ProcessId};

use crate::runner::{QueueItemStarter, TaskRunnerStarter};

pub use batch::AsyncBatchStarter;
pub use starter::AsyncProcessStarter;
pub use transport::{AsyncTransport, HttpTransport, RecordingTransport, TransportError, TriggerRequest};

/// Work that can be carried across an async round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Runnable {
    TaskRunnerStarter(TaskRunnerStarter),
    QueueItemStarter(QueueItemStarter),
    Batch(AsyncBatchStarter),
}

impl Runnable {
    pub fn kind(&self) -> &'static str {
        match self {
            Runnable::TaskRunnerStarter(_) => "task_runner_starter",
            Runnable::QueueItemStarter(_) => "queue_item_starter",
            Runnable::Batch(_) => "batch",
        }
    }
}

/// A runnable parked for the lifetime of one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub runnable: Runnable,
    pub created_at: DateTime<Utc>,
}

impl Process {
    pub fn new(runnable: Runnable, now: DateTime<Utc>) -> Self {
        Self {
            id: ProcessId::new(),
            runnable,
            created_at: now,
        }
    }
}

impl Entity for Process {
    type Id = ProcessId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Filterable for Process {
    fn field_value(&self, field: &str) -> Option<FilterValue> {
        match field {
            "id" => Some(FilterValue::Text(self.id.to_string())),
            "kind" => Some(self.runnable.kind().into()),
            "created_at" => Some(self.created_at.into()),
            _ => None,
        }
    }
}
