use chrono::{DateTime, Utc};
use serde::Serialize;

use shipq_core::QueueItemStatus;
use shipq_infra::QueueItem;

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct QueueItemView {
    pub id: String,
    pub status: QueueItemStatus,
    pub queue_name: String,
    pub context: String,
    pub task_type: String,
    pub progress_percent: f64,
    pub retries: u32,
    pub failure_description: Option<String>,
    pub create_timestamp: DateTime<Utc>,
    pub queue_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub finish_timestamp: Option<DateTime<Utc>>,
    pub fail_timestamp: Option<DateTime<Utc>>,
}

impl From<QueueItem> for QueueItemView {
    fn from(item: QueueItem) -> Self {
        Self {
            id: item.id.to_string(),
            status: item.status,
            progress_percent: item.progress_percent(),
            task_type: item.task.task_type,
            queue_name: item.queue_name,
            context: item.context,
            retries: item.retries,
            failure_description: item.failure_description,
            create_timestamp: item.create_timestamp,
            queue_timestamp: item.queue_timestamp,
            start_timestamp: item.start_timestamp,
            finish_timestamp: item.finish_timestamp,
            fail_timestamp: item.fail_timestamp,
        }
    }
}
