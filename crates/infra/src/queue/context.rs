use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use shipq_tasks::{TaskContext, TaskError};

use super::item::QueueItem;
use super::service::QueueService;

/// Bridges a running task's signals onto its queue item.
///
/// Every signal is a conditional write; the adapter's copy of the item is
/// refreshed after each one so the next write carries a current precondition.
pub struct TaskAdapter<'a> {
    queue: &'a QueueService,
    item: &'a mut QueueItem,
}

impl<'a> TaskAdapter<'a> {
    pub fn new(queue: &'a QueueService, item: &'a mut QueueItem) -> Self {
        Self { queue, item }
    }
}

impl TaskContext for TaskAdapter<'_> {
    fn report_progress(&mut self, base_points: u32) -> Result<(), TaskError> {
        self.queue.update_progress(self.item, base_points)?;
        Ok(())
    }

    fn checkpoint(&mut self, base_points: u32, state: JsonValue) -> Result<(), TaskError> {
        self.queue.checkpoint(self.item, base_points, state)?;
        Ok(())
    }

    fn report_alive(&mut self) -> Result<(), TaskError> {
        self.queue.keep_alive(self.item)?;
        Ok(())
    }

    fn context(&self) -> &str {
        &self.item.context
    }

    fn now(&self) -> DateTime<Utc> {
        self.queue.now()
    }
}
