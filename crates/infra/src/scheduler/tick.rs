use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use shipq_events::{EventHandler, QueueEvent};
use shipq_tasks::TaskPayload;

use super::check_task::ScheduleCheckTask;
use crate::queue::QueueService;

/// Keeps the scheduler alive: after every runner sweep, enqueue a
/// [`ScheduleCheckTask`] unless one is active or was queued recently.
pub struct ScheduleTickHandler {
    queue: Weak<QueueService>,
    threshold: Duration,
}

impl ScheduleTickHandler {
    pub fn new(queue: Weak<QueueService>, threshold: Duration) -> Self {
        Self { queue, threshold }
    }

    fn on_tick(&self, queue: &QueueService, at: DateTime<Utc>) -> anyhow::Result<()> {
        let latest = queue.find_latest_by_type(ScheduleCheckTask::TYPE, Some(""))?;
        if let Some(item) = latest {
            let threshold = chrono::Duration::from_std(self.threshold)?;
            let recent = item.queue_timestamp.is_some_and(|queued| at - queued < threshold);
            if item.status.is_active() || recent {
                debug!(item_id = %item.id, status = %item.status, "schedule check already pending");
                return Ok(());
            }
        }

        let queue_name = queue.config().scheduler_queue_name.clone();
        let task = TaskPayload::new(ScheduleCheckTask::TYPE, ScheduleCheckTask::payload());
        let item = queue.enqueue_payload(&queue_name, task, "")?;
        debug!(item_id = %item.id, "schedule check enqueued");
        Ok(())
    }
}

impl EventHandler<QueueEvent> for ScheduleTickHandler {
    fn name(&self) -> &'static str {
        "schedule_tick"
    }

    fn handle(&self, event: &QueueEvent) -> anyhow::Result<()> {
        let QueueEvent::Tick { at } = event else {
            return Ok(());
        };
        match self.queue.upgrade() {
            Some(queue) => self.on_tick(&queue, *at),
            None => Ok(()),
        }
    }
}
