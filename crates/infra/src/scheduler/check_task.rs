use std::sync::{Arc, Weak};

use serde_json::{Value as JsonValue, json};
use tracing::debug;

use shipq_core::QueueResult;
use shipq_tasks::{Task, TaskContext, TaskError};

use super::service::ScheduleService;
use crate::queue::QueueService;

/// Enqueues the tasks of every due schedule.
///
/// Stateless: its payload is `{}` and it is rebuilt from the collaborators
/// captured by [`ScheduleCheckTask::factory`].
pub struct ScheduleCheckTask {
    queue: Weak<QueueService>,
    schedules: Arc<ScheduleService>,
}

impl ScheduleCheckTask {
    pub const TYPE: &'static str = "ScheduleCheckTask";

    pub fn new(queue: Weak<QueueService>, schedules: Arc<ScheduleService>) -> Self {
        Self { queue, schedules }
    }

    pub fn payload() -> JsonValue {
        json!({})
    }

    pub fn factory(
        queue: Weak<QueueService>,
        schedules: Arc<ScheduleService>,
    ) -> impl Fn(JsonValue) -> QueueResult<Box<dyn Task>> + Send + Sync + 'static {
        move |_payload| Ok(Box::new(ScheduleCheckTask::new(queue.clone(), schedules.clone())) as Box<dyn Task>)
    }
}

impl Task for ScheduleCheckTask {
    fn task_type(&self) -> &'static str {
        Self::TYPE
    }

    fn to_payload(&self) -> Result<JsonValue, TaskError> {
        Ok(Self::payload())
    }

    fn execute(&mut self, ctx: &mut dyn TaskContext) -> Result<(), TaskError> {
        let queue = self
            .queue
            .upgrade()
            .ok_or_else(|| TaskError::failed("queue service is shutting down"))?;

        let report = self.schedules.trigger_due(&queue, ctx.now())?;
        debug!(
            enqueued = report.enqueued,
            skipped = report.skipped,
            removed = report.removed,
            failed = report.failed,
            "schedule check finished"
        );
        ctx.report_progress(shipq_core::MAX_BASE_POINTS)?;
        Ok(())
    }
}
