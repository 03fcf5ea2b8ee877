use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use shipq_core::{Clock, Direction, Operator, QueryFilter, QueueError, QueueResult, ScheduleId};
use shipq_tasks::{Task, TaskPayload};

use super::recurrence::Recurrence;
use super::schedule::Schedule;
use crate::queue::QueueService;
use crate::storage::ScheduleStorage;

/// Outcome of one pass over the due schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub enqueued: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failed: usize,
}

pub struct ScheduleService {
    storage: Arc<dyn ScheduleStorage>,
    clock: Arc<dyn Clock>,
}

impl ScheduleService {
    pub fn new(storage: Arc<dyn ScheduleStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn schedule(
        &self,
        recurrence: Recurrence,
        task: &dyn Task,
        queue_name: &str,
        context: &str,
        recurring: bool,
    ) -> QueueResult<Schedule> {
        self.schedule_payload(recurrence, TaskPayload::of(task)?, queue_name, context, recurring)
    }

    /// Validate the descriptor, compute the first trigger and store.
    pub fn schedule_payload(
        &self,
        recurrence: Recurrence,
        task: TaskPayload,
        queue_name: &str,
        context: &str,
        recurring: bool,
    ) -> QueueResult<Schedule> {
        if queue_name.trim().is_empty() {
            return Err(QueueError::validation("queue name must not be empty"));
        }
        recurrence.validate()?;

        let now = self.clock.now();
        let mut schedule = Schedule::new(recurrence, task, queue_name, context, recurring, now);
        schedule.set_next_schedule(now)?;
        self.storage.save(&schedule)?;

        info!(
            schedule_id = %schedule.id,
            task_type = %schedule.task.task_type,
            next = ?schedule.next_schedule_timestamp,
            recurring,
            "schedule stored"
        );
        Ok(schedule)
    }

    pub fn remove(&self, id: ScheduleId) -> QueueResult<bool> {
        self.storage.delete(id)
    }

    pub fn find(&self, id: ScheduleId) -> QueueResult<Option<Schedule>> {
        self.storage.find(id)
    }

    pub fn list(&self) -> QueueResult<Vec<Schedule>> {
        self.storage
            .select(&QueryFilter::new().with_order("next_schedule_timestamp", Direction::Asc))
    }

    /// Schedules whose next trigger is at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> QueueResult<Vec<Schedule>> {
        let filter = QueryFilter::new()
            .and("next_schedule_timestamp", Operator::LessOrEqual, now)
            .with_order("next_schedule_timestamp", Direction::Asc);
        self.storage.select(&filter)
    }

    /// Enqueue the task of every due schedule.
    ///
    /// One-shot schedules always enqueue and are deleted. Recurring ones
    /// enqueue only while no item of the same task type and context is
    /// queued or running, and always move on to their next trigger. A
    /// schedule that fails is logged and left for the next pass.
    pub fn trigger_due(&self, queue: &QueueService, now: DateTime<Utc>) -> QueueResult<TriggerReport> {
        let mut report = TriggerReport::default();
        for schedule in self.due(now)? {
            let id = schedule.id;
            if let Err(err) = self.trigger(queue, schedule, now, &mut report) {
                report.failed += 1;
                warn!(schedule_id = %id, error = %err, "schedule trigger failed");
            }
        }
        Ok(report)
    }

    fn trigger(
        &self,
        queue: &QueueService,
        mut schedule: Schedule,
        now: DateTime<Utc>,
        report: &mut TriggerReport,
    ) -> QueueResult<()> {
        if !schedule.recurring {
            queue.enqueue_payload(&schedule.queue_name, schedule.task.clone(), &schedule.context)?;
            self.storage.delete(schedule.id)?;
            report.enqueued += 1;
            report.removed += 1;
            return Ok(());
        }

        if queue.has_active(&schedule.task.task_type, &schedule.context)? {
            debug!(schedule_id = %schedule.id, task_type = %schedule.task.task_type, "previous run still active");
            report.skipped += 1;
        } else {
            queue.enqueue_payload(&schedule.queue_name, schedule.task.clone(), &schedule.context)?;
            report.enqueued += 1;
        }

        schedule.set_next_schedule(now)?;
        self.storage.update(&schedule)
    }
}

impl core::fmt::Debug for ScheduleService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduleService").finish_non_exhaustive()
    }
}
