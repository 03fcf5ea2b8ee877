use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shipq_core::{Entity, FilterValue, Filterable, QueueResult, ScheduleId};
use shipq_tasks::TaskPayload;

use super::recurrence::Recurrence;

/// A task to enqueue whenever its recurrence fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub recurrence: Recurrence,
    pub task: TaskPayload,
    pub queue_name: String,
    pub context: String,
    pub next_schedule_timestamp: Option<DateTime<Utc>>,
    pub recurring: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        recurrence: Recurrence,
        task: TaskPayload,
        queue_name: impl Into<String>,
        context: impl Into<String>,
        recurring: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduleId::new(),
            recurrence,
            task,
            queue_name: queue_name.into(),
            context: context.into(),
            next_schedule_timestamp: None,
            recurring,
            created_at: now,
        }
    }

    pub fn set_next_schedule(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.next_schedule_timestamp = Some(self.recurrence.next_after(now)?);
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_schedule_timestamp.is_some_and(|at| at <= now)
    }
}

impl Entity for Schedule {
    type Id = ScheduleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Filterable for Schedule {
    fn field_value(&self, field: &str) -> Option<FilterValue> {
        match field {
            "id" => Some(FilterValue::Text(self.id.to_string())),
            "queue_name" => Some(self.queue_name.as_str().into()),
            "context" => Some(self.context.as_str().into()),
            "task_type" => Some(self.task.task_type.as_str().into()),
            "next_schedule_timestamp" => Some(self.next_schedule_timestamp.into()),
            "created_at" => Some(self.created_at.into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn due_only_once_the_trigger_passed() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let mut schedule = Schedule::new(
            Recurrence::daily(9, 0),
            TaskPayload::new("SyncOrders", json!({})),
            "default",
            "shop-1",
            true,
            now,
        );
        assert!(!schedule.is_due(now));

        schedule.set_next_schedule(now).unwrap();
        assert!(!schedule.is_due(now));
        assert!(schedule.is_due(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    }
}
