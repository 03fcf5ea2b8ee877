//! Persistent queue item and its state machine.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use shipq_core::{
    Entity, FilterValue, Filterable, MAX_BASE_POINTS, QueueError, QueueItemId, QueueItemStatus,
    QueueResult,
};
use shipq_tasks::TaskPayload;

/// One task execution record.
///
/// Transitions are pure: they validate the edge, stamp timestamps and return
/// an error without touching `self` when the edge does not exist. Persisting
/// the result is the queue service's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub status: QueueItemStatus,
    /// Tenant scope.
    pub context: String,
    pub queue_name: String,
    pub task: TaskPayload,
    pub progress_base_points: u32,
    /// Progress confirmed by the last interrupted execution.
    pub last_execution_progress_base_points: u32,
    pub retries: u32,
    pub failure_description: Option<String>,
    pub create_timestamp: DateTime<Utc>,
    pub queue_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub finish_timestamp: Option<DateTime<Utc>>,
    pub fail_timestamp: Option<DateTime<Utc>>,
    pub earliest_start_timestamp: Option<DateTime<Utc>>,
    pub last_update_timestamp: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        queue_name: impl Into<String>,
        context: impl Into<String>,
        task: TaskPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            status: QueueItemStatus::Created,
            context: context.into(),
            queue_name: queue_name.into(),
            task,
            progress_base_points: 0,
            last_execution_progress_base_points: 0,
            retries: 0,
            failure_description: None,
            create_timestamp: now.trunc_subsecs(6),
            queue_timestamp: None,
            start_timestamp: None,
            finish_timestamp: None,
            fail_timestamp: None,
            earliest_start_timestamp: None,
            last_update_timestamp: None,
        }
    }

    pub fn task_type(&self) -> &str {
        &self.task.task_type
    }

    /// Progress as a percentage (0.00 - 100.00).
    pub fn progress_percent(&self) -> f64 {
        f64::from(self.progress_base_points) / 100.0
    }

    /// May the dispatcher start this item at `now`?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueItemStatus::Queued
            && self.earliest_start_timestamp.is_none_or(|at| at <= now)
    }

    /// Has a running item gone silent for longer than `period`?
    pub fn is_inactive(&self, now: DateTime<Utc>, period: Duration) -> bool {
        let Some(last_update) = self.last_update_timestamp else {
            return false;
        };
        let period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::MAX);
        last_update
            .checked_add_signed(period)
            .is_some_and(|deadline| deadline < now)
    }

    pub fn enqueue(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::Created], "enqueue")?;
        let now = self.touch(now);
        self.status = QueueItemStatus::Queued;
        self.queue_timestamp = Some(now);
        self.earliest_start_timestamp = Some(now);
        Ok(())
    }

    /// Progress restarts from the last checkpoint, which is the floor for
    /// every report of this execution.
    pub fn start(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::Queued], "start")?;
        let now = self.touch(now);
        self.status = QueueItemStatus::InProgress;
        self.start_timestamp = Some(now);
        self.progress_base_points = self.last_execution_progress_base_points;
        Ok(())
    }

    pub fn finish(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::InProgress], "finish")?;
        let now = self.touch(now);
        self.status = QueueItemStatus::Completed;
        self.finish_timestamp = Some(now);
        self.progress_base_points = MAX_BASE_POINTS;
        Ok(())
    }

    /// Back to the queue, keeping the progress made as a checkpoint.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::InProgress], "requeue")?;
        self.touch(now);
        self.status = QueueItemStatus::Queued;
        self.last_execution_progress_base_points = self.progress_base_points;
        self.start_timestamp = None;
        Ok(())
    }

    /// Consume one retry. Recycles to QUEUED while `retries <= max_retries`,
    /// otherwise ends in FAILED.
    ///
    /// A failed attempt confirms no checkpoint: the next execution starts
    /// with a progress floor of zero.
    pub fn fail(
        &mut self,
        description: &str,
        max_retries: u32,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.require(&[QueueItemStatus::InProgress], "fail")?;
        let requested = now.trunc_subsecs(6);
        let now = self.touch(now);
        self.retries += 1;
        self.failure_description = Some(format!("Attempt {}: {}", self.retries + 1, description));

        if self.retries > max_retries {
            self.status = QueueItemStatus::Failed;
            self.fail_timestamp = Some(now);
        } else {
            self.status = QueueItemStatus::Queued;
            self.start_timestamp = None;
            self.last_execution_progress_base_points = 0;
            let backoff = chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());
            self.earliest_start_timestamp = Some(requested + backoff);
        }
        Ok(())
    }

    pub fn abort(&mut self, description: &str, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::Queued, QueueItemStatus::InProgress], "abort")?;
        let now = self.touch(now);
        self.status = QueueItemStatus::Aborted;
        self.fail_timestamp = Some(now);
        self.failure_description = Some(description.to_string());
        Ok(())
    }

    pub fn set_progress(&mut self, base_points: u32, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::InProgress], "update progress of")?;
        if base_points > MAX_BASE_POINTS {
            return Err(QueueError::validation(format!(
                "progress {base_points} exceeds {MAX_BASE_POINTS} base points"
            )));
        }
        if base_points < self.progress_base_points {
            return Err(QueueError::validation(format!(
                "progress may not decrease ({} -> {base_points})",
                self.progress_base_points
            )));
        }
        self.touch(now);
        self.progress_base_points = base_points;
        Ok(())
    }

    pub fn keep_alive(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.require(&[QueueItemStatus::InProgress], "keep alive")?;
        self.touch(now);
        Ok(())
    }

    fn require(&self, allowed: &[QueueItemStatus], operation: &'static str) -> QueueResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(QueueError::illegal_transition(self.status, operation))
        }
    }

    /// Stamp `last_update_timestamp`, strictly increasing at microsecond
    /// precision so it can serve as a write precondition.
    fn touch(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.trunc_subsecs(6);
        let stamp = match self.last_update_timestamp {
            Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_update_timestamp = Some(stamp);
        stamp
    }
}

impl Entity for QueueItem {
    type Id = QueueItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Filterable for QueueItem {
    fn field_value(&self, field: &str) -> Option<FilterValue> {
        let value = match field {
            "id" => FilterValue::Text(self.id.to_string()),
            "status" => self.status.as_str().into(),
            "context" => self.context.as_str().into(),
            "queue_name" => self.queue_name.as_str().into(),
            "task_type" => self.task.task_type.as_str().into(),
            "progress_base_points" => i64::from(self.progress_base_points).into(),
            "last_execution_progress_base_points" => {
                i64::from(self.last_execution_progress_base_points).into()
            }
            "retries" => i64::from(self.retries).into(),
            "failure_description" => self.failure_description.clone().into(),
            "create_timestamp" => self.create_timestamp.into(),
            "queue_timestamp" => self.queue_timestamp.into(),
            "start_timestamp" => self.start_timestamp.into(),
            "finish_timestamp" => self.finish_timestamp.into(),
            "fail_timestamp" => self.fail_timestamp.into(),
            "earliest_start_timestamp" => self.earliest_start_timestamp.into(),
            "last_update_timestamp" => self.last_update_timestamp.into(),
            _ => return None,
        };
        Some(value)
    }
}
