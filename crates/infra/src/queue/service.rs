//! Queue item lifecycle: the only writer of queue item state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use shipq_core::{
    Clock, Direction, Operator, QueryFilter, QueueConfig, QueueError, QueueItemId,
    QueueItemStatus, QueueResult, WritePrecondition,
};
use shipq_events::{EventBus, QueueEvent, StatusChangePhase};
use shipq_tasks::{Task, TaskPayload, TaskRegistry};

use super::context::TaskAdapter;
use super::item::QueueItem;
use crate::runner::WakeupSignal;
use crate::storage::QueueStorage;

/// Enforces the queue item state machine on top of conditional writes.
///
/// Every mutation takes the caller's last known copy of the item, applies the
/// transition to a clone and writes it guarded by the copy's status and last
/// update timestamp. Only when storage accepts the write is the caller's copy
/// replaced; on any error it is left as it was.
pub struct QueueService {
    storage: Arc<dyn QueueStorage>,
    registry: TaskRegistry,
    clock: Arc<dyn Clock>,
    bus: Arc<dyn EventBus<QueueEvent>>,
    config: QueueConfig,
    wakeup: Arc<dyn WakeupSignal>,
}

impl QueueService {
    pub fn new(
        storage: Arc<dyn QueueStorage>,
        registry: TaskRegistry,
        clock: Arc<dyn Clock>,
        bus: Arc<dyn EventBus<QueueEvent>>,
        config: QueueConfig,
        wakeup: Arc<dyn WakeupSignal>,
    ) -> Self {
        Self {
            storage,
            registry,
            clock,
            bus,
            config,
            wakeup,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Reject payloads the registry cannot rebuild.
    pub fn validate_task(&self, task: &TaskPayload) -> QueueResult<()> {
        if self.registry.contains(&task.task_type) {
            Ok(())
        } else {
            Err(QueueError::deserialization(format!("unknown task type: {}", task.task_type)))
        }
    }

    pub fn enqueue(&self, queue_name: &str, task: &dyn Task, context: &str) -> QueueResult<QueueItem> {
        let payload = TaskPayload::of(task)?;
        self.enqueue_payload(queue_name, payload, context)
    }

    /// Create a QUEUED item and fire the wakeup chain.
    pub fn enqueue_payload(&self, queue_name: &str, task: TaskPayload, context: &str) -> QueueResult<QueueItem> {
        if queue_name.trim().is_empty() {
            return Err(QueueError::validation("queue name must not be empty"));
        }
        self.validate_task(&task)?;

        let now = self.clock.now();
        let mut item = QueueItem::new(queue_name, context, task, now);
        item.enqueue(now)?;

        self.emit(status_event(StatusChangePhase::Before, &item, None));
        self.storage.save(&item)?;
        self.emit(status_event(StatusChangePhase::After, &item, None));
        debug!(item_id = %item.id, queue = %item.queue_name, task_type = %item.task_type(), "queue item enqueued");

        self.wakeup.wakeup();
        Ok(item)
    }

    /// QUEUED -> IN_PROGRESS, then execute the task synchronously.
    ///
    /// The task is rebuilt only after the IN_PROGRESS write, so an
    /// unreadable payload surfaces as an error on a running item (and ends in
    /// `fail`) instead of leaving the item queued forever. After execution the
    /// caller's copy carries the task's final state, which the following
    /// `finish` or `fail` persists.
    pub fn start(&self, item: &mut QueueItem) -> QueueResult<()> {
        self.transition(item, |item, now| item.start(now))?;

        let mut task = self.registry.restore(&item.task)?;
        let outcome = {
            let mut adapter = TaskAdapter::new(self, item);
            task.execute(&mut adapter)
        };

        match TaskPayload::of(task.as_ref()) {
            Ok(payload) => item.task = payload,
            Err(err) => warn!(item_id = %item.id, error = %err, "could not snapshot task state"),
        }

        outcome.map_err(QueueError::from)
    }

    /// IN_PROGRESS -> COMPLETED.
    pub fn finish(&self, item: &mut QueueItem) -> QueueResult<()> {
        self.transition(item, |item, now| item.finish(now))
    }

    /// IN_PROGRESS -> QUEUED, keeping progress as the checkpoint.
    pub fn requeue(&self, item: &mut QueueItem) -> QueueResult<()> {
        self.transition(item, |item, now| item.requeue(now))
    }

    /// IN_PROGRESS -> QUEUED (retry left) or FAILED.
    pub fn fail(&self, item: &mut QueueItem, description: &str) -> QueueResult<()> {
        let max_retries = self.config.max_retries;
        let backoff = self.config.retry_backoff.delay_for_retry(item.retries + 1);
        self.transition(item, |item, now| item.fail(description, max_retries, backoff, now))
    }

    /// Let the task reset itself, then `fail` with the reset state persisted.
    ///
    /// A payload that cannot be rebuilt is failed as it is.
    pub fn reconfigure_and_fail(&self, item: &mut QueueItem, description: &str) -> QueueResult<()> {
        let reconfigured = self.registry.restore(&item.task).and_then(|mut task| {
            task.reconfigure();
            Ok(TaskPayload::of(task.as_ref())?)
        });
        let reconfigured = match reconfigured {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(item_id = %item.id, error = %err, "task could not be reconfigured");
                None
            }
        };

        let max_retries = self.config.max_retries;
        let backoff = self.config.retry_backoff.delay_for_retry(item.retries + 1);
        self.transition(item, |item, now| {
            if let Some(payload) = reconfigured {
                item.task = payload;
            }
            item.fail(description, max_retries, backoff, now)
        })
    }

    /// QUEUED | IN_PROGRESS -> ABORTED.
    pub fn abort(&self, item: &mut QueueItem, description: &str) -> QueueResult<()> {
        self.transition(item, |item, now| item.abort(description, now))
    }

    pub fn update_progress(&self, item: &mut QueueItem, base_points: u32) -> QueueResult<()> {
        self.transition(item, |item, now| item.set_progress(base_points, now))?;
        self.emit(QueueEvent::Progress {
            item_id: item.id,
            base_points,
        });
        Ok(())
    }

    /// Progress plus the task's own state in one conditional write, so a
    /// later requeue resumes from a consistent position.
    pub fn checkpoint(&self, item: &mut QueueItem, base_points: u32, state: JsonValue) -> QueueResult<()> {
        self.transition(item, |item, now| {
            item.set_progress(base_points, now)?;
            item.task.payload = state;
            Ok(())
        })?;
        self.emit(QueueEvent::Progress {
            item_id: item.id,
            base_points,
        });
        Ok(())
    }

    pub fn keep_alive(&self, item: &mut QueueItem) -> QueueResult<()> {
        self.transition(item, |item, now| item.keep_alive(now))?;
        self.emit(QueueEvent::Alive { item_id: item.id });
        Ok(())
    }

    pub fn find(&self, id: QueueItemId) -> QueueResult<Option<QueueItem>> {
        self.storage.find(id)
    }

    pub fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<QueueItem>> {
        self.storage.select(filter)
    }

    pub fn find_latest_by_type(&self, task_type: &str, context: Option<&str>) -> QueueResult<Option<QueueItem>> {
        self.storage.find_latest_by_type(task_type, context)
    }

    pub fn find_running(&self) -> QueueResult<Vec<QueueItem>> {
        self.storage.find_by_status(QueueItemStatus::InProgress)
    }

    /// Oldest queued item per idle queue that may start now.
    ///
    /// Items still backing off are skipped in place rather than replaced by
    /// a younger item of the same queue.
    pub fn find_oldest_queued(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        self.storage.find_oldest_queued(self.clock.now(), limit)
    }

    /// Is an item of this task type and context queued or running?
    pub fn has_active(&self, task_type: &str, context: &str) -> QueueResult<bool> {
        let filter = QueryFilter::new()
            .and("task_type", Operator::Equals, task_type)
            .and("context", Operator::Equals, context)
            .and(
                "status",
                Operator::In,
                vec![QueueItemStatus::Queued.as_str(), QueueItemStatus::InProgress.as_str()],
            )
            .with_order("queue_timestamp", Direction::Desc)
            .with_limit(1);
        Ok(!self.storage.select(&filter)?.is_empty())
    }

    /// Inactivity period after which a running item is reclaimed.
    pub fn inactivity_period(&self, item: &QueueItem) -> Duration {
        self.registry
            .restore(&item.task)
            .ok()
            .and_then(|task| task.max_inactivity_period())
            .unwrap_or(self.config.max_task_inactivity)
    }

    fn transition<F>(&self, item: &mut QueueItem, apply: F) -> QueueResult<()>
    where
        F: FnOnce(&mut QueueItem, DateTime<Utc>) -> QueueResult<()>,
    {
        let mut updated = item.clone();
        apply(&mut updated, self.clock.now())?;

        let precondition = WritePrecondition::observed(item.status, item.last_update_timestamp);
        let status_changed = updated.status != item.status;

        if status_changed {
            self.emit(status_event(StatusChangePhase::Before, &updated, Some(item.status)));
        }
        self.storage.save_conditional(&updated, precondition)?;
        if status_changed {
            self.emit(status_event(StatusChangePhase::After, &updated, Some(item.status)));
            debug!(
                item_id = %updated.id,
                queue = %updated.queue_name,
                from = %item.status,
                to = %updated.status,
                "queue item transitioned"
            );
        }

        *item = updated;
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        if let Err(err) = self.bus.publish(event) {
            warn!(error = %err, "failed to publish queue event");
        }
    }
}

fn status_event(phase: StatusChangePhase, item: &QueueItem, previous: Option<QueueItemStatus>) -> QueueEvent {
    QueueEvent::StatusChanged {
        phase,
        item_id: item.id,
        queue_name: item.queue_name.clone(),
        task_type: item.task.task_type.clone(),
        previous,
        current: item.status,
    }
}

impl core::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueService")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};
    use serde_json::Value as JsonValue;
    use shipq_core::ManualClock;
    use shipq_events::InMemoryEventBus;
    use shipq_tasks::{TaskContext, TaskError};

    use super::*;
    use crate::storage::InMemoryQueueStorage;

    #[derive(Default)]
    struct CountingWakeup(AtomicUsize);

    impl WakeupSignal for CountingWakeup {
        fn wakeup(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct StepTask {
        steps: u32,
        fail_at: Option<u32>,
        done: u32,
    }

    impl Task for StepTask {
        fn task_type(&self) -> &'static str {
            "StepTask"
        }

        fn to_payload(&self) -> Result<JsonValue, TaskError> {
            Ok(serde_json::to_value(self)?)
        }

        fn execute(&mut self, ctx: &mut dyn TaskContext) -> Result<(), TaskError> {
            while self.done < self.steps {
                if self.fail_at == Some(self.done) {
                    return Err(TaskError::failed(format!("step {} exploded", self.done)));
                }
                self.done += 1;
                ctx.report_progress(self.done * 10_000 / self.steps)?;
            }
            Ok(())
        }

        fn reconfigure(&mut self) {
            self.done = 0;
        }
    }

    struct Fixture {
        service: QueueService,
        storage: Arc<InMemoryQueueStorage>,
        clock: Arc<ManualClock>,
        bus: Arc<InMemoryEventBus<QueueEvent>>,
        wakeup: Arc<CountingWakeup>,
    }

    fn fixture(config: QueueConfig) -> Fixture {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let clock = ManualClock::arc(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let bus = Arc::new(InMemoryEventBus::new());
        let wakeup = Arc::new(CountingWakeup::default());
        let mut registry = TaskRegistry::new();
        registry.register::<StepTask>("StepTask");

        let service = QueueService::new(
            storage.clone(),
            registry,
            clock.clone(),
            bus.clone(),
            config,
            wakeup.clone(),
        );
        Fixture {
            service,
            storage,
            clock,
            bus,
            wakeup,
        }
    }

    fn step_task(steps: u32) -> StepTask {
        StepTask {
            steps,
            ..StepTask::default()
        }
    }

    #[test]
    fn enqueue_persists_a_queued_item_and_wakes_the_runner() {
        let f = fixture(QueueConfig::default());
        let events = f.bus.subscribe();

        let item = f.service.enqueue("q1", &step_task(2), "shop-1").unwrap();

        assert_eq!(item.status, QueueItemStatus::Queued);
        assert_eq!(item.queue_timestamp, Some(f.clock.now()));
        assert_eq!(f.storage.find(item.id).unwrap(), Some(item.clone()));
        assert_eq!(f.wakeup.0.load(Ordering::SeqCst), 1);

        let phases: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                QueueEvent::StatusChanged { phase, previous, current, .. } => Some((phase, previous, current)),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                (StatusChangePhase::Before, None, QueueItemStatus::Queued),
                (StatusChangePhase::After, None, QueueItemStatus::Queued),
            ]
        );
    }

    #[test]
    fn enqueue_validates_queue_name_and_task_type() {
        let f = fixture(QueueConfig::default());

        let err = f.service.enqueue("  ", &step_task(1), "").unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));

        let err = f
            .service
            .enqueue_payload("q1", TaskPayload::new("Ghost", JsonValue::Null), "")
            .unwrap_err();
        assert!(matches!(err, QueueError::Deserialization(_)));
        assert_eq!(f.wakeup.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_executes_and_records_progress() {
        let f = fixture(QueueConfig::default());
        let events = f.bus.subscribe();
        let mut item = f.service.enqueue("q1", &step_task(4), "").unwrap();

        f.service.start(&mut item).unwrap();
        f.service.finish(&mut item).unwrap();

        let stored = f.storage.find(item.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Completed);
        assert_eq!(stored.progress_base_points, 10_000);
        assert_eq!(stored.task.payload["done"], 4);

        let progress: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                QueueEvent::Progress { base_points, .. } => Some(base_points),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![2_500, 5_000, 7_500, 10_000]);
    }

    #[test]
    fn failed_task_keeps_its_state_for_the_fail_write() {
        let f = fixture(QueueConfig::default());
        let task = StepTask {
            steps: 4,
            fail_at: Some(2),
            done: 0,
        };
        let mut item = f.service.enqueue("q1", &task, "").unwrap();

        let err = f.service.start(&mut item).unwrap_err();
        assert_eq!(err, QueueError::execution("step 2 exploded"));
        assert_eq!(item.status, QueueItemStatus::InProgress);

        f.service.fail(&mut item, &err.to_string()).unwrap();
        let stored = f.storage.find(item.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Queued);
        assert_eq!(stored.retries, 1);
        assert_eq!(stored.progress_base_points, 5_000);
        assert_eq!(stored.task.payload["done"], 2);
        assert_eq!(stored.failure_description.as_deref(), Some("Attempt 2: step 2 exploded"));
    }

    #[test]
    fn stale_writer_gets_a_conflict_and_keeps_its_copy() {
        let f = fixture(QueueConfig::default());
        let mut item = f.service.enqueue("q1", &step_task(0), "").unwrap();
        f.service.start(&mut item).unwrap();

        let mut first = item.clone();
        let mut second = item.clone();
        f.service.update_progress(&mut first, 1_000).unwrap();

        let before = second.clone();
        let err = f.service.update_progress(&mut second, 2_000).unwrap_err();
        assert!(matches!(err, QueueError::SaveConflict(_)));
        assert_eq!(second, before);
        assert_eq!(f.storage.find(item.id).unwrap().unwrap().progress_base_points, 1_000);
    }

    #[test]
    fn unreadable_payload_fails_on_a_running_item() {
        let f = fixture(QueueConfig::default());
        let mut item = f.service.enqueue("q1", &step_task(1), "").unwrap();
        item.task.payload = serde_json::json!({"steps": "many"});
        f.storage.save(&item).unwrap();

        let err = f.service.start(&mut item).unwrap_err();
        assert!(matches!(err, QueueError::Deserialization(_)));
        assert_eq!(
            f.storage.find(item.id).unwrap().unwrap().status,
            QueueItemStatus::InProgress
        );
    }

    #[test]
    fn storage_outage_is_surfaced() {
        let f = fixture(QueueConfig::default());
        let mut item = f.service.enqueue("q1", &step_task(1), "").unwrap();
        f.storage.set_unavailable(true);

        let before = item.clone();
        let err = f.service.abort(&mut item, "operator").unwrap_err();
        assert!(matches!(err, QueueError::StorageUnavailable(_)));
        assert_eq!(item, before);
    }

    #[test]
    fn retry_backoff_holds_back_the_oldest_item_of_its_queue() {
        let config = QueueConfig::default().with_retry_backoff(shipq_core::RetryBackoff::fixed(Duration::from_secs(60)));
        let f = fixture(config);
        let mut first = f.service.enqueue("q1", &step_task(1), "").unwrap();
        f.clock.advance(Duration::from_secs(1));
        f.service.enqueue("q1", &step_task(1), "").unwrap();

        f.service.start(&mut first).unwrap();
        f.service.fail(&mut first, "transient").unwrap();

        assert!(f.service.find_oldest_queued(5).unwrap().is_empty());
        f.clock.advance(Duration::from_secs(61));
        let ready = f.service.find_oldest_queued(5).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, first.id);
    }

    #[test]
    fn idle_queue_is_served_while_another_queue_backs_off() {
        let config = QueueConfig::default()
            .with_max_concurrent_running(1)
            .with_retry_backoff(shipq_core::RetryBackoff::fixed(Duration::from_secs(3_600)));
        let f = fixture(config);
        let mut head = f.service.enqueue("qa", &step_task(1), "").unwrap();
        f.service.start(&mut head).unwrap();
        f.service.fail(&mut head, "carrier down").unwrap();
        f.clock.advance(Duration::from_secs(1));
        let ready = f.service.enqueue("qb", &step_task(1), "").unwrap();

        let picked = f.service.find_oldest_queued(1).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, ready.id);
    }

    #[test]
    fn reconfigure_and_fail_persists_the_reset_state() {
        let f = fixture(QueueConfig::default());
        let task = StepTask {
            steps: 4,
            fail_at: Some(3),
            done: 0,
        };
        let mut item = f.service.enqueue("q1", &task, "").unwrap();
        let _ = f.service.start(&mut item);

        f.service.reconfigure_and_fail(&mut item, "stalled").unwrap();
        let stored = f.storage.find(item.id).unwrap().unwrap();
        assert_eq!(stored.task.payload["done"], 0);
        assert_eq!(stored.retries, 1);
    }

    #[test]
    fn has_active_tracks_queued_and_running_items() {
        let f = fixture(QueueConfig::default());
        assert!(!f.service.has_active("StepTask", "shop").unwrap());

        let mut item = f.service.enqueue("q1", &step_task(0), "shop").unwrap();
        assert!(f.service.has_active("StepTask", "shop").unwrap());
        assert!(!f.service.has_active("StepTask", "other").unwrap());

        f.service.start(&mut item).unwrap();
        f.service.finish(&mut item).unwrap();
        assert!(!f.service.has_active("StepTask", "shop").unwrap());
    }
}
