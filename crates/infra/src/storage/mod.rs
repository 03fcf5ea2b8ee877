//! Storage contracts consumed by the engine.
//!
//! The traits are synchronous and object safe; components hold them as
//! `Arc<dyn …>`. Two backends ship with the crate:
//!
//! - [`in_memory`]: `RwLock`-guarded tables for tests/dev
//! - [`postgres`]: `sqlx` runtime queries bridged onto a tokio runtime handle

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shipq_core::{
    Direction, Operator, ProcessId, QueryFilter, QueueItemId, QueueItemStatus, QueueResult,
    RunnerGuid, ScheduleId, WritePrecondition,
};

use crate::process::Process;
use crate::queue::QueueItem;
use crate::runner::RunnerStatus;
use crate::scheduler::Schedule;

pub use in_memory::{
    InMemoryProcessStorage, InMemoryQueueStorage, InMemoryRunnerStatusStorage,
    InMemoryScheduleStorage,
};
pub use postgres::PostgresStorage;

pub trait QueueStorage: Send + Sync {
    /// Insert or overwrite unconditionally.
    fn save(&self, item: &QueueItem) -> QueueResult<()>;

    /// Overwrite only if the stored row still matches `precondition`;
    /// otherwise `SaveConflict`.
    fn save_conditional(&self, item: &QueueItem, precondition: WritePrecondition) -> QueueResult<()>;

    fn find(&self, id: QueueItemId) -> QueueResult<Option<QueueItem>>;

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<QueueItem>>;

    fn delete(&self, id: QueueItemId) -> QueueResult<bool>;

    /// Oldest QUEUED item of every queue that has no IN_PROGRESS item,
    /// oldest first, at most `limit`.
    ///
    /// A queue whose oldest item may not start before `now` is left out
    /// before the limit applies; its younger items never overtake it.
    fn find_oldest_queued(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<QueueItem>>;

    /// Most recently queued item of a task type, optionally within one context.
    fn find_latest_by_type(&self, task_type: &str, context: Option<&str>) -> QueueResult<Option<QueueItem>> {
        let mut filter = QueryFilter::new().and("task_type", Operator::Equals, task_type);
        if let Some(context) = context {
            filter = filter.and("context", Operator::Equals, context);
        }
        let filter = filter
            .with_order("queue_timestamp", Direction::Desc)
            .with_limit(1);
        Ok(self.select(&filter)?.into_iter().next())
    }

    fn find_by_status(&self, status: QueueItemStatus) -> QueueResult<Vec<QueueItem>> {
        self.select(
            &QueryFilter::new()
                .and("status", Operator::Equals, status.as_str())
                .with_order("queue_timestamp", Direction::Asc),
        )
    }
}

pub trait ScheduleStorage: Send + Sync {
    /// Insert or overwrite.
    fn save(&self, schedule: &Schedule) -> QueueResult<()>;

    /// Overwrite an existing schedule; `NotFound` if it is gone.
    fn update(&self, schedule: &Schedule) -> QueueResult<()>;

    fn delete(&self, id: ScheduleId) -> QueueResult<bool>;

    fn find(&self, id: ScheduleId) -> QueueResult<Option<Schedule>>;

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<Schedule>>;
}

pub trait ProcessStorage: Send + Sync {
    fn save(&self, process: &Process) -> QueueResult<()>;

    fn find(&self, id: ProcessId) -> QueueResult<Option<Process>>;

    fn delete(&self, id: ProcessId) -> QueueResult<bool>;

    fn list(&self) -> QueueResult<Vec<Process>>;
}

/// Singleton runner lease record.
pub trait RunnerStatusStorage: Send + Sync {
    fn get(&self) -> QueueResult<RunnerStatus>;

    /// Replace the lease only if the stored guid equals `expected`
    /// (`None` = no active runner); otherwise `LeaseConflict`.
    fn set_status(&self, status: RunnerStatus, expected: Option<RunnerGuid>) -> QueueResult<()>;
}

/// One handle per contract, as consumed by the engine builder.
#[derive(Clone)]
pub struct Storages {
    pub queue: Arc<dyn QueueStorage>,
    pub schedules: Arc<dyn ScheduleStorage>,
    pub processes: Arc<dyn ProcessStorage>,
    pub leases: Arc<dyn RunnerStatusStorage>,
}

impl Storages {
    pub fn in_memory() -> Self {
        Self {
            queue: Arc::new(InMemoryQueueStorage::new()),
            schedules: Arc::new(InMemoryScheduleStorage::new()),
            processes: Arc::new(InMemoryProcessStorage::new()),
            leases: Arc::new(InMemoryRunnerStatusStorage::new()),
        }
    }

    /// Every contract served by one Postgres pool.
    pub fn postgres(storage: PostgresStorage) -> Self {
        let storage = Arc::new(storage);
        Self {
            queue: storage.clone(),
            schedules: storage.clone(),
            processes: storage.clone(),
            leases: storage,
        }
    }
}

impl core::fmt::Debug for Storages {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Storages").finish_non_exhaustive()
    }
}
