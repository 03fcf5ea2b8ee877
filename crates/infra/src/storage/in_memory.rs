//! In-memory storage for tests/dev.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use shipq_core::{
    Entity, Filterable, ProcessId, QueryFilter, QueueError, QueueItemId, QueueItemStatus,
    QueueResult, RunnerGuid, ScheduleId, WritePrecondition,
};

use super::{ProcessStorage, QueueStorage, RunnerStatusStorage, ScheduleStorage};
use crate::process::Process;
use crate::queue::QueueItem;
use crate::runner::RunnerStatus;
use crate::scheduler::Schedule;

/// Rows kept in insertion order so ties in ordering stay FIFO.
#[derive(Debug)]
struct Table<E> {
    rows: RwLock<Vec<E>>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl<E> Table<E>
where
    E: Entity + Filterable + Clone,
{
    fn upsert(&self, entity: &E) -> QueueResult<()> {
        let mut rows = self.rows.write()?;
        match rows.iter_mut().find(|row| row.id() == entity.id()) {
            Some(row) => *row = entity.clone(),
            None => rows.push(entity.clone()),
        }
        Ok(())
    }

    /// Overwrite an existing row if `check` accepts its current state.
    fn replace_if<F>(&self, entity: &E, check: F) -> QueueResult<()>
    where
        F: FnOnce(&E) -> QueueResult<()>,
    {
        let mut rows = self.rows.write()?;
        let row = rows
            .iter_mut()
            .find(|row| row.id() == entity.id())
            .ok_or_else(|| QueueError::not_found(entity.id().to_string()))?;
        check(row)?;
        *row = entity.clone();
        Ok(())
    }

    fn find(&self, id: &E::Id) -> QueueResult<Option<E>> {
        let rows = self.rows.read()?;
        Ok(rows.iter().find(|row| row.id() == id).cloned())
    }

    fn delete(&self, id: &E::Id) -> QueueResult<bool> {
        let mut rows = self.rows.write()?;
        let before = rows.len();
        rows.retain(|row| row.id() != id);
        Ok(rows.len() != before)
    }

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<E>> {
        let rows = self.rows.read()?;
        filter.apply(rows.iter().cloned())
    }

    fn all(&self) -> QueueResult<Vec<E>> {
        Ok(self.rows.read()?.clone())
    }
}

/// In-memory queue item table.
///
/// [`InMemoryQueueStorage::set_unavailable`] makes every call fail with
/// `StorageUnavailable`, simulating a backend outage.
#[derive(Debug, Default)]
pub struct InMemoryQueueStorage {
    items: Table<QueueItem>,
    unavailable: AtomicBool,
}

impl InMemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::storage("queue storage is offline"))
        } else {
            Ok(())
        }
    }
}

impl QueueStorage for InMemoryQueueStorage {
    fn save(&self, item: &QueueItem) -> QueueResult<()> {
        self.available()?;
        self.items.upsert(item)
    }

    fn save_conditional(&self, item: &QueueItem, precondition: WritePrecondition) -> QueueResult<()> {
        self.available()?;
        self.items.replace_if(item, |stored| {
            precondition.check(stored.status, stored.last_update_timestamp)
        })
    }

    fn find(&self, id: QueueItemId) -> QueueResult<Option<QueueItem>> {
        self.available()?;
        self.items.find(&id)
    }

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<QueueItem>> {
        self.available()?;
        self.items.select(filter)
    }

    fn delete(&self, id: QueueItemId) -> QueueResult<bool> {
        self.available()?;
        self.items.delete(&id)
    }

    fn find_oldest_queued(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<QueueItem>> {
        self.available()?;
        let rows = self.items.all()?;

        let busy: BTreeSet<&str> = rows
            .iter()
            .filter(|item| item.status == QueueItemStatus::InProgress)
            .map(|item| item.queue_name.as_str())
            .collect();

        let mut oldest: BTreeMap<&str, &QueueItem> = BTreeMap::new();
        for item in rows
            .iter()
            .filter(|item| item.status == QueueItemStatus::Queued)
            .filter(|item| !busy.contains(item.queue_name.as_str()))
        {
            let slot = oldest.entry(item.queue_name.as_str()).or_insert(item);
            if item.queue_timestamp < slot.queue_timestamp {
                *slot = item;
            }
        }

        let mut selected: Vec<QueueItem> = oldest
            .into_values()
            .filter(|item| item.is_eligible(now))
            .cloned()
            .collect();
        selected.sort_by_key(|item| item.queue_timestamp);
        selected.truncate(limit);
        Ok(selected)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleStorage {
    schedules: Table<Schedule>,
}

impl InMemoryScheduleStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStorage for InMemoryScheduleStorage {
    fn save(&self, schedule: &Schedule) -> QueueResult<()> {
        self.schedules.upsert(schedule)
    }

    fn update(&self, schedule: &Schedule) -> QueueResult<()> {
        self.schedules.replace_if(schedule, |_| Ok(()))
    }

    fn delete(&self, id: ScheduleId) -> QueueResult<bool> {
        self.schedules.delete(&id)
    }

    fn find(&self, id: ScheduleId) -> QueueResult<Option<Schedule>> {
        self.schedules.find(&id)
    }

    fn select(&self, filter: &QueryFilter) -> QueueResult<Vec<Schedule>> {
        self.schedules.select(filter)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProcessStorage {
    processes: Table<Process>,
}

impl InMemoryProcessStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessStorage for InMemoryProcessStorage {
    fn save(&self, process: &Process) -> QueueResult<()> {
        self.processes.upsert(process)
    }

    fn find(&self, id: ProcessId) -> QueueResult<Option<Process>> {
        self.processes.find(&id)
    }

    fn delete(&self, id: ProcessId) -> QueueResult<bool> {
        self.processes.delete(&id)
    }

    fn list(&self) -> QueueResult<Vec<Process>> {
        self.processes.all()
    }
}

#[derive(Debug)]
pub struct InMemoryRunnerStatusStorage {
    status: RwLock<RunnerStatus>,
}

impl InMemoryRunnerStatusStorage {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RunnerStatus::empty()),
        }
    }
}

impl Default for InMemoryRunnerStatusStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerStatusStorage for InMemoryRunnerStatusStorage {
    fn get(&self) -> QueueResult<RunnerStatus> {
        Ok(self.status.read()?.clone())
    }

    fn set_status(&self, status: RunnerStatus, expected: Option<RunnerGuid>) -> QueueResult<()> {
        let mut current = self.status.write()?;
        if current.guid != expected {
            return Err(QueueError::lease_conflict(format!(
                "expected runner {expected:?}, found {:?}",
                current.guid
            )));
        }
        *current = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shipq_core::{Direction, Operator};
    use shipq_tasks::TaskPayload;

    use super::*;

    fn item(queue: &str, minute: u32) -> QueueItem {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap();
        let mut item = QueueItem::new(queue, "", TaskPayload::new("Noop", serde_json::json!({})), at);
        item.enqueue(at).unwrap();
        item
    }

    fn late() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn oldest_queued_is_one_per_idle_queue() {
        let storage = InMemoryQueueStorage::new();
        let a1 = item("a", 1);
        let a0 = item("a", 0);
        let b2 = item("b", 2);
        let mut c3 = item("c", 3);
        let c4 = item("c", 4);
        c3.start(Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap()).unwrap();
        for i in [&a1, &a0, &b2, &c3, &c4] {
            storage.save(i).unwrap();
        }

        let picked = storage.find_oldest_queued(late(), 10).unwrap();
        let ids: Vec<_> = picked.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a0.id, b2.id]);

        assert_eq!(storage.find_oldest_queued(late(), 1).unwrap().len(), 1);
    }

    #[test]
    fn backing_off_queue_heads_do_not_take_the_free_slots() {
        let storage = InMemoryQueueStorage::new();
        let mut a0 = item("a", 0);
        let a1 = item("a", 1);
        let b2 = item("b", 2);
        a0.start(late()).unwrap();
        a0.fail("carrier down", 5, std::time::Duration::from_secs(3_600), late()).unwrap();
        for i in [&a0, &a1, &b2] {
            storage.save(i).unwrap();
        }

        let picked = storage.find_oldest_queued(late(), 1).unwrap();
        let ids: Vec<_> = picked.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b2.id]);

        let after_backoff = late() + chrono::Duration::hours(2);
        let ids: Vec<_> = storage
            .find_oldest_queued(after_backoff, 10)
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![a0.id, b2.id]);
    }

    #[test]
    fn conditional_save_rejects_stale_writers() {
        let storage = InMemoryQueueStorage::new();
        let original = item("a", 0);
        storage.save(&original).unwrap();

        let mut first = original.clone();
        first.start(Utc::now()).unwrap();
        let precondition = WritePrecondition::observed(original.status, original.last_update_timestamp);
        storage.save_conditional(&first, precondition).unwrap();

        let mut second = original.clone();
        second.start(Utc::now()).unwrap();
        let err = storage.save_conditional(&second, precondition).unwrap_err();
        assert!(matches!(err, QueueError::SaveConflict(_)));
    }

    #[test]
    fn latest_by_type_orders_by_queue_time() {
        let storage = InMemoryQueueStorage::new();
        let old = item("a", 0);
        let new = item("b", 9);
        storage.save(&new).unwrap();
        storage.save(&old).unwrap();

        let latest = storage.find_latest_by_type("Noop", Some("")).unwrap().unwrap();
        assert_eq!(latest.id, new.id);
        assert!(storage.find_latest_by_type("Other", None).unwrap().is_none());

        let filter = QueryFilter::new()
            .and("queue_name", Operator::In, vec!["a", "b"])
            .with_order("queue_timestamp", Direction::Asc);
        assert_eq!(storage.select(&filter).unwrap()[0].id, old.id);
    }

    #[test]
    fn offline_storage_fails_every_call() {
        let storage = InMemoryQueueStorage::new();
        storage.set_unavailable(true);
        assert!(matches!(storage.find_oldest_queued(late(), 1), Err(QueueError::StorageUnavailable(_))));
        storage.set_unavailable(false);
        assert!(storage.find_oldest_queued(late(), 1).unwrap().is_empty());
    }

    #[test]
    fn lease_writes_are_compare_and_set() {
        let leases = InMemoryRunnerStatusStorage::new();
        let now = Utc::now();
        let first = RunnerGuid::new();
        let second = RunnerGuid::new();

        leases.set_status(RunnerStatus::alive(first, now), None).unwrap();
        let err = leases.set_status(RunnerStatus::alive(second, now), None).unwrap_err();
        assert!(matches!(err, QueueError::LeaseConflict(_)));

        leases.set_status(RunnerStatus::empty(), Some(first)).unwrap();
        assert!(leases.get().unwrap().is_empty());
    }
}
