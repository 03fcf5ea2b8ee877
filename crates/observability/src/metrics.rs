use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use shipq_core::QueueItemStatus;
use shipq_events::{EventHandler, QueueEvent, StatusChangePhase};

/// Counters of queue activity since process start.
///
/// Counts only `After` status notifications, i.e. writes storage accepted.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
    ticks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub started: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub aborted: u64,
    pub ticks: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, previous: Option<QueueItemStatus>, current: QueueItemStatus) -> Option<&AtomicU64> {
        match (previous, current) {
            (None | Some(QueueItemStatus::Created), QueueItemStatus::Queued) => Some(&self.enqueued),
            (Some(QueueItemStatus::InProgress), QueueItemStatus::Queued) => Some(&self.requeued),
            (_, QueueItemStatus::InProgress) => Some(&self.started),
            (_, QueueItemStatus::Completed) => Some(&self.completed),
            (_, QueueItemStatus::Failed) => Some(&self.failed),
            (_, QueueItemStatus::Aborted) => Some(&self.aborted),
            _ => None,
        }
    }
}

impl EventHandler<QueueEvent> for QueueMetrics {
    fn name(&self) -> &'static str {
        "queue_metrics"
    }

    fn handle(&self, event: &QueueEvent) -> anyhow::Result<()> {
        match event {
            QueueEvent::StatusChanged {
                phase: StatusChangePhase::After,
                previous,
                current,
                ..
            } => {
                if let Some(counter) = self.counter(*previous, *current) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }
            QueueEvent::Tick { .. } => {
                self.ticks.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shipq_core::QueueItemId;

    use super::*;

    fn changed(phase: StatusChangePhase, previous: Option<QueueItemStatus>, current: QueueItemStatus) -> QueueEvent {
        QueueEvent::StatusChanged {
            phase,
            item_id: QueueItemId::new(),
            queue_name: "labels".to_string(),
            task_type: "PrintLabel".to_string(),
            previous,
            current,
        }
    }

    #[test]
    fn counts_accepted_transitions_only() {
        let metrics = QueueMetrics::new();
        let events = [
            changed(StatusChangePhase::Before, None, QueueItemStatus::Queued),
            changed(StatusChangePhase::After, None, QueueItemStatus::Queued),
            changed(StatusChangePhase::After, Some(QueueItemStatus::Queued), QueueItemStatus::InProgress),
            changed(StatusChangePhase::After, Some(QueueItemStatus::InProgress), QueueItemStatus::Queued),
            changed(StatusChangePhase::After, Some(QueueItemStatus::Queued), QueueItemStatus::InProgress),
            changed(StatusChangePhase::After, Some(QueueItemStatus::InProgress), QueueItemStatus::Completed),
            QueueEvent::Tick { at: Utc::now() },
        ];
        for event in &events {
            metrics.handle(event).unwrap();
        }

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                enqueued: 1,
                started: 2,
                completed: 1,
                requeued: 1,
                ticks: 1,
                ..MetricsSnapshot::default()
            }
        );
    }

    #[test]
    fn snapshot_serializes_flat() {
        let value = serde_json::to_value(QueueMetrics::new().snapshot()).unwrap();
        assert_eq!(value["failed"], 0);
    }
}
