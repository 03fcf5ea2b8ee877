use shipq_events::{EventHandler, QueueEvent, StatusChangePhase};
use tracing::{debug, info, trace};

/// Logs every queue event; registered as a synchronous bus handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueEventLogger;

impl QueueEventLogger {
    pub fn new() -> Self {
        Self
    }
}

impl EventHandler<QueueEvent> for QueueEventLogger {
    fn name(&self) -> &'static str {
        "queue_event_logger"
    }

    fn handle(&self, event: &QueueEvent) -> anyhow::Result<()> {
        match event {
            QueueEvent::StatusChanged {
                phase: StatusChangePhase::Before,
                item_id,
                previous,
                current,
                ..
            } => debug!(
                item_id = %item_id,
                previous = ?previous,
                next = %current,
                "queue item status changing"
            ),
            QueueEvent::StatusChanged {
                phase: StatusChangePhase::After,
                item_id,
                queue_name,
                task_type,
                previous,
                current,
            } => info!(
                item_id = %item_id,
                queue = %queue_name,
                task_type = %task_type,
                previous = ?previous,
                status = %current,
                "queue item status changed"
            ),
            QueueEvent::Progress { item_id, base_points } => {
                debug!(item_id = %item_id, base_points, "queue item progress")
            }
            QueueEvent::Alive { item_id } => trace!(item_id = %item_id, "queue item alive"),
            QueueEvent::Tick { at } => debug!(at = %at, "runner tick"),
        }
        Ok(())
    }
}
