//! Runnables dispatched by the runner chain.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use shipq_core::{QueueItemId, QueueItemStatus, QueueResult, RunnerGuid};

use super::task_runner::TaskRunner;
use crate::queue::QueueService;

/// Entry point of one runner generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunnerStarter {
    pub guid: RunnerGuid,
}

impl TaskRunnerStarter {
    pub fn new(guid: RunnerGuid) -> Self {
        Self { guid }
    }

    /// Run one sweep if this generation still holds the lease, then tick.
    pub fn run(&self, runner: &TaskRunner) -> QueueResult<()> {
        if !runner.holds_lease(self.guid)? {
            warn!(runner = %self.guid, "stale runner dispatch, lease held elsewhere");
            return Ok(());
        }
        runner.run(self.guid);
        runner.publish_tick();
        Ok(())
    }
}

/// Executes one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemStarter {
    pub item_id: QueueItemId,
}

impl QueueItemStarter {
    pub fn new(item_id: QueueItemId) -> Self {
        Self { item_id }
    }

    /// `start` then `finish`; an error on a running item is routed to `fail`.
    pub fn run(&self, queue: &QueueService) -> QueueResult<()> {
        let Some(mut item) = queue.find(self.item_id)? else {
            warn!(item_id = %self.item_id, "queue item to start no longer exists");
            return Ok(());
        };
        if item.status != QueueItemStatus::Queued {
            debug!(item_id = %self.item_id, status = %item.status, "queue item not startable, skipped");
            return Ok(());
        }

        let outcome = queue.start(&mut item).and_then(|()| queue.finish(&mut item));
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if item.status == QueueItemStatus::InProgress => {
                warn!(item_id = %item.id, error = %err, "queue item execution failed");
                queue.fail(&mut item, &err.to_string())
            }
            Err(err) => Err(err),
        }
    }
}
