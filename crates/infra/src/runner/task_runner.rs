//! One runner sweep: reclaim, dispatch, hand over.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use shipq_core::{Clock, QueueConfig, QueueError, QueueResult, RunnerGuid};
use shipq_events::{EventBus, QueueEvent};

use super::starter::QueueItemStarter;
use super::status::RunnerStatus;
use super::wakeup::WakeupSignal;
use crate::process::{AsyncProcessStarter, Runnable};
use crate::queue::QueueService;
use crate::storage::RunnerStatusStorage;

/// Counts of one sweep, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    pub dispatched: usize,
}

pub struct TaskRunner {
    queue: Arc<QueueService>,
    leases: Arc<dyn RunnerStatusStorage>,
    processes: Arc<AsyncProcessStarter>,
    wakeup: Arc<dyn WakeupSignal>,
    bus: Arc<dyn EventBus<QueueEvent>>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl TaskRunner {
    pub fn new(
        queue: Arc<QueueService>,
        leases: Arc<dyn RunnerStatusStorage>,
        processes: Arc<AsyncProcessStarter>,
        wakeup: Arc<dyn WakeupSignal>,
        bus: Arc<dyn EventBus<QueueEvent>>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            leases,
            processes,
            wakeup,
            bus,
            clock,
            config,
        }
    }

    pub fn holds_lease(&self, guid: RunnerGuid) -> QueueResult<bool> {
        let lease = self.leases.get()?;
        Ok(lease.is_held_by(guid, self.clock.now(), self.config.max_runner_alive_time))
    }

    /// Sweep, then always hand over to the next generation.
    ///
    /// Nothing raised by the sweep escapes: a bad item never breaks the chain.
    pub fn run(&self, guid: RunnerGuid) {
        match self.sweep(guid) {
            Ok(report) => info!(
                runner = %guid,
                requeued = report.requeued,
                failed = report.failed,
                dispatched = report.dispatched,
                "runner sweep finished"
            ),
            Err(QueueError::LeaseConflict(msg)) => {
                warn!(runner = %guid, reason = %msg, "runner lost its lease, sweep abandoned")
            }
            Err(err) => error!(runner = %guid, error = %err, "runner sweep failed"),
        }
        self.hand_over(guid);
    }

    pub fn sweep(&self, guid: RunnerGuid) -> QueueResult<SweepReport> {
        let mut report = SweepReport::default();
        self.ensure_lease(guid)?;
        self.reclaim_expired(guid, &mut report)?;
        self.dispatch_eligible(guid, &mut report)?;
        Ok(report)
    }

    pub fn publish_tick(&self) {
        if let Err(err) = self.bus.publish(QueueEvent::Tick { at: self.clock.now() }) {
            warn!(error = %err, "failed to publish tick");
        }
    }

    fn ensure_lease(&self, guid: RunnerGuid) -> QueueResult<()> {
        if self.holds_lease(guid)? {
            Ok(())
        } else {
            Err(QueueError::lease_conflict(format!("runner {guid} no longer holds the lease")))
        }
    }

    /// Running items silent for longer than their inactivity period are
    /// requeued when they made progress since their last checkpoint and
    /// failed otherwise.
    fn reclaim_expired(&self, guid: RunnerGuid, report: &mut SweepReport) -> QueueResult<()> {
        let now = self.clock.now();
        for mut item in self.queue.find_running()? {
            if !item.is_inactive(now, self.queue.inactivity_period(&item)) {
                continue;
            }
            self.ensure_lease(guid)?;

            let outcome = if item.progress_base_points > item.last_execution_progress_base_points {
                self.queue.requeue(&mut item).map(|()| report.requeued += 1)
            } else {
                let message = format!(
                    "Task {} failed due to extended inactivity period.",
                    item.task_type()
                );
                self.queue
                    .reconfigure_and_fail(&mut item, &message)
                    .map(|()| report.failed += 1)
            };

            match outcome {
                Ok(()) => debug!(item_id = %item.id, status = %item.status, "inactive queue item reclaimed"),
                Err(QueueError::SaveConflict(msg)) => {
                    debug!(item_id = %item.id, reason = %msg, "inactive queue item changed concurrently")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn dispatch_eligible(&self, guid: RunnerGuid, report: &mut SweepReport) -> QueueResult<()> {
        let running = self.queue.find_running()?.len();
        let slots = self.config.max_concurrent_running.saturating_sub(running);
        if slots == 0 {
            debug!(running, "no free slots, dispatch skipped");
            return Ok(());
        }

        for item in self.queue.find_oldest_queued(slots)? {
            self.ensure_lease(guid)?;
            self.processes
                .start(Runnable::QueueItemStarter(QueueItemStarter::new(item.id)))?;
            report.dispatched += 1;
        }
        Ok(())
    }

    /// Pause, release the lease and wake the next generation.
    fn hand_over(&self, guid: RunnerGuid) {
        self.clock.sleep(self.config.wakeup_delay);

        match self.leases.set_status(RunnerStatus::empty(), Some(guid)) {
            Ok(()) => {}
            Err(QueueError::LeaseConflict(_)) => {
                debug!(runner = %guid, "lease already taken over, nothing to release")
            }
            Err(err) => error!(runner = %guid, error = %err, "failed to release runner lease"),
        }

        self.wakeup.wakeup();
    }
}
