use std::sync::Arc;

use tracing::{debug, error};

use shipq_core::{Clock, QueueConfig, QueueError, QueueResult, RunnerGuid};

use super::starter::TaskRunnerStarter;
use super::status::RunnerStatus;
use crate::process::{AsyncProcessStarter, Runnable};
use crate::storage::RunnerStatusStorage;

/// Something that can (re)start the runner chain.
///
/// Called after enqueue, after a runner hands over and after a schedule tick;
/// implementations must never fail their caller.
pub trait WakeupSignal: Send + Sync {
    fn wakeup(&self);
}

/// Spawns the next runner generation unless a live one holds the lease.
pub struct TaskRunnerWakeupService {
    leases: Arc<dyn RunnerStatusStorage>,
    processes: Arc<AsyncProcessStarter>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl TaskRunnerWakeupService {
    pub fn new(
        leases: Arc<dyn RunnerStatusStorage>,
        processes: Arc<AsyncProcessStarter>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            leases,
            processes,
            clock,
            config,
        }
    }

    /// Acquire the lease and dispatch a [`TaskRunnerStarter`].
    ///
    /// Returns the new generation's guid, or `None` when a live runner
    /// already holds the lease.
    pub fn try_wakeup(&self) -> QueueResult<Option<RunnerGuid>> {
        let now = self.clock.now();
        let current = self.leases.get()?;

        if let Some(holder) = current.guid {
            if !current.is_expired(now, self.config.max_runner_alive_time) {
                debug!(runner = %holder, "runner alive, wakeup skipped");
                return Ok(None);
            }
            debug!(runner = %holder, "clearing expired runner lease");
            self.leases.set_status(RunnerStatus::empty(), Some(holder))?;
        }

        let guid = RunnerGuid::new();
        self.leases.set_status(RunnerStatus::alive(guid, now), None)?;
        let process = self
            .processes
            .start(Runnable::TaskRunnerStarter(TaskRunnerStarter::new(guid)))?;
        debug!(runner = %guid, process = %process, "runner generation dispatched");
        Ok(Some(guid))
    }
}

impl WakeupSignal for TaskRunnerWakeupService {
    fn wakeup(&self) {
        match self.try_wakeup() {
            Ok(_) => {}
            Err(QueueError::LeaseConflict(msg)) => {
                debug!(reason = %msg, "another wakeup won the lease");
            }
            Err(err) => error!(error = %err, "runner wakeup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shipq_core::ManualClock;

    use super::*;
    use crate::process::{RecordingTransport, TriggerRequest};
    use crate::storage::{InMemoryProcessStorage, InMemoryRunnerStatusStorage, ProcessStorage};

    fn service() -> (TaskRunnerWakeupService, Arc<RecordingTransport>, Arc<InMemoryRunnerStatusStorage>, Arc<ManualClock>) {
        let clock = ManualClock::arc(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let leases = Arc::new(InMemoryRunnerStatusStorage::new());
        let config = QueueConfig::default();
        let processes = Arc::new(AsyncProcessStarter::new(
            Arc::new(InMemoryProcessStorage::new()),
            transport.clone(),
            clock.clone(),
            &config,
        ));
        let wakeup = TaskRunnerWakeupService::new(leases.clone(), processes, clock.clone(), config);
        (wakeup, transport, leases, clock)
    }

    #[test]
    fn live_lease_makes_wakeup_idempotent() {
        let (wakeup, transport, leases, _) = service();

        wakeup.wakeup();
        wakeup.wakeup();

        let sent: Vec<TriggerRequest> = transport.drain();
        assert_eq!(sent.len(), 1);
        assert!(!leases.get().unwrap().is_empty());
    }

    #[test]
    fn expired_lease_is_replaced() {
        let (wakeup, transport, leases, clock) = service();
        let first = wakeup.try_wakeup().unwrap().unwrap();

        clock.advance(std::time::Duration::from_secs(61));
        let second = wakeup.try_wakeup().unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(leases.get().unwrap().guid, Some(second));
        assert_eq!(transport.drain().len(), 2);
    }

    #[test]
    fn dispatched_process_carries_the_runner_guid() {
        let (wakeup, transport, _, _) = service();
        let guid = wakeup.try_wakeup().unwrap().unwrap();

        let request = transport.drain().remove(0);
        assert!(request.url.ends_with(&request.guid.to_string()));
        assert!(matches!(
            wakeup.processes.storage().find(request.guid).unwrap().map(|p| p.runnable),
            Some(Runnable::TaskRunnerStarter(starter)) if starter.guid == guid
        ));
    }
}
