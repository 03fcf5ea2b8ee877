use std::sync::Arc;

use tracing::{debug, error, warn};

use shipq_core::{Clock, HttpMethod, ProcessId, QueueConfig, QueueResult};

use super::transport::{AsyncTransport, TriggerRequest};
use super::{Process, Runnable};
use crate::storage::ProcessStorage;

/// Parks a runnable and triggers the async endpoint with its guid.
///
/// The outbound call is fire and forget: a failed trigger is logged and its
/// record dropped, since nothing will ever claim it. Later wakeups retry the
/// chain as a whole.
pub struct AsyncProcessStarter {
    storage: Arc<dyn ProcessStorage>,
    transport: Arc<dyn AsyncTransport>,
    clock: Arc<dyn Clock>,
    method: HttpMethod,
    url_template: String,
}

impl AsyncProcessStarter {
    pub fn new(
        storage: Arc<dyn ProcessStorage>,
        transport: Arc<dyn AsyncTransport>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            storage,
            transport,
            clock,
            method: config.async_process_method,
            url_template: config.async_process_url.clone(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ProcessStorage> {
        &self.storage
    }

    pub fn start(&self, runnable: Runnable) -> QueueResult<ProcessId> {
        let process = Process::new(runnable, self.clock.now());
        self.storage.save(&process)?;

        let request = TriggerRequest {
            method: self.method,
            url: self
                .url_template
                .replace(shipq_core::config::GUID_PLACEHOLDER, &process.id.to_string()),
            guid: process.id,
        };
        match self.transport.trigger(&request) {
            Ok(()) => debug!(process = %process.id, kind = process.runnable.kind(), "async process triggered"),
            Err(err) => {
                warn!(process = %process.id, url = %request.url, error = %err, "async trigger failed");
                if let Err(err) = self.storage.delete(process.id) {
                    error!(process = %process.id, error = %err, "failed to drop undelivered async process");
                }
            }
        }
        Ok(process.id)
    }

    /// Load, execute and delete one process record.
    ///
    /// The record is deleted whether or not the runnable succeeded; a failing
    /// runnable is logged. Only storage failures reach the caller.
    pub fn run_process<F>(&self, guid: ProcessId, execute: F) -> QueueResult<()>
    where
        F: FnOnce(Runnable) -> QueueResult<()>,
    {
        let Some(process) = self.storage.find(guid)? else {
            warn!(process = %guid, "async process not found");
            return Ok(());
        };
        let kind = process.runnable.kind();

        let outcome = execute(process.runnable);
        self.storage.delete(guid)?;

        match outcome {
            Ok(()) => debug!(process = %guid, kind, "async process completed"),
            Err(err) => error!(process = %guid, kind, error = %err, "async process failed"),
        }
        Ok(())
    }
}

impl core::fmt::Debug for AsyncProcessStarter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncProcessStarter")
            .field("method", &self.method)
            .field("url_template", &self.url_template)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shipq_core::{ManualClock, QueueError, QueueItemId};

    use super::*;
    use crate::process::RecordingTransport;
    use crate::runner::QueueItemStarter;
    use crate::storage::InMemoryProcessStorage;

    fn starter() -> (AsyncProcessStarter, Arc<RecordingTransport>, Arc<InMemoryProcessStorage>) {
        let clock = ManualClock::arc(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let storage = Arc::new(InMemoryProcessStorage::new());
        let config = QueueConfig::default()
            .with_async_process(HttpMethod::Get, "http://shop.test/async?guid={guid}");
        let starter = AsyncProcessStarter::new(storage.clone(), transport.clone(), clock, &config);
        (starter, transport, storage)
    }

    fn runnable() -> Runnable {
        Runnable::QueueItemStarter(QueueItemStarter::new(QueueItemId::new()))
    }

    #[test]
    fn start_persists_then_triggers_templated_url() {
        let (starter, transport, storage) = starter();

        let guid = starter.start(runnable()).unwrap();

        let sent = transport.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(sent[0].url, format!("http://shop.test/async?guid={guid}"));
        assert!(storage.find(guid).unwrap().is_some());
    }

    #[test]
    fn failed_trigger_is_swallowed_and_its_record_dropped() {
        let (starter, transport, storage) = starter();
        transport.set_failing(true);

        let guid = starter.start(runnable()).unwrap();

        assert_eq!(transport.len(), 1);
        assert!(storage.find(guid).unwrap().is_none());
        assert!(storage.list().unwrap().is_empty());
    }

    #[test]
    fn run_process_deletes_even_when_the_runnable_fails() {
        let (starter, _, storage) = starter();
        let guid = starter.start(runnable()).unwrap();

        let mut seen = None;
        starter
            .run_process(guid, |r| {
                seen = Some(r);
                Err(QueueError::execution("boom"))
            })
            .unwrap();

        assert!(matches!(seen, Some(Runnable::QueueItemStarter(_))));
        assert!(storage.find(guid).unwrap().is_none());
    }

    #[test]
    fn unknown_guid_is_a_no_op() {
        let (starter, _, _) = starter();
        let mut called = false;
        starter
            .run_process(ProcessId::new(), |_| {
                called = true;
                Ok(())
            })
            .unwrap();
        assert!(!called);
    }
}
