//! Wires every component of the engine together.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::info;

use shipq_core::{Clock, ProcessId, QueueConfig, QueueResult, SystemClock};
use shipq_events::{EventBus, InMemoryEventBus, QueueEvent};
use shipq_tasks::{Task, TaskRegistry};

use crate::process::{AsyncBatchStarter, AsyncProcessStarter, AsyncTransport, HttpTransport, Runnable};
use crate::queue::QueueService;
use crate::runner::{TaskRunner, TaskRunnerWakeupService, WakeupSignal};
use crate::scheduler::{ScheduleCheckTask, ScheduleService, ScheduleTickHandler};
use crate::storage::Storages;

/// Builder for [`Engine`].
///
/// Defaults: `QueueConfig::default()`, the system clock, in-memory storage,
/// an in-memory event bus and the blocking HTTP transport.
pub struct EngineBuilder {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    storages: Storages,
    transport: Option<Arc<dyn AsyncTransport>>,
    bus: Option<Arc<dyn EventBus<QueueEvent>>>,
    registry: TaskRegistry,
}

impl EngineBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            storages: Storages::in_memory(),
            transport: None,
            bus: None,
            registry: TaskRegistry::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_storages(mut self, storages: Storages) -> Self {
        self.storages = storages;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn AsyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus<QueueEvent>>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn register<T>(mut self, task_type: &str) -> Self
    where
        T: Task + serde::de::DeserializeOwned + 'static,
    {
        self.registry.register::<T>(task_type);
        self
    }

    pub fn register_with<F>(mut self, task_type: &str, factory: F) -> Self
    where
        F: Fn(JsonValue) -> QueueResult<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.registry.register_with(task_type, factory);
        self
    }

    pub fn build(self) -> QueueResult<Engine> {
        let Self {
            config,
            clock,
            storages,
            transport,
            bus,
            mut registry,
        } = self;
        config.validate()?;

        let transport = transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::new(config.async_request_timeout)) as Arc<dyn AsyncTransport>
        });
        let bus = bus.unwrap_or_else(|| {
            Arc::new(InMemoryEventBus::<QueueEvent>::new()) as Arc<dyn EventBus<QueueEvent>>
        });

        let processes = Arc::new(AsyncProcessStarter::new(
            storages.processes.clone(),
            transport,
            clock.clone(),
            &config,
        ));
        let wakeup = Arc::new(TaskRunnerWakeupService::new(
            storages.leases.clone(),
            processes.clone(),
            clock.clone(),
            config.clone(),
        ));
        let schedules = Arc::new(ScheduleService::new(storages.schedules.clone(), clock.clone()));

        // The check task enqueues through the service that rebuilds it.
        let queue = Arc::new_cyclic(|queue: &Weak<QueueService>| {
            registry.register_with(
                ScheduleCheckTask::TYPE,
                ScheduleCheckTask::factory(queue.clone(), schedules.clone()),
            );
            QueueService::new(
                storages.queue.clone(),
                registry,
                clock.clone(),
                bus.clone(),
                config.clone(),
                wakeup.clone(),
            )
        });

        bus.register_handler(Arc::new(ScheduleTickHandler::new(
            Arc::downgrade(&queue),
            config.scheduler_time_threshold,
        )));

        let runner = Arc::new(TaskRunner::new(
            queue.clone(),
            storages.leases.clone(),
            processes.clone(),
            wakeup.clone(),
            bus.clone(),
            clock.clone(),
            config.clone(),
        ));

        info!(
            task_types = ?queue.registry().task_types().collect::<Vec<_>>(),
            max_concurrent_running = config.max_concurrent_running,
            "engine ready"
        );

        Ok(Engine {
            config,
            clock,
            storages,
            bus,
            queue,
            schedules,
            processes,
            wakeup,
            runner,
        })
    }
}

/// Every component of a running engine.
///
/// The host owns one `Engine` and forwards each async callback to
/// [`Engine::run_process`].
#[derive(Clone)]
pub struct Engine {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    storages: Storages,
    bus: Arc<dyn EventBus<QueueEvent>>,
    queue: Arc<QueueService>,
    schedules: Arc<ScheduleService>,
    processes: Arc<AsyncProcessStarter>,
    wakeup: Arc<TaskRunnerWakeupService>,
    runner: Arc<TaskRunner>,
}

impl Engine {
    pub fn builder(config: QueueConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn storages(&self) -> &Storages {
        &self.storages
    }

    pub fn bus(&self) -> &Arc<dyn EventBus<QueueEvent>> {
        &self.bus
    }

    pub fn queue(&self) -> &Arc<QueueService> {
        &self.queue
    }

    pub fn schedules(&self) -> &Arc<ScheduleService> {
        &self.schedules
    }

    pub fn processes(&self) -> &Arc<AsyncProcessStarter> {
        &self.processes
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    pub fn wakeup_service(&self) -> &Arc<TaskRunnerWakeupService> {
        &self.wakeup
    }

    /// Start the runner chain unless a live runner holds the lease.
    pub fn wakeup(&self) {
        self.wakeup.wakeup();
    }

    /// Execute the process parked under `guid`. Blocks for the whole run.
    pub fn run_process(&self, guid: ProcessId) -> QueueResult<()> {
        self.processes.run_process(guid, |runnable| self.execute(runnable))
    }

    /// Dispatch many runnables through a bounded fan-out tree.
    pub fn start_batch(&self, runnables: impl IntoIterator<Item = Runnable>) -> QueueResult<Vec<ProcessId>> {
        let mut batch = AsyncBatchStarter::new(self.config.async_batch_size);
        batch.extend(runnables);
        batch.run(&self.processes)
    }

    /// Estimated time for a batch of this shape to reach every leaf.
    pub fn batch_wait_time(&self, batch: &AsyncBatchStarter) -> Duration {
        batch.wait_time(self.config.async_request_duration)
    }

    fn execute(&self, runnable: Runnable) -> QueueResult<()> {
        match runnable {
            Runnable::TaskRunnerStarter(starter) => starter.run(&self.runner),
            Runnable::QueueItemStarter(starter) => starter.run(&self.queue),
            Runnable::Batch(batch) => batch.run(&self.processes).map(|_| ()),
        }
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("storages", &self.storages)
            .finish_non_exhaustive()
    }
}
