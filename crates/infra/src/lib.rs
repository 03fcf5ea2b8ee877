//! Storage, queue service, runner chain, async dispatch and scheduling.

pub mod engine;
pub mod process;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod storage;


pub use engine::{Engine, EngineBuilder};
pub use process::{AsyncBatchStarter, AsyncProcessStarter, AsyncTransport, HttpTransport, Process, RecordingTransport, Runnable, TriggerRequest};
pub use queue::{QueueItem, QueueService};
pub use runner::{QueueItemStarter, RunnerStatus, TaskRunner, TaskRunnerStarter, TaskRunnerWakeupService, WakeupSignal};
pub use scheduler::{Recurrence, Schedule, ScheduleCheckTask, ScheduleService};
pub use storage::{PostgresStorage, Storages};
