//! Runner generations: the lease, the wakeup chain and the sweep.

pub mod starter;
pub mod status;
pub mod task_runner;
pub mod wakeup;

pub use starter::{QueueItemStarter, TaskRunnerStarter};
pub use status::RunnerStatus;
pub use task_runner::TaskRunner;
pub use wakeup::{TaskRunnerWakeupService, WakeupSignal};
