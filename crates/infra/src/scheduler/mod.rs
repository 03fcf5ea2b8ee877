//! Recurring and one-shot schedules, driven by the runner's tick.

pub mod check_task;
pub mod recurrence;
pub mod schedule;
pub mod service;
pub mod tick;

pub use check_task::ScheduleCheckTask;
pub use recurrence::Recurrence;
pub use schedule::Schedule;
pub use service::{ScheduleService, TriggerReport};
pub use tick::ScheduleTickHandler;
