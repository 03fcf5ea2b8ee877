//! `shipq-core`: building blocks shared by every layer of the task engine.
//!
//! This crate holds **no IO**: identifiers, the queue item status machine
//! vocabulary, the error taxonomy, time, configuration and the storage-agnostic
//! query filter used by every repository backend.

pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod id;
pub mod precondition;
pub mod query;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffStrategy, HttpMethod, QueueConfig, RetryBackoff};
pub use entity::Entity;
pub use error::{QueueError, QueueResult};
pub use id::{ProcessId, QueueItemId, RunnerGuid, ScheduleId};
pub use precondition::WritePrecondition;
pub use query::{Condition, Connector, Direction, FilterValue, Filterable, Operator, QueryFilter};
pub use status::{QueueItemStatus, MAX_BASE_POINTS};
