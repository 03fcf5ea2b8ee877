//! `shipq-tasks`
//!
//! **Responsibility:** the unit-of-work boundary.
//!
//! A [`Task`] is a serializable value identified by a stable discriminator.
//! It is stored by value inside a queue item and rebuilt through a closed
//! [`TaskRegistry`] before every execution. This crate knows nothing about
//! storage or dispatch; the queue service drives tasks through a
//! [`TaskContext`].

pub mod error;
pub mod payload;
pub mod registry;
pub mod task;

pub use error::TaskError;
pub use payload::TaskPayload;
pub use registry::{TaskFactory, TaskRegistry};
pub use task::{Task, TaskContext};
