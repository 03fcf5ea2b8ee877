//! `shipq-events`: the queue engine's signal bus.
//!
//! Publishers (queue service, runner) emit [`QueueEvent`]s; synchronous
//! [`EventHandler`]s (status logger, metrics, scheduler tick handler) and
//! channel [`Subscription`]s consume them.

pub mod bus;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use event::{QueueEvent, StatusChangePhase};
pub use handler::{EventHandler, FnHandler};
pub use in_memory_bus::InMemoryEventBus;
