//! Queue items and the only component allowed to write them.

pub mod context;
pub mod item;
pub mod service;

pub use context::TaskAdapter;
pub use item::QueueItem;
pub use service::QueueService;
