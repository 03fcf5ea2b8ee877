//! Engine error model.

use thiserror::Error;

use crate::status::QueueItemStatus;

/// Result type used by every queue, runner and storage operation.
pub type QueueResult<T> = Result<T, QueueError>;

/// Engine-level error.
///
/// `QueueService` mutations raise these to their caller, which decides
/// whether to retry, fail the item or abandon the pass. The runner sweep
/// never lets them escape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A conditional write found a different state than the caller last read.
    /// Transient: re-read or abandon.
    #[error("save conflict: {0}")]
    SaveConflict(String),

    /// The persistence backend failed on a mutating or reading call.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The requested edge does not exist in the queue item state machine.
    #[error("illegal transition: cannot {operation} a queue item in status {from}")]
    IllegalTransition {
        from: QueueItemStatus,
        operation: &'static str,
    },

    /// A stored payload (task, runnable, status) could not be reconstituted.
    #[error("deserialization failure: {0}")]
    Deserialization(String),

    /// The caller no longer owns the active runner lease.
    #[error("lease conflict: {0}")]
    LeaseConflict(String),

    /// Input failed validation (configuration, progress, recurrence, filters).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A task body returned an error.
    #[error("{0}")]
    Execution(String),
}

impl QueueError {
    pub fn save_conflict(msg: impl Into<String>) -> Self {
        Self::SaveConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn illegal_transition(from: QueueItemStatus, operation: &'static str) -> Self {
        Self::IllegalTransition { from, operation }
    }

    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    pub fn lease_conflict(msg: impl Into<String>) -> Self {
        Self::LeaseConflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Conflicts are expected under concurrent runners and are not failures
    /// of the item itself.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SaveConflict(_) | Self::LeaseConflict(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        Self::Deserialization(value.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::StorageUnavailable("lock poisoned".to_string())
    }
}
