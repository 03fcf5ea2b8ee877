//! Optimistic concurrency preconditions for conditional queue item writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::status::QueueItemStatus;

/// What the writer last observed about a stored queue item.
///
/// `None` fields are not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WritePrecondition {
    pub status: Option<QueueItemStatus>,
    pub last_update: Option<DateTime<Utc>>,
}

impl WritePrecondition {
    /// Unconditional write.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn status(status: QueueItemStatus) -> Self {
        Self {
            status: Some(status),
            last_update: None,
        }
    }

    /// Guard on both status and last update timestamp.
    pub fn observed(status: QueueItemStatus, last_update: Option<DateTime<Utc>>) -> Self {
        Self {
            status: Some(status),
            last_update,
        }
    }

    pub fn matches(&self, status: QueueItemStatus, last_update: Option<DateTime<Utc>>) -> bool {
        let status_ok = self.status.is_none_or(|expected| expected == status);
        let update_ok = self.last_update.is_none() || self.last_update == last_update;
        status_ok && update_ok
    }

    pub fn check(&self, status: QueueItemStatus, last_update: Option<DateTime<Utc>>) -> QueueResult<()> {
        if self.matches(status, last_update) {
            Ok(())
        } else {
            Err(QueueError::save_conflict(format!(
                "precondition failed (expected: {self:?}, actual: status={status}, last_update={last_update:?})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn any_always_matches() {
        assert!(WritePrecondition::any().matches(QueueItemStatus::Failed, None));
    }

    #[test]
    fn stale_timestamp_is_a_conflict() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let pre = WritePrecondition::observed(QueueItemStatus::InProgress, Some(t0));

        assert!(pre.check(QueueItemStatus::InProgress, Some(t0)).is_ok());
        let err = pre.check(QueueItemStatus::InProgress, Some(t1)).unwrap_err();
        assert!(matches!(err, QueueError::SaveConflict(_)));
        assert!(pre.check(QueueItemStatus::Queued, Some(t0)).is_err());
    }
}
