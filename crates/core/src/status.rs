//! Queue item lifecycle vocabulary.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Progress is tracked in base points: 0 = 0.00%, 10000 = 100.00%.
pub const MAX_BASE_POINTS: u32 = 10_000;

/// Status of a queue item.
///
/// Legal edges:
///
/// ```text
/// Created ──enqueue──▶ Queued ──start──▶ InProgress ──finish──▶ Completed
///                        ▲                  │  │
///                        └──requeue / fail──┘  └──fail (retries exhausted)──▶ Failed
/// Queued | InProgress ──abort──▶ Aborted
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Created,
    Queued,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl QueueItemStatus {
    pub const ALL: [QueueItemStatus; 6] = [
        QueueItemStatus::Created,
        QueueItemStatus::Queued,
        QueueItemStatus::InProgress,
        QueueItemStatus::Completed,
        QueueItemStatus::Failed,
        QueueItemStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Created => "created",
            QueueItemStatus::Queued => "queued",
            QueueItemStatus::InProgress => "in_progress",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Aborted => "aborted",
        }
    }

    /// Terminal items are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Failed | QueueItemStatus::Aborted
        )
    }

    /// Queued or in progress: the item still occupies its task type/context slot.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueItemStatus::Queued | QueueItemStatus::InProgress)
    }
}

impl core::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::deserialization(format!("unknown queue item status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_round_trips_for_every_status() {
        for status in QueueItemStatus::ALL {
            assert_eq!(status.as_str().parse::<QueueItemStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_completed_failed_aborted_are_terminal() {
        let terminal: Vec<_> = QueueItemStatus::ALL
            .into_iter()
            .filter(QueueItemStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                QueueItemStatus::Completed,
                QueueItemStatus::Failed,
                QueueItemStatus::Aborted
            ]
        );
    }
}
