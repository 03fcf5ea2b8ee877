use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipq_core::RunnerGuid;

/// The runner lease: which generation is active and since when.
///
/// This is a lease, not a lock. An expiring runner and its successor may
/// briefly overlap; conditional item writes keep that harmless.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub guid: Option<RunnerGuid>,
    pub alive_since: Option<DateTime<Utc>>,
}

impl RunnerStatus {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn alive(guid: RunnerGuid, now: DateTime<Utc>) -> Self {
        Self {
            guid: Some(guid),
            alive_since: Some(now),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.guid.is_none()
    }

    /// `alive_since + max_alive < now`. An empty lease never expires.
    pub fn is_expired(&self, now: DateTime<Utc>, max_alive: Duration) -> bool {
        if self.guid.is_none() {
            return false;
        }
        let Some(since) = self.alive_since else {
            return true;
        };
        let max_alive = chrono::Duration::from_std(max_alive).unwrap_or(chrono::Duration::MAX);
        since
            .checked_add_signed(max_alive)
            .is_some_and(|deadline| deadline < now)
    }

    /// Held by `guid` and not expired.
    pub fn is_held_by(&self, guid: RunnerGuid, now: DateTime<Utc>, max_alive: Duration) -> bool {
        self.guid == Some(guid) && !self.is_expired(now, max_alive)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn expires_strictly_after_max_alive() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let guid = RunnerGuid::new();
        let lease = RunnerStatus::alive(guid, t0);
        let max = Duration::from_secs(60);

        assert!(!lease.is_expired(t0 + chrono::Duration::seconds(60), max));
        assert!(lease.is_expired(t0 + chrono::Duration::seconds(61), max));
        assert!(lease.is_held_by(guid, t0, max));
        assert!(!lease.is_held_by(RunnerGuid::new(), t0, max));
        assert!(!RunnerStatus::empty().is_expired(t0, Duration::ZERO));
    }
}
