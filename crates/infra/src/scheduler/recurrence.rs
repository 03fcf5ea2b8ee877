//! Recurrence descriptors and next-trigger computation (UTC).

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use shipq_core::{QueueError, QueueResult};

/// How far ahead the next trigger is searched.
const SEARCH_DAYS: u64 = 8 * 366;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "every", rename_all = "snake_case")]
pub enum Recurrence {
    /// At `minute` past every `interval_hours`-th hour of the window,
    /// counted from the window start.
    Hourly {
        minute: u32,
        interval_hours: u32,
        #[serde(default)]
        day: Option<u32>,
        #[serde(default)]
        window: Option<(NaiveTime, NaiveTime)>,
    },
    /// Empty `days_of_week` means every day.
    Daily {
        hour: u32,
        minute: u32,
        #[serde(default)]
        days_of_week: Vec<Weekday>,
    },
    Weekly {
        day: Weekday,
        hour: u32,
        minute: u32,
        /// ISO weeks of the year; empty means every week.
        #[serde(default)]
        weeks: Vec<u32>,
        #[serde(default)]
        last_week_of_month: bool,
    },
    /// `day` past the end of a month triggers on its last day.
    Monthly { day: u32, hour: u32, minute: u32 },
}

impl Recurrence {
    pub fn hourly(minute: u32, interval_hours: u32) -> Self {
        Self::Hourly {
            minute,
            interval_hours,
            day: None,
            window: None,
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self::Daily {
            hour,
            minute,
            days_of_week: Vec::new(),
        }
    }

    pub fn weekly(day: Weekday, hour: u32, minute: u32) -> Self {
        Self::Weekly {
            day,
            hour,
            minute,
            weeks: Vec::new(),
            last_week_of_month: false,
        }
    }

    pub fn monthly(day: u32, hour: u32, minute: u32) -> Self {
        Self::Monthly { day, hour, minute }
    }

    pub fn validate(&self) -> QueueResult<()> {
        match self {
            Self::Hourly {
                minute,
                interval_hours,
                day,
                window,
            } => {
                check_minute(*minute)?;
                if *interval_hours == 0 || *interval_hours > 24 {
                    return Err(QueueError::validation("interval_hours must be within 1..=24"));
                }
                if let Some(day) = day {
                    check_day_of_month(*day)?;
                }
                if let Some((start, end)) = window {
                    if start > end {
                        return Err(QueueError::validation("window start must not be after its end"));
                    }
                }
                Ok(())
            }
            Self::Daily { hour, minute, .. } => check_time(*hour, *minute),
            Self::Weekly {
                hour, minute, weeks, ..
            } => {
                check_time(*hour, *minute)?;
                if weeks.iter().any(|w| !(1..=53).contains(w)) {
                    return Err(QueueError::validation("weeks must be within 1..=53"));
                }
                Ok(())
            }
            Self::Monthly { day, hour, minute } => {
                check_day_of_month(*day)?;
                check_time(*hour, *minute)
            }
        }
    }

    /// First matching instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> QueueResult<DateTime<Utc>> {
        self.validate()?;

        let mut date = now.date_naive();
        for _ in 0..SEARCH_DAYS {
            let next = self
                .times_on(date)
                .into_iter()
                .map(|time| date.and_time(time).and_utc())
                .find(|at| *at > now);
            if let Some(at) = next {
                return Ok(at);
            }
            date = match date.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        Err(QueueError::validation(format!("recurrence {self:?} never triggers")))
    }

    /// Whether `at` is one of the trigger instants.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        at.nanosecond() == 0 && self.times_on(at.date_naive()).contains(&at.time())
    }

    /// Trigger times on `date`, ascending.
    fn times_on(&self, date: NaiveDate) -> Vec<NaiveTime> {
        match self {
            Self::Hourly {
                minute,
                interval_hours,
                day,
                window,
            } => {
                if day.is_some_and(|d| d != date.day()) {
                    return Vec::new();
                }
                let (start, end) = window.unwrap_or((NaiveTime::MIN, hm(23, 59).unwrap_or(NaiveTime::MIN)));
                let step = usize::try_from((*interval_hours).max(1)).unwrap_or(1);
                (start.hour()..=end.hour())
                    .step_by(step)
                    .filter_map(|h| hm(h, *minute))
                    .filter(|t| *t >= start && *t <= end)
                    .collect()
            }
            Self::Daily {
                hour,
                minute,
                days_of_week,
            } => {
                if !days_of_week.is_empty() && !days_of_week.contains(&date.weekday()) {
                    return Vec::new();
                }
                hm(*hour, *minute).into_iter().collect()
            }
            Self::Weekly {
                day,
                hour,
                minute,
                weeks,
                last_week_of_month,
            } => {
                if date.weekday() != *day
                    || (!weeks.is_empty() && !weeks.contains(&date.iso_week().week()))
                    || (*last_week_of_month && date.day() + 7 <= days_in_month(date))
                {
                    return Vec::new();
                }
                hm(*hour, *minute).into_iter().collect()
            }
            Self::Monthly { day, hour, minute } => {
                if date.day() != (*day).min(days_in_month(date)) {
                    return Vec::new();
                }
                hm(*hour, *minute).into_iter().collect()
            }
        }
    }
}

pub(crate) fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn hm(hour: u32, minute: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn check_minute(minute: u32) -> QueueResult<()> {
    if minute > 59 {
        return Err(QueueError::validation(format!("minute out of range: {minute}")));
    }
    Ok(())
}

fn check_time(hour: u32, minute: u32) -> QueueResult<()> {
    if hour > 23 {
        return Err(QueueError::validation(format!("hour out of range: {hour}")));
    }
    check_minute(minute)
}

fn check_day_of_month(day: u32) -> QueueResult<()> {
    if !(1..=31).contains(&day) {
        return Err(QueueError::validation(format!("day of month out of range: {day}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_passed() {
        let rule = Recurrence::daily(9, 30);
        assert_eq!(rule.next_after(at(2024, 3, 4, 8, 0)).unwrap(), at(2024, 3, 4, 9, 30));
        assert_eq!(rule.next_after(at(2024, 3, 4, 9, 30)).unwrap(), at(2024, 3, 5, 9, 30));
    }

    #[test]
    fn daily_respects_weekdays() {
        let rule = Recurrence::Daily {
            hour: 6,
            minute: 0,
            days_of_week: vec![Weekday::Mon, Weekday::Thu],
        };
        // 2024-03-05 is a Tuesday.
        assert_eq!(rule.next_after(at(2024, 3, 5, 12, 0)).unwrap(), at(2024, 3, 7, 6, 0));
    }

    #[test]
    fn hourly_counts_intervals_from_window_start() {
        let rule = Recurrence::Hourly {
            minute: 15,
            interval_hours: 3,
            day: None,
            window: Some((hm(8, 0).unwrap(), hm(18, 0).unwrap())),
        };
        assert_eq!(rule.next_after(at(2024, 3, 4, 7, 0)).unwrap(), at(2024, 3, 4, 8, 15));
        assert_eq!(rule.next_after(at(2024, 3, 4, 8, 15)).unwrap(), at(2024, 3, 4, 11, 15));
        assert_eq!(rule.next_after(at(2024, 3, 4, 17, 15)).unwrap(), at(2024, 3, 5, 8, 15));
    }

    #[test]
    fn weekly_last_week_of_month() {
        let rule = Recurrence::Weekly {
            day: Weekday::Fri,
            hour: 22,
            minute: 0,
            weeks: Vec::new(),
            last_week_of_month: true,
        };
        assert_eq!(rule.next_after(at(2024, 2, 1, 0, 0)).unwrap(), at(2024, 2, 23, 22, 0));
    }

    #[test]
    fn weekly_restricted_to_iso_weeks() {
        let rule = Recurrence::Weekly {
            day: Weekday::Mon,
            hour: 0,
            minute: 0,
            weeks: vec![10],
            last_week_of_month: false,
        };
        assert_eq!(rule.next_after(at(2024, 1, 1, 12, 0)).unwrap(), at(2024, 3, 4, 0, 0));
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        let rule = Recurrence::monthly(31, 1, 0);
        assert_eq!(rule.next_after(at(2023, 2, 1, 0, 0)).unwrap(), at(2023, 2, 28, 1, 0));
        assert_eq!(rule.next_after(at(2024, 2, 1, 0, 0)).unwrap(), at(2024, 2, 29, 1, 0));
        assert_eq!(rule.next_after(at(2024, 4, 30, 2, 0)).unwrap(), at(2024, 5, 31, 1, 0));
    }

    #[test]
    fn impossible_or_invalid_rules_are_rejected() {
        let never = Recurrence::Hourly {
            minute: 0,
            interval_hours: 1,
            day: None,
            window: Some((hm(10, 30).unwrap(), hm(10, 45).unwrap())),
        };
        assert!(matches!(never.next_after(at(2024, 1, 1, 0, 0)), Err(QueueError::Validation(_))));

        let invalid = Recurrence::daily(24, 0);
        assert!(matches!(invalid.next_after(at(2024, 1, 1, 0, 0)), Err(QueueError::Validation(_))));
    }

    fn recurrence() -> impl Strategy<Value = Recurrence> {
        let weekday = proptest::sample::select(vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]);
        prop_oneof![
            (0u32..60, 1u32..=24, proptest::option::of(1u32..=31)).prop_map(|(minute, interval_hours, day)| {
                Recurrence::Hourly {
                    minute,
                    interval_hours,
                    day,
                    window: None,
                }
            }),
            (0u32..24, 0u32..60, proptest::collection::vec(weekday.clone(), 0..3)).prop_map(
                |(hour, minute, days_of_week)| Recurrence::Daily {
                    hour,
                    minute,
                    days_of_week,
                }
            ),
            (weekday, 0u32..24, 0u32..60, any::<bool>()).prop_map(|(day, hour, minute, last)| {
                Recurrence::Weekly {
                    day,
                    hour,
                    minute,
                    weeks: Vec::new(),
                    last_week_of_month: last,
                }
            }),
            (1u32..=31, 0u32..24, 0u32..60).prop_map(|(day, hour, minute)| Recurrence::monthly(day, hour, minute)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn next_trigger_is_after_now_and_matches(rule in recurrence(), offset in 0i64..400 * 24 * 3600) {
            let now = at(2024, 1, 1, 0, 0) + chrono::Duration::seconds(offset);
            let next = rule.next_after(now).unwrap();

            prop_assert!(next > now);
            prop_assert!(rule.matches(next));
        }
    }
}
