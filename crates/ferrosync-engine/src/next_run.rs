//! Next-run calculation
//!
//! Trigger times are wall-clock times, so candidates are built on naive local date-times
//! and then resolved in the schedule's timezone. A candidate that falls into a DST gap does
//! not exist and is skipped; an ambiguous one resolves to its earlier instant.

use chrono::{
    DateTime, Datelike, Days, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta,
    TimeZone, Timelike, Utc,
};
use ferrosync_config::SchedulerSettings;
use ferrosync_types::{Frequency, Schedule, ScheduleTime};

/// How far in the future a `manual` schedule's sentinel lies
pub const MANUAL_HORIZON: Months = Months::new(1200);

/// Timezone trigger times are interpreted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBasis {
    /// The host's local timezone
    #[default]
    Local,
    /// UTC
    Utc,
}

/// Computes `nextRun` for schedules
#[derive(Debug, Clone, Copy, Default)]
pub struct NextRunCalculator {
    basis: TimeBasis,
}

impl NextRunCalculator {
    /// Create a calculator for the given timezone basis
    pub fn new(basis: TimeBasis) -> Self {
        Self { basis }
    }

    /// Calculator matching the scheduler settings
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self::new(if settings.use_local_time {
            TimeBasis::Local
        } else {
            TimeBasis::Utc
        })
    }

    /// Timezone basis
    pub fn basis(&self) -> TimeBasis {
        self.basis
    }

    /// Next trigger instant of a schedule after `now`
    pub fn next_run(&self, schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.basis {
            TimeBasis::Utc => next_run(
                &now,
                schedule.frequency,
                schedule.time,
                schedule.day_of_week,
                schedule.day_of_month,
            ),
            TimeBasis::Local => next_run(
                &now.with_timezone(&Local),
                schedule.frequency,
                schedule.time,
                schedule.day_of_week,
                schedule.day_of_month,
            )
            .with_timezone(&Utc),
        }
    }
}

/// Next trigger instant strictly after `now`, or the far-future sentinel for `manual`.
///
/// Missing fields default to `00:00`, Sunday and the 1st. Out-of-range weekdays and days
/// are clamped rather than rejected.
pub fn next_run<Tz: TimeZone>(
    now: &DateTime<Tz>,
    frequency: Frequency,
    time: Option<ScheduleTime>,
    day_of_week: Option<u8>,
    day_of_month: Option<u8>,
) -> DateTime<Tz> {
    let time = time.unwrap_or_default();
    let at = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(NaiveTime::MIN);
    let local = now.naive_local();
    let today = local.date();

    let (found, step) = match frequency {
        Frequency::Manual => return manual_sentinel(now),
        Frequency::Hourly => {
            let start = today.and_time(
                NaiveTime::from_hms_opt(local.hour(), time.minute(), 0).unwrap_or(NaiveTime::MIN),
            );
            let candidates = (0..=48).map(|hours| start + TimeDelta::hours(hours));
            (first_after(now, candidates), TimeDelta::hours(1))
        }
        Frequency::Daily => {
            let candidates = (0..=3).filter_map(|days| {
                today
                    .checked_add_days(Days::new(days))
                    .map(|date| date.and_time(at))
            });
            (first_after(now, candidates), TimeDelta::days(1))
        }
        Frequency::Weekly => {
            let target = u64::from(day_of_week.unwrap_or(0).min(6));
            let current = u64::from(today.weekday().num_days_from_sunday());
            let delta = (target + 7 - current) % 7;
            let candidates = (0..=3).filter_map(|weeks| {
                today
                    .checked_add_days(Days::new(delta + 7 * weeks))
                    .map(|date| date.and_time(at))
            });
            (first_after(now, candidates), TimeDelta::weeks(1))
        }
        Frequency::Monthly => {
            let day = u32::from(day_of_month.unwrap_or(1).clamp(1, 31));
            let first_of_month = today.with_day(1).unwrap_or(today);
            let candidates = (0..=24).filter_map(|months| {
                let month = first_of_month.checked_add_months(Months::new(months))?;
                month
                    .with_day(day.min(last_day_of_month(month)))
                    .map(|date| date.and_time(at))
            });
            (first_after(now, candidates), TimeDelta::days(31))
        }
    };

    found.unwrap_or_else(|| now.clone() + step)
}

fn manual_sentinel<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    now.clone()
        .checked_add_months(MANUAL_HORIZON)
        .unwrap_or_else(|| now.clone() + TimeDelta::days(36_525))
}

fn first_after<Tz: TimeZone>(
    now: &DateTime<Tz>,
    candidates: impl Iterator<Item = NaiveDateTime>,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    candidates
        .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
        .find(|candidate| candidate > now)
}

fn last_day_of_month(first: NaiveDate) -> u32 {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map_or(28, |last| last.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use proptest::prelude::*;
    use rstest::rstest;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn time(s: &str) -> Option<ScheduleTime> {
        Some(s.parse().unwrap())
    }

    #[rstest]
    // hourly uses only the minute
    #[case("2024-01-03T10:20:00Z", Frequency::Hourly, "23:15", None, None, "2024-01-03T11:15:00Z")]
    #[case("2024-01-03T10:10:00Z", Frequency::Hourly, "23:15", None, None, "2024-01-03T10:15:00Z")]
    #[case("2024-01-03T23:59:00Z", Frequency::Hourly, "00:30", None, None, "2024-01-04T00:30:00Z")]
    // daily rolls to tomorrow once today's time has passed, including the exact instant
    #[case("2024-01-03T08:00:00Z", Frequency::Daily, "09:00", None, None, "2024-01-03T09:00:00Z")]
    #[case("2024-01-03T09:00:00Z", Frequency::Daily, "09:00", None, None, "2024-01-04T09:00:00Z")]
    #[case("2024-12-31T23:30:00Z", Frequency::Daily, "02:30", None, None, "2025-01-01T02:30:00Z")]
    // 2024-01-03 is a Wednesday
    #[case("2024-01-03T10:00:00Z", Frequency::Weekly, "09:00", Some(3), None, "2024-01-10T09:00:00Z")]
    #[case("2024-01-03T08:00:00Z", Frequency::Weekly, "09:00", Some(3), None, "2024-01-03T09:00:00Z")]
    #[case("2024-01-03T10:00:00Z", Frequency::Weekly, "09:00", Some(1), None, "2024-01-08T09:00:00Z")]
    #[case("2024-01-03T10:00:00Z", Frequency::Weekly, "09:00", Some(0), None, "2024-01-07T09:00:00Z")]
    // monthly clamps to the last day of the targeted month
    #[case("2024-04-10T12:00:00Z", Frequency::Monthly, "09:00", None, Some(31), "2024-04-30T09:00:00Z")]
    #[case("2024-01-31T12:00:00Z", Frequency::Monthly, "09:00", None, Some(31), "2024-02-29T09:00:00Z")]
    #[case("2023-01-31T12:00:00Z", Frequency::Monthly, "09:00", None, Some(30), "2023-02-28T09:00:00Z")]
    #[case("2024-01-15T12:00:00Z", Frequency::Monthly, "09:00", None, Some(15), "2024-02-15T09:00:00Z")]
    #[case("2024-12-20T12:00:00Z", Frequency::Monthly, "00:00", None, Some(5), "2025-01-05T00:00:00Z")]
    fn test_scenarios(
        #[case] now: &str,
        #[case] frequency: Frequency,
        #[case] trigger: &str,
        #[case] day_of_week: Option<u8>,
        #[case] day_of_month: Option<u8>,
        #[case] expected: &str,
    ) {
        let next = next_run(&at(now), frequency, time(trigger), day_of_week, day_of_month);
        assert_eq!(next, at(expected));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let now = at("2024-01-03T10:00:00Z");
        assert_eq!(
            next_run(&now, Frequency::Daily, None, None, None),
            at("2024-01-04T00:00:00Z")
        );
        assert_eq!(
            next_run(&now, Frequency::Weekly, None, None, None),
            at("2024-01-07T00:00:00Z")
        );
        assert_eq!(
            next_run(&now, Frequency::Monthly, None, None, None),
            at("2024-02-01T00:00:00Z")
        );
    }

    #[test]
    fn test_manual_sentinel_is_a_century_away() {
        let now = at("2024-01-03T10:00:00Z");
        let next = next_run(&now, Frequency::Manual, None, None, None);
        assert_eq!(next, at("2124-01-03T10:00:00Z"));
    }

    #[test]
    fn test_wall_clock_in_fixed_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        let next = next_run(&now, Frequency::Daily, time("09:00"), None, None);
        assert_eq!(next, tz.with_ymd_and_hms(2024, 1, 4, 9, 0, 0).unwrap());
        assert_eq!(next.with_timezone(&Utc), at("2024-01-04T07:00:00Z"));
    }

    #[test]
    fn test_calculator_uses_schedule_fields() {
        let schedule = Schedule::new(
            "c1",
            "weekly",
            ferrosync_types::Endpoint::ftp("/out"),
            ferrosync_types::Endpoint::local("/in"),
            Frequency::Weekly,
        )
        .with_time("09:00".parse().unwrap())
        .with_day_of_week(3);

        let calculator = NextRunCalculator::new(TimeBasis::Utc);
        assert_eq!(
            calculator.next_run(&schedule, at("2024-01-03T10:00:00Z")),
            at("2024-01-10T09:00:00Z")
        );
    }

    fn frequency_strategy() -> impl Strategy<Value = Frequency> {
        prop_oneof![
            Just(Frequency::Hourly),
            Just(Frequency::Daily),
            Just(Frequency::Weekly),
            Just(Frequency::Monthly),
        ]
    }

    proptest! {
        #[test]
        fn test_next_run_is_strictly_later(
            seconds in 0i64..4_102_444_800,
            frequency in frequency_strategy(),
            hour in 0u32..24,
            minute in 0u32..60,
            dow in 0u8..7,
            dom in 1u8..=31,
        ) {
            let now = Utc.timestamp_opt(seconds, 0).unwrap();
            let trigger = ScheduleTime::new(hour, minute).unwrap();
            let next = next_run(&now, frequency, Some(trigger), Some(dow), Some(dom));
            prop_assert!(next > now);
            prop_assert!(next - now <= TimeDelta::days(62));
        }

        #[test]
        fn test_manual_is_beyond_every_other_frequency(
            seconds in 0i64..4_102_444_800,
            frequency in frequency_strategy(),
            dom in 1u8..=31,
        ) {
            let now = Utc.timestamp_opt(seconds, 0).unwrap();
            let manual = next_run(&now, Frequency::Manual, None, None, None);
            let other = next_run(&now, frequency, None, Some(3), Some(dom));
            prop_assert!(manual > other);
        }

        #[test]
        fn test_day_31_never_spills_into_next_month(seconds in 0i64..4_102_444_800) {
            let now = Utc.timestamp_opt(seconds, 0).unwrap();
            let next = next_run(&now, Frequency::Monthly, None, None, Some(31));
            let following = next + TimeDelta::days(1);
            prop_assert_ne!(next.month(), following.month());
        }
    }
}
