//! Calendar arithmetic for recurring alarms.
//!
//! Dates are plain calendar dates; day arithmetic never consults a timezone.

use std::collections::HashSet;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use wakeup_common::{AppError, AppResult};

/// Days scanned when looking for the next matching weekday.
const SCAN_WINDOW: u64 = 7;

/// Find the first date in `[from, from + 6]` whose weekday is in `repeat_days`.
///
/// # Errors
/// Returns [`AppError::RepeatDaysNotConfigured`] when `repeat_days` is empty.
pub fn next_occurrence_date(repeat_days: &HashSet<Weekday>, from: NaiveDate) -> AppResult<NaiveDate> {
    (0..SCAN_WINDOW)
        .filter_map(|offset| from.checked_add_days(Days::new(offset)))
        .find(|date| repeat_days.contains(&date.weekday()))
        .ok_or(AppError::RepeatDaysNotConfigured)
}

/// Whether two dates fall into the same ISO week.
#[must_use]
pub fn is_same_iso_week(a: NaiveDate, b: NaiveDate) -> bool {
    a.iso_week() == b.iso_week()
}

/// Monday of the ISO week containing `date`.
#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

/// Sunday of the ISO week containing `date`.
#[must_use]
pub fn week_end(date: NaiveDate) -> NaiveDate {
    week_start(date) + Days::new(6)
}

/// Half-open timestamp bounds `[Monday 00:00, next Monday 00:00)` of the
/// ISO week containing `date`.
#[must_use]
pub fn week_bounds(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = week_start(date);
    let end = week_end(date) + Days::new(1);
    (start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
}

/// Korean display name of a weekday.
#[must_use]
pub const fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "월요일",
        Weekday::Tue => "화요일",
        Weekday::Wed => "수요일",
        Weekday::Thu => "목요일",
        Weekday::Fri => "금요일",
        Weekday::Sat => "토요일",
        Weekday::Sun => "일요일",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wakeup_db::entities::alarm::WEEK;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_next_occurrence_is_earliest_match_in_window() {
        // Every non-empty weekday subset against two weeks of start dates.
        let first = date(2025, 3, 3);
        for mask in 1u8..128 {
            let days: HashSet<Weekday> = WEEK
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, d)| *d)
                .collect();

            for offset in 0..14 {
                let from = first + Days::new(offset);
                let next = next_occurrence_date(&days, from).unwrap();

                assert!(next >= from && next <= from + Days::new(6));
                assert!(days.contains(&next.weekday()));
                let mut skipped = from;
                while skipped < next {
                    assert!(!days.contains(&skipped.weekday()));
                    skipped = skipped + Days::new(1);
                }
            }
        }
    }

    #[test]
    fn test_next_occurrence_empty_set() {
        let result = next_occurrence_date(&HashSet::new(), date(2025, 3, 5));
        assert!(matches!(result, Err(AppError::RepeatDaysNotConfigured)));
    }

    #[test]
    fn test_next_occurrence_same_day() {
        let days = HashSet::from([Weekday::Mon, Weekday::Wed, Weekday::Fri]);
        // 2025-03-05 is a Wednesday.
        assert_eq!(next_occurrence_date(&days, date(2025, 3, 5)).unwrap(), date(2025, 3, 5));
        assert_eq!(next_occurrence_date(&days, date(2025, 3, 6)).unwrap(), date(2025, 3, 7));
        assert_eq!(next_occurrence_date(&days, date(2025, 3, 8)).unwrap(), date(2025, 3, 10));
    }

    #[test]
    fn test_week_boundaries() {
        let wednesday = date(2025, 3, 5);
        assert_eq!(week_start(wednesday), date(2025, 3, 3));
        assert_eq!(week_end(wednesday), date(2025, 3, 9));
        assert_eq!(week_start(date(2025, 3, 3)), date(2025, 3, 3));
        assert_eq!(week_end(date(2025, 3, 9)), date(2025, 3, 9));

        let (from, to) = week_bounds(wednesday);
        assert_eq!(from, date(2025, 3, 3).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(to, date(2025, 3, 10).and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn test_iso_week_across_year_boundary() {
        // 2024-12-30 (Mon) and 2025-01-05 (Sun) share ISO week 2025-W01.
        assert!(is_same_iso_week(date(2024, 12, 30), date(2025, 1, 5)));
        assert!(!is_same_iso_week(date(2024, 12, 29), date(2024, 12, 30)));
        assert_eq!(week_start(date(2025, 1, 1)), date(2024, 12, 30));
    }

    #[test]
    fn test_weekday_name() {
        assert_eq!(weekday_name(Weekday::Wed), "수요일");
        assert_eq!(weekday_name(Weekday::Sun), "일요일");
    }
}
