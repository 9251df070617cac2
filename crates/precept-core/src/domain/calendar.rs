//! Working-day arithmetic shared by the strategies and the ledger.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Calendar-year key used for yearly capacity counting.
pub fn year_of(date: NaiveDate) -> i32 {
    date.year()
}

/// True if assignments may occur on `date`: a weekday outside the blackout
/// set.
pub fn is_working_day(date: NaiveDate, blackouts: &BTreeSet<NaiveDate>) -> bool {
    !is_weekend(date) && !blackouts.contains(&date)
}

/// All working days in `[start, end]`, in order.
pub fn working_days(
    start: NaiveDate,
    end: NaiveDate,
    blackouts: &BTreeSet<NaiveDate>,
) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        if is_working_day(current, blackouts) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[rstest]
    #[case("2026-01-03", true)] // Saturday
    #[case("2026-01-04", true)] // Sunday
    #[case("2026-01-05", false)] // Monday
    #[case("2026-01-09", false)] // Friday
    fn test_weekend_detection(#[case] date: &str, #[case] weekend: bool) {
        assert_eq!(is_weekend(d(date)), weekend);
    }

    #[test]
    fn test_working_days_skip_weekends_and_blackouts() {
        let blackouts: BTreeSet<NaiveDate> = [d("2026-01-07")].into_iter().collect();
        let days = working_days(d("2026-01-05"), d("2026-01-11"), &blackouts);
        // Mon 5, Tue 6, (Wed 7 blacked out), Thu 8, Fri 9
        assert_eq!(
            days,
            vec![d("2026-01-05"), d("2026-01-06"), d("2026-01-08"), d("2026-01-09")]
        );
    }

    #[test]
    fn test_working_days_empty_range() {
        let blackouts = BTreeSet::new();
        assert!(working_days(d("2026-01-10"), d("2026-01-09"), &blackouts).is_empty());
    }

    #[test]
    fn test_year_key() {
        assert_eq!(year_of(d("2025-12-31")), 2025);
        assert_eq!(year_of(d("2026-01-01")), 2026);
    }
}
