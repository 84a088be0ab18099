use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

/// Which rate tier a calendar night is billed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayClass {
    Standard,
    Friday,
    Saturday,
}

/// Drop the time of day. Dates are wall-clock calendar days, no timezone shift.
pub fn normalize(at: NaiveDateTime) -> NaiveDate {
    at.date()
}

/// Signed calendar-day difference `to - from`.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    to.signed_duration_since(from).num_days()
}

/// Nights billed for a stay. Never less than one.
pub fn nights_between(check_in: NaiveDate, check_out: NaiveDate) -> u32 {
    days_between(check_in, check_out).clamp(1, u32::MAX as i64) as u32
}

pub fn day_class(date: NaiveDate) -> DayClass {
    match date.weekday() {
        Weekday::Fri => DayClass::Friday,
        Weekday::Sat => DayClass::Saturday,
        _ => DayClass::Standard,
    }
}

pub fn add_nights(date: NaiveDate, nights: u32) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(u64::from(nights)))
}

/// Every lodging night in `[check_in, check_out)`.
pub fn each_night(check_in: NaiveDate, check_out: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    check_in.iter_days().take_while(move |d| *d < check_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn nights_is_calendar_difference() {
        assert_eq!(nights_between(date(2024, 3, 1), date(2024, 3, 4)), 3);
        // Across the DST switch (wall-clock days, not 24h blocks)
        assert_eq!(nights_between(date(2024, 3, 30), date(2024, 4, 2)), 3);
        // Across a leap day
        assert_eq!(nights_between(date(2024, 2, 28), date(2024, 3, 1)), 2);
    }

    #[test]
    fn nights_floor_is_one() {
        assert_eq!(nights_between(date(2024, 3, 1), date(2024, 3, 1)), 1);
        assert_eq!(nights_between(date(2024, 3, 5), date(2024, 3, 1)), 1);
    }

    #[test]
    fn normalize_drops_time() {
        let at = date(2024, 6, 7).and_hms_opt(23, 59, 59).unwrap();
        assert_eq!(normalize(at), date(2024, 6, 7));
    }

    #[test]
    fn day_classes() {
        // 2024-06-06 is a Thursday
        assert_eq!(day_class(date(2024, 6, 6)), DayClass::Standard);
        assert_eq!(day_class(date(2024, 6, 7)), DayClass::Friday);
        assert_eq!(day_class(date(2024, 6, 8)), DayClass::Saturday);
        assert_eq!(day_class(date(2024, 6, 9)), DayClass::Standard);
    }

    #[test]
    fn each_night_excludes_checkout() {
        let nights: Vec<_> = each_night(date(2024, 6, 6), date(2024, 6, 9)).collect();
        assert_eq!(nights, vec![date(2024, 6, 6), date(2024, 6, 7), date(2024, 6, 8)]);
        assert_eq!(each_night(date(2024, 6, 6), date(2024, 6, 6)).count(), 0);
    }

    #[test]
    fn add_nights_moves_forward() {
        assert_eq!(add_nights(date(2024, 12, 30), 3), Some(date(2025, 1, 2)));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn nights_matches_day_difference(start in 0i64..20_000, len in -40i64..400) {
                let base = date(2000, 1, 1);
                let check_in = base + chrono::Duration::days(start);
                let check_out = check_in + chrono::Duration::days(len);
                prop_assert_eq!(nights_between(check_in, check_out) as i64, len.max(1));
            }
        }
    }
}
