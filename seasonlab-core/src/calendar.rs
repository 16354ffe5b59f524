//! Day-of-year calendar shared by every year.
//!
//! All cross-year comparison happens on a non-leap reference calendar: Jan 1 is
//! day 1 and Dec 31 is day 365 in every year. Feb 29 folds onto Feb 28 so that
//! March onwards keeps the same day number in leap and non-leap years.

use chrono::{Datelike, NaiveDate};

/// Days in the reference (non-leap) year.
pub const REFERENCE_DAYS: u32 = 365;

const MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const MONTH_ABBR: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Reference day-of-year for a (month, day) pair. Day 29 of February clamps to 28.
pub fn day_of_year(month: u32, day: u32) -> u32 {
    let month = month.clamp(1, 12);
    let before: u32 = MONTH_DAYS[..(month - 1) as usize].iter().sum();
    before + day.clamp(1, MONTH_DAYS[(month - 1) as usize])
}

/// Inverse of [`day_of_year`]. Values outside 1..=365 are clamped.
pub fn date_from_day_of_year(doy: u32) -> (u32, u32) {
    let mut remaining = doy.clamp(1, REFERENCE_DAYS);
    for (i, &len) in MONTH_DAYS.iter().enumerate() {
        if remaining <= len {
            return (i as u32 + 1, remaining);
        }
        remaining -= len;
    }
    (12, 31)
}

/// Reference day-of-year of a real calendar date.
pub fn calendar_doy(date: NaiveDate) -> u32 {
    day_of_year(date.month(), date.day())
}

/// "Mar-05" style label for a reference day.
pub fn doy_label(doy: u32) -> String {
    let (month, day) = date_from_day_of_year(doy);
    format!("{}-{:02}", MONTH_ABBR[(month - 1) as usize], day)
}

/// "Mar-05" style label for a real date.
pub fn date_label(date: NaiveDate) -> String {
    format!("{}-{:02}", MONTH_ABBR[date.month0() as usize], date.day())
}

/// Real date in `year` for a reference day. Feb 28 stays Feb 28 in leap years.
pub fn date_in_year(year: i32, doy: u32) -> Option<NaiveDate> {
    let (month, day) = date_from_day_of_year(doy);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Every real date of `year`, in order (365 or 366 entries).
pub fn dates_of_year(year: i32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.year() == year)
        .collect()
}

/// The `lookback` calendar years ending at `last_year`, minus `last_year` itself.
///
/// The final year of a price history is normally incomplete, so it never takes
/// part in seasonal statistics.
pub fn analysis_years(last_year: i32, lookback: u32) -> Vec<i32> {
    if lookback == 0 {
        return Vec::new();
    }
    let first = last_year - lookback as i32 + 1;
    (first..last_year).collect()
}
