//! Pre-built test data for common entities

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use core_kernel::{Currency, DateRange, Money};

/// Money in BRL from minor units (centavos)
pub fn brl(minor: i64) -> Money {
    Money::from_minor(minor, Currency::Brl)
}

/// A day in March 2024, the month the fixture scenarios live in
pub fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

/// Noon UTC on a day in March 2024
pub fn march_at_noon(day: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&march(day).and_hms_opt(12, 0, 0).unwrap())
}

/// The whole of March 2024
pub fn march_range() -> DateRange {
    DateRange::new(march(1), march(31)).unwrap()
}
