//! Occurrence-index date arithmetic for schedule deduplication.
//!
//! Occurrence indices are computed from the site-local wall clock so that
//! daylight-saving transitions neither skip nor duplicate occurrences: a
//! record generated at 02:00 site time keys to the same index regardless of
//! the UTC offset in force that day.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Index epoch. Legacy data counted days from 1900-01-01.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).expect("valid epoch date")
}

/// Days since 1900-01-01 for the given local date.
pub fn daydex(dt: NaiveDateTime) -> i64 {
    (dt.date() - epoch()).num_days()
}

/// Hours since 1900-01-01T00:00 for the given local time.
pub fn hour_index(dt: NaiveDateTime) -> i64 {
    daydex(dt) * 24 + i64::from(dt.hour())
}

/// Whole weeks since the epoch.
pub fn week_index(dt: NaiveDateTime) -> i64 {
    daydex(dt) / 7
}

/// Months since 1900-01.
pub fn month_index(dt: NaiveDateTime) -> i64 {
    i64::from(dt.year() - 1900) * 12 + i64::from(dt.month0())
}

/// Years since 1900.
pub fn year_index(dt: NaiveDateTime) -> i64 {
    i64::from(dt.year() - 1900)
}

/// 1-based occurrence of the weekday within its month: the 1st..7th of a
/// month are occurrence 1, the 8th..14th occurrence 2, and so on.
pub fn day_of_week_occurrence(dt: NaiveDateTime) -> u32 {
    (dt.day() - 1) / 7 + 1
}

/// Legacy site rows carry Windows timezone ids; map the ones that appear in
/// production data onto IANA zones. Anything else is parsed as IANA.
fn windows_zone_alias(name: &str) -> Option<&'static str> {
    Some(match name {
        "Pacific Standard Time" => "America/Los_Angeles",
        "Mountain Standard Time" => "America/Denver",
        "Central Standard Time" => "America/Chicago",
        "Eastern Standard Time" => "America/New_York",
        "GMT Standard Time" => "Europe/London",
        "W. Europe Standard Time" => "Europe/Berlin",
        "AUS Eastern Standard Time" => "Australia/Sydney",
        "AUS Central Standard Time" => "Australia/Darwin",
        "New Zealand Standard Time" => "Pacific/Auckland",
        "Singapore Standard Time" => "Asia/Singapore",
        "China Standard Time" => "Asia/Shanghai",
        "UTC" => "UTC",
        _ => return None,
    })
}

/// Resolve a site's timezone id to a concrete zone.
pub fn resolve_timezone(timezone_id: &str) -> Result<Tz> {
    let name = windows_zone_alias(timezone_id).unwrap_or(timezone_id);
    Tz::from_str(name).map_err(|_| Error::UnknownTimezone(timezone_id.to_string()))
}

/// Convert a UTC instant to the site's local wall-clock time.
pub fn in_timezone(utc: DateTime<Utc>, timezone_id: &str) -> Result<NaiveDateTime> {
    let tz = resolve_timezone(timezone_id)?;
    Ok(tz.from_utc_datetime(&utc.naive_utc()).naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn daydex_epoch_and_offsets() {
        assert_eq!(daydex(at(1900, 1, 1, 0)), 0);
        assert_eq!(daydex(at(1900, 1, 2, 23)), 1);
        assert_eq!(daydex(at(1900, 2, 1, 0)), 31);
        // 2021-03-03 is 44,256 days after 1900-01-01.
        assert_eq!(daydex(at(2021, 3, 3, 2)), 44_256);
    }

    #[test]
    fn hour_index_tracks_local_hour() {
        assert_eq!(hour_index(at(1900, 1, 1, 0)), 0);
        assert_eq!(hour_index(at(1900, 1, 1, 5)), 5);
        assert_eq!(hour_index(at(1900, 1, 2, 1)), 25);
        assert_eq!(hour_index(at(2021, 3, 3, 2)), 44_256 * 24 + 2);
    }

    #[test]
    fn month_and_year_indices() {
        assert_eq!(month_index(at(1900, 1, 15, 0)), 0);
        assert_eq!(month_index(at(1900, 12, 1, 0)), 11);
        assert_eq!(month_index(at(2021, 3, 3, 0)), 121 * 12 + 2);
        assert_eq!(year_index(at(2021, 6, 1, 0)), 121);
    }

    #[test]
    fn weekday_occurrence_within_month() {
        // Every day in the first week of March 2021 is occurrence 1.
        for day in 1..=7 {
            assert_eq!(day_of_week_occurrence(at(2021, 3, day, 0)), 1);
        }
        for day in 8..=14 {
            assert_eq!(day_of_week_occurrence(at(2021, 3, day, 0)), 2);
        }
        assert_eq!(day_of_week_occurrence(at(2021, 3, 29, 0)), 5);
        assert_eq!(day_of_week_occurrence(at(2021, 4, 30, 0)), 5);
    }

    #[test]
    fn converts_utc_to_site_wall_clock() {
        let utc = Utc.with_ymd_and_hms(2021, 3, 3, 10, 0, 0).unwrap();
        let seattle = in_timezone(utc, "Pacific Standard Time").unwrap();
        assert_eq!(seattle, at(2021, 3, 3, 2));

        let sydney = in_timezone(utc, "AUS Eastern Standard Time").unwrap();
        assert_eq!(sydney, at(2021, 3, 3, 21));
    }

    #[test]
    fn dst_transition_keeps_wall_clock_indices() {
        // 2021-03-14 02:00 PST does not exist; 10:00 UTC lands at 03:00 PDT.
        let utc = Utc.with_ymd_and_hms(2021, 3, 14, 10, 0, 0).unwrap();
        let local = in_timezone(utc, "America/Los_Angeles").unwrap();
        assert_eq!(local.hour(), 3);
        assert_eq!(hour_index(local) % 24, 3);
    }

    #[test]
    fn iana_names_resolve_directly() {
        assert!(resolve_timezone("Australia/Sydney").is_ok());
        assert!(resolve_timezone("Not/AZone").is_err());
    }
}
