//! Calendar helpers for the date/time value variants.
//!
//! Dates are stored as days since 1970-01-01, times as microseconds since
//! midnight and timestamps as microseconds since the Unix epoch in UTC.
//! Parsing and calendar arithmetic go through `chrono`; anything outside
//! its supported range is rejected rather than wrapped.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// `num_days_from_ce` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Accepted `date time` layouts, most specific first.
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}

fn days_from_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

fn time_from_micros(micros: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok()?;
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

fn micros_from_time(time: NaiveTime) -> Option<i64> {
    // Leap seconds carry a nanosecond field past one second.
    if time.nanosecond() >= 1_000_000_000 {
        return None;
    }
    Some(
        i64::from(time.num_seconds_from_midnight()) * 1_000_000
            + i64::from(time.nanosecond() / 1_000),
    )
}

fn micros_from_datetime(datetime: NaiveDateTime) -> Option<i64> {
    micros_from_time(datetime.time())?;
    Some(datetime.and_utc().timestamp_micros())
}

/// Parse `YYYY-MM-DD` into days since the epoch.
pub fn parse_date(s: &str) -> Option<i32> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .ok()
        .map(days_from_date)
}

/// Parse `HH:MM[:SS[.ffffff]]` into microseconds since midnight.
pub fn parse_time(s: &str) -> Option<i64> {
    s.trim().parse::<NaiveTime>().ok().and_then(micros_from_time)
}

/// Parse an ISO-8601 timestamp into microseconds since the epoch.
///
/// Accepts `YYYY-MM-DD[T| ]HH:MM[:SS[.ffffff]]` with an optional `Z` or
/// `±HH:MM` offset, or a bare date (midnight). Offset timestamps are
/// normalized to UTC.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(aware) = DateTime::parse_from_rfc3339(s) {
        return micros_from_datetime(aware.naive_utc());
    }
    for format in DATETIME_FORMATS {
        let with_offset = format!("{format}%:z");
        if let Ok(aware) = DateTime::parse_from_str(s, &with_offset) {
            return micros_from_datetime(aware.naive_utc());
        }
    }
    let naive = s.strip_suffix(['Z', 'z']).unwrap_or(s);
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(naive, format) {
            return micros_from_datetime(datetime);
        }
    }
    parse_date(s).and_then(date_to_timestamp)
}

/// Midnight of `days` as microseconds since the epoch.
pub fn date_to_timestamp(days: i32) -> Option<i64> {
    let midnight = date_from_days(days)?.and_hms_opt(0, 0, 0)?;
    micros_from_datetime(midnight)
}

/// `YYYY-MM-DD`; falls back to the raw day count outside the calendar range.
pub fn format_date(days: i32) -> String {
    date_from_days(days).map_or_else(
        || days.to_string(),
        |date| date.format(DATE_FORMAT).to_string(),
    )
}

pub fn format_time(micros: i64) -> String {
    time_from_micros(micros).map_or_else(
        || micros.to_string(),
        |time| time.format("%H:%M:%S%.f").to_string(),
    )
}

pub fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros).map_or_else(
        || micros.to_string(),
        |datetime| datetime.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MICROS_PER_DAY: i64 = 86_400_000_000;

    #[test]
    fn test_epoch_and_known_dates() {
        assert_eq!(parse_date("1970-01-01"), Some(0));
        assert_eq!(parse_date("1969-12-31"), Some(-1));
        assert_eq!(parse_date("2000-03-01"), Some(11_017));
        assert_eq!(format_date(11_017), "2000-03-01");
        assert_eq!(format_date(-1), "1969-12-31");
    }

    #[test]
    fn test_rejects_invalid_dates() {
        assert_eq!(parse_date("2023-02-29"), None);
        assert!(parse_date("2024-02-29").is_some());
        assert_eq!(parse_date("2024-13-01"), None);
        assert_eq!(parse_date("not-a-date"), None);
    }

    #[test]
    fn test_time_and_timestamp() {
        assert_eq!(parse_time("01:02:03"), Some(3_723_000_000));
        assert_eq!(parse_time("01:02:03.5"), Some(3_723_500_000));
        assert_eq!(parse_time("01:02"), Some(3_720_000_000));
        assert_eq!(parse_time("24:00"), None);
        assert_eq!(format_time(3_723_000_000), "01:02:03");

        let ts = parse_timestamp("1970-01-02T00:00:01Z").unwrap();
        assert_eq!(ts, MICROS_PER_DAY + 1_000_000);
        assert_eq!(format_timestamp(ts), "1970-01-02T00:00:01");
        assert_eq!(parse_timestamp("1970-01-02 00:00:01"), Some(ts));
        assert_eq!(parse_timestamp("1970-01-02"), Some(MICROS_PER_DAY));
    }

    #[test]
    fn test_offsets_are_normalized_to_utc() {
        let utc = parse_timestamp("2024-01-01T08:00:00").unwrap();
        assert_eq!(parse_timestamp("2024-01-01T10:00:00+02:00"), Some(utc));
        assert_eq!(parse_timestamp("2024-01-01T03:30:00-04:30"), Some(utc));
        assert_eq!(parse_timestamp("2024-01-01T10:00+02:00"), Some(utc));
        assert_eq!(parse_timestamp("2024-01-01T08:00:00Z"), Some(utc));
    }

    #[test]
    fn test_out_of_range_years_are_rejected() {
        assert_eq!(parse_timestamp("300000-01-01T00:00:00"), None);
        assert_eq!(parse_date("300000-01-01"), None);
        assert_eq!(date_to_timestamp(i32::MAX), None);
        assert_eq!(date_to_timestamp(1), Some(MICROS_PER_DAY));
    }
}
