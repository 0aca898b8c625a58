use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

/// Storage format for event timestamps. Lexicographic order matches time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Unix timestamp of `d` at 00:00 UTC.
pub fn unix_midnight(d: NaiveDate) -> i64 {
    d.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Date string used for window bounds in SQL parameters.
pub fn sql_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn sql_timestamp(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| Error::MalformedFilter(format!("invalid date '{s}': {e}")))
}

/// Parse either a full timestamp or a bare date (taken as midnight).
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Ok(dt);
    }
    let d = parse_date(s)?;
    Ok(d.and_hms_opt(0, 0, 0).unwrap())
}

/// Monday of the ISO week containing `d`.
pub fn iso_week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_monday() as i64)
}
