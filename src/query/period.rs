use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, TimeDelta, Weekday};
use regex::Regex;
use serde::Serialize;

use crate::date_util::{iso_week_start, unix_midnight};
use crate::error::{Error, Result};

static RE_QUARTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-Q([1-4])$").unwrap());
static RE_WEEK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{1,2})$").unwrap());
static RE_MONTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());
static RE_ROLLING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)[dD]$").unwrap());

/// Time-bucketing granularity for time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

/// One expected slot of a normalized time series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub id: i64,
    pub start: NaiveDate,
}

impl Period {
    /// Parse a period string.
    ///
    /// Supported formats: `day`, `week`, `month`, `year`, plus the plural
    /// (`days`) and adverb (`daily`, `weekly`, `monthly`, `yearly`) forms.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" | "days" | "daily" => Ok(Period::Day),
            "week" | "weeks" | "weekly" => Ok(Period::Week),
            "month" | "months" | "monthly" => Ok(Period::Month),
            "year" | "years" | "yearly" | "annual" => Ok(Period::Year),
            other => Err(Error::MalformedFilter(format!("unsupported period: {other}"))),
        }
    }

    pub fn to_key(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Integer key of the bucket containing `d`.
    ///
    /// - day: Unix timestamp of the date at midnight UTC
    /// - week: `iso_year * 100 + iso_week`
    /// - month: `year * 12 + month`
    /// - year: calendar year
    pub fn bucket_id(&self, d: NaiveDate) -> i64 {
        match self {
            Period::Day => unix_midnight(d),
            Period::Week => {
                let iw = d.iso_week();
                iw.year() as i64 * 100 + iw.week() as i64
            }
            Period::Month => d.year() as i64 * 12 + d.month() as i64,
            Period::Year => d.year() as i64,
        }
    }

    /// First day of the bucket containing `d`.
    pub fn bucket_start(&self, d: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => d,
            Period::Week => iso_week_start(d),
            Period::Month => NaiveDate::from_ymd_opt(d.year(), d.month(), 1).unwrap(),
            Period::Year => NaiveDate::from_ymd_opt(d.year(), 1, 1).unwrap(),
        }
    }

    /// First day of the bucket following the one that starts at `start`.
    fn next_start(&self, start: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => start + Duration::days(1),
            Period::Week => start + Duration::days(7),
            Period::Month => {
                if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap()
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1).unwrap()
                }
            }
            Period::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap(),
        }
    }

    /// Every bucket touched by the half-open window `[start, end)`, in order.
    pub fn buckets(&self, start: NaiveDate, end: NaiveDate) -> Vec<Bucket> {
        let mut out = Vec::new();
        let mut cur = self.bucket_start(start);
        while cur < end {
            out.push(Bucket {
                id: self.bucket_id(cur),
                start: cur,
            });
            cur = self.next_start(cur);
        }
        out
    }

    /// Human-readable label for the bucket starting at `start`.
    pub fn label(&self, start: NaiveDate) -> String {
        match self {
            Period::Day => start.format("%Y-%m-%d").to_string(),
            Period::Week => {
                let iw = start.iso_week();
                format!("{}-W{:02}", iw.year(), iw.week())
            }
            Period::Month => start.format("%b %Y").to_string(),
            Period::Year => start.format("%Y").to_string(),
        }
    }

    /// SQLite expression computing `bucket_id` for a timestamp column.
    ///
    /// ISO weeks use the Thursday of the week: its calendar year is the ISO
    /// year and its ordinal day fixes the week number.
    pub fn sql_bucket(&self, column: &str) -> String {
        match self {
            Period::Day => format!("CAST(strftime('%s', date({column})) AS INTEGER)"),
            Period::Week => format!(
                "(CAST(strftime('%Y', date({column}, '-3 days', 'weekday 4')) AS INTEGER) * 100 \
                 + (CAST(strftime('%j', date({column}, '-3 days', 'weekday 4')) AS INTEGER) - 1) / 7 + 1)"
            ),
            Period::Month => format!(
                "(CAST(strftime('%Y', {column}) AS INTEGER) * 12 + CAST(strftime('%m', {column}) AS INTEGER))"
            ),
            Period::Year => format!("CAST(strftime('%Y', {column}) AS INTEGER)"),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

impl std::str::FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Period::parse(s)
    }
}

fn number<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::MalformedFilter(format!("invalid {what}: {s}")))
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::MalformedFilter(format!("invalid date {year}-{month}-{day}")))
}

/// Parse a named window into a half-open `[start, end)` date range.
///
/// Supported formats:
/// - `2025` - calendar year
/// - `2025-Q1` - quarter
/// - `2025-03` - month
/// - `2025-W05` - ISO week
/// - `30d` - the 30 days before `today`, `today` excluded
pub fn parse_window(s: &str, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let s = s.trim();

    if let Some(caps) = RE_ROLLING.captures(s) {
        let days: i64 = number(&caps[1], "day count")?;
        if days == 0 {
            return Err(Error::MalformedFilter("rolling window needs at least one day".into()));
        }
        let start = TimeDelta::try_days(days)
            .and_then(|d| today.checked_sub_signed(d))
            .ok_or_else(|| Error::MalformedFilter(format!("rolling window of {days} days is out of range")))?;
        return Ok((start, today));
    }

    if s.len() == 4 {
        let year: i32 = number(s, "year")?;
        return Ok((ymd(year, 1, 1)?, ymd(year + 1, 1, 1)?));
    }

    if let Some(caps) = RE_QUARTER.captures(s) {
        let year: i32 = number(&caps[1], "year")?;
        let q: u32 = number(&caps[2], "quarter")?;
        let start = ymd(year, (q - 1) * 3 + 1, 1)?;
        let end = if q == 4 { ymd(year + 1, 1, 1)? } else { ymd(year, q * 3 + 1, 1)? };
        return Ok((start, end));
    }

    if let Some(caps) = RE_WEEK.captures(s) {
        let year: i32 = number(&caps[1], "year")?;
        let week: u32 = number(&caps[2], "week")?;
        let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .ok_or_else(|| Error::MalformedFilter(format!("invalid week: {s}")))?;
        return Ok((start, start + Duration::days(7)));
    }

    if let Some(caps) = RE_MONTH.captures(s) {
        let year: i32 = number(&caps[1], "year")?;
        let month: u32 = number(&caps[2], "month")?;
        let start = ymd(year, month, 1)?;
        return Ok((start, Period::Month.next_start(start)));
    }

    Err(Error::MalformedFilter(format!("unrecognized window: {s}")))
}
