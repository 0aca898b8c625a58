//! Window-over-window deltas.
//!
//! `last` covers `[anchor - days, anchor)` and `previous` the `days` before
//! that. Both windows are plain aggregates over filters derived with
//! [`FilterSpec::with_date_range`].

use chrono::{NaiveDate, TimeDelta};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::filter::{Dimension, FilterSpec};
use crate::metrics::types::{ratio, Datum, MetricResult};
use crate::metrics::Metric;

/// A window whose value is undefined (a `Null` ratio) reads as `None`, and so
/// does every figure derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendValues {
    pub last_value: Option<f64>,
    pub previous_value: Option<f64>,
    pub delta: Option<f64>,
    /// `None` when `previous_value` is zero or undefined.
    pub percentage_change: Option<f64>,
}

impl TrendValues {
    pub fn new(last_value: Option<f64>, previous_value: Option<f64>) -> Self {
        let delta = last_value.zip(previous_value).map(|(l, p)| l - p);
        Self {
            last_value,
            previous_value,
            delta,
            percentage_change: delta
                .zip(previous_value)
                .and_then(|(d, p)| ratio(d, p))
                .map(|r| r * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrendScope {
    Total(TrendValues),
    /// One entry per key, index-aligned with `keys`.
    PerItem {
        dimension: Dimension,
        keys: Vec<Datum>,
        values: Vec<TrendValues>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendResult {
    pub metric: String,
    pub days: u32,
    pub anchor: NaiveDate,
    pub trends: TrendScope,
}

/// Union two keyed series: keys of `last` in their order, then keys only
/// `previous` has. A key missing from one window is zero there; an undefined
/// value stays `None`.
pub fn align_items(
    last_keys: &[Datum],
    last_values: &[Option<f64>],
    previous_keys: &[Datum],
    previous_values: &[Option<f64>],
) -> (Vec<Datum>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut keys: Vec<Datum> = last_keys.to_vec();
    for k in previous_keys {
        if !keys.contains(k) {
            keys.push(k.clone());
        }
    }
    let lookup = |ks: &[Datum], vs: &[Option<f64>], key: &Datum| {
        match ks.iter().position(|k| k == key) {
            Some(i) => vs.get(i).copied().flatten(),
            None => Some(0.0),
        }
    };
    let last = keys.iter().map(|k| lookup(last_keys, last_values, k)).collect();
    let previous = keys
        .iter()
        .map(|k| lookup(previous_keys, previous_values, k))
        .collect();
    (keys, last, previous)
}

fn scalar_value(result: &MetricResult, field: &str) -> Result<Option<f64>> {
    result
        .scalar(field)
        .map(Datum::as_f64)
        .ok_or_else(|| Error::ContractViolation(format!("aggregate has no scalar '{field}'")))
}

fn keyed_values(
    result: &MetricResult,
    key: &str,
    field: &str,
) -> Result<(Vec<Datum>, Vec<Option<f64>>)> {
    let keys = result
        .list(key)
        .ok_or_else(|| Error::ContractViolation(format!("aggregate has no key list '{key}'")))?;
    let values = result
        .list(field)
        .ok_or_else(|| Error::ContractViolation(format!("aggregate has no list '{field}'")))?;
    if keys.len() != values.len() {
        return Err(Error::ContractViolation(format!(
            "{} key(s) but {} value(s) for '{field}'",
            keys.len(),
            values.len()
        )));
    }
    Ok((keys.to_vec(), values.iter().map(Datum::as_f64).collect()))
}

fn days_before(date: NaiveDate, days: u32) -> Result<NaiveDate> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|d| date.checked_sub_signed(d))
        .ok_or_else(|| {
            Error::MalformedFilter(format!("{days} day(s) before {date} is out of range"))
        })
}

/// Compare the `days` before `anchor` with the `days` before that.
pub fn compute<M: Metric + ?Sized>(
    metric: &M,
    conn: &Connection,
    filter: &FilterSpec,
    anchor: NaiveDate,
    days: u32,
) -> Result<TrendResult> {
    if days == 0 {
        return Err(Error::MalformedFilter("trend window must be at least one day".into()));
    }
    let last_start = days_before(anchor, days)?;
    let previous_start = days_before(last_start, days)?;
    let last_filter = filter.with_date_range(last_start, anchor)?;
    let previous_filter = filter.with_date_range(previous_start, last_start)?;

    let last = metric.get_agg(conn, &last_filter)?;
    let previous = metric.get_agg(conn, &previous_filter)?;
    let field = metric.id();

    let trends = match filter.group_dimension() {
        None => TrendScope::Total(TrendValues::new(
            scalar_value(&last, field)?,
            scalar_value(&previous, field)?,
        )),
        Some(dim) => {
            let (lk, lv) = keyed_values(&last, dim.name(), field)?;
            let (pk, pv) = keyed_values(&previous, dim.name(), field)?;
            let (keys, lv, pv) = align_items(&lk, &lv, &pk, &pv);
            TrendScope::PerItem {
                dimension: dim,
                keys,
                values: lv
                    .into_iter()
                    .zip(pv)
                    .map(|(l, p)| TrendValues::new(l, p))
                    .collect(),
            }
        }
    };

    Ok(TrendResult {
        metric: field.to_string(),
        days,
        anchor,
        trends,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_change() {
        let t = TrendValues::new(Some(15.0), Some(10.0));
        assert_eq!(t.delta, Some(5.0));
        assert_eq!(t.percentage_change, Some(50.0));

        let t = TrendValues::new(Some(4.0), Some(0.0));
        assert_eq!(t.delta, Some(4.0));
        assert_eq!(t.percentage_change, None);
    }

    #[test]
    fn test_undefined_window_is_never_zero() {
        let t = TrendValues::new(Some(50.0), None);
        assert_eq!(t.last_value, Some(50.0));
        assert_eq!(t.previous_value, None);
        assert_eq!(t.delta, None);
        assert_eq!(t.percentage_change, None);
    }

    #[test]
    fn test_align_items_unions_and_reorders() {
        let last_keys = vec![Datum::from("b"), Datum::from("a")];
        let prev_keys = vec![Datum::from("a"), Datum::from("c")];
        let (keys, last, prev) = align_items(
            &last_keys,
            &[Some(5.0), None],
            &prev_keys,
            &[Some(1.0), Some(7.0)],
        );
        assert_eq!(keys, vec![Datum::from("b"), Datum::from("a"), Datum::from("c")]);
        assert_eq!(last, vec![Some(5.0), None, Some(0.0)]);
        assert_eq!(prev, vec![Some(0.0), Some(1.0), Some(7.0)]);
    }

    #[test]
    fn test_days_before_out_of_range() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(days_before(d, 28).unwrap(), NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert!(matches!(days_before(d, u32::MAX), Err(Error::MalformedFilter(_))));
    }

    #[test]
    fn test_serialized_sentinel_is_null() {
        let json = serde_json::to_value(TrendValues::new(Some(1.0), None)).unwrap();
        assert_eq!(json["last_value"], 1.0);
        assert!(json["previous_value"].is_null());
        assert!(json["delta"].is_null());
        assert!(json["percentage_change"].is_null());
    }
}
