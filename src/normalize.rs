//! Turns raw query rows into [`MetricResult`]s: gap-filled time series and
//! per-key pivots.
//!
//! Every row set is checked against the shape the compiler promised. Anything
//! else is a [`Error::ContractViolation`]; an empty row set is not.

use std::collections::HashMap;
use std::mem::{self, Discriminant};

use chrono::NaiveDate;

use crate::date_util::unix_midnight;
use crate::error::{Error, Result};
use crate::metrics::types::{Datum, FieldValue, MetricResult};
use crate::query::compiler::{QueryRows, BUCKET_COLUMN};
use crate::query::period::{Bucket, Period};

/// Human-readable bucket labels.
pub const DATE_FIELD: &str = "date";
/// Bucket start as a Unix timestamp.
pub const UNIXTIME_FIELD: &str = "unixtime";

fn check_widths(rows: &QueryRows) -> Result<()> {
    let width = rows.columns.len();
    for (i, row) in rows.rows.iter().enumerate() {
        if row.len() != width {
            return Err(Error::ContractViolation(format!(
                "row {i} has {} value(s) for {width} column(s)",
                row.len()
            )));
        }
    }
    Ok(())
}

fn require_column(rows: &QueryRows, name: &str) -> Result<usize> {
    rows.column_index(name)
        .ok_or_else(|| Error::ContractViolation(format!("missing column '{name}'")))
}

fn zero_if_null(d: &Datum) -> Datum {
    if d.is_null() {
        Datum::Int(0)
    } else {
        d.clone()
    }
}

/// One scalar per column from a single-row aggregate. No rows reads as zero.
pub fn scalar_result(rows: &QueryRows) -> Result<MetricResult> {
    check_widths(rows)?;
    if rows.rows.len() > 1 {
        return Err(Error::ContractViolation(format!(
            "aggregate returned {} rows",
            rows.rows.len()
        )));
    }
    let mut out = MetricResult::new();
    for (i, col) in rows.columns.iter().enumerate() {
        let value = rows
            .rows
            .first()
            .map(|r| zero_if_null(&r[i]))
            .unwrap_or(Datum::Int(0));
        out.insert(col.clone(), FieldValue::Scalar(value));
    }
    Ok(out)
}

/// Bucket axis shared by every series over one window.
struct Axis {
    buckets: Vec<Bucket>,
    index: HashMap<i64, usize>,
}

impl Axis {
    fn new(period: Period, start: NaiveDate, end: NaiveDate) -> Self {
        let buckets = period.buckets(start, end);
        let index = buckets.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
        Self { buckets, index }
    }

    fn slot(&self, bucket: &Datum) -> Result<usize> {
        let id = bucket.as_i64().ok_or_else(|| {
            Error::ContractViolation(format!("bucket id '{bucket}' is not an integer"))
        })?;
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| Error::ContractViolation(format!("bucket {id} is outside the window")))
    }

    fn insert_labels(&self, period: Period, out: &mut MetricResult) {
        out.insert(
            BUCKET_COLUMN,
            FieldValue::List(self.buckets.iter().map(|b| Datum::Int(b.id)).collect()),
        );
        out.insert(
            DATE_FIELD,
            FieldValue::List(
                self.buckets
                    .iter()
                    .map(|b| Datum::Text(period.label(b.start)))
                    .collect(),
            ),
        );
        out.insert(
            UNIXTIME_FIELD,
            FieldValue::List(
                self.buckets
                    .iter()
                    .map(|b| Datum::Int(unix_midnight(b.start)))
                    .collect(),
            ),
        );
    }

    /// Zero-filled series, one per value column, from rows of a single key.
    fn fill(
        &self,
        rows: &[&Vec<Datum>],
        bucket_col: usize,
        value_cols: &[usize],
    ) -> Result<Vec<Vec<Datum>>> {
        let mut series = vec![vec![Datum::Int(0); self.buckets.len()]; value_cols.len()];
        let mut seen = vec![false; self.buckets.len()];
        for row in rows {
            let slot = self.slot(&row[bucket_col])?;
            if seen[slot] {
                return Err(Error::ContractViolation(format!(
                    "bucket {} appears twice",
                    self.buckets[slot].id
                )));
            }
            seen[slot] = true;
            for (s, &col) in series.iter_mut().zip(value_cols) {
                s[slot] = zero_if_null(&row[col]);
            }
        }
        Ok(series)
    }
}

/// Complete a one-row-per-bucket result over `[start, end)`.
///
/// The output carries `id`, `date` and `unixtime` lists plus one list per
/// value column, all with one entry per expected bucket.
pub fn complete_periods(
    rows: &QueryRows,
    period: Period,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<MetricResult> {
    check_widths(rows)?;
    let bucket_col = require_column(rows, BUCKET_COLUMN)?;
    let value_cols: Vec<usize> = (0..rows.columns.len()).filter(|&i| i != bucket_col).collect();

    let axis = Axis::new(period, start, end);
    let all: Vec<&Vec<Datum>> = rows.rows.iter().collect();
    let series = axis.fill(&all, bucket_col, &value_cols)?;

    let mut out = MetricResult::new();
    axis.insert_labels(period, &mut out);
    for (values, &col) in series.into_iter().zip(&value_cols) {
        out.insert(rows.columns[col].clone(), FieldValue::List(values));
    }
    Ok(out)
}

/// Pivot a grouped result on `key_column`.
///
/// Keys keep their first-seen order without repeats. Without `series` each
/// key has exactly one row and every value column becomes a list aligned with
/// the keys. With `series` each key's rows are completed over the same bucket
/// range and value columns become one series per key.
pub fn pivot_grouped(
    rows: &QueryRows,
    key_column: &str,
    series: Option<(Period, NaiveDate, NaiveDate)>,
) -> Result<MetricResult> {
    check_widths(rows)?;
    let key_col = require_column(rows, key_column)?;
    let bucket_col = match series {
        Some(_) => Some(require_column(rows, BUCKET_COLUMN)?),
        None => None,
    };
    let value_cols: Vec<usize> = (0..rows.columns.len())
        .filter(|&i| i != key_col && Some(i) != bucket_col)
        .collect();

    let mut keys: Vec<Datum> = Vec::new();
    let mut by_key: Vec<Vec<&Vec<Datum>>> = Vec::new();
    // Keyed by variant too: Int(1) and Text("1") are different items.
    let mut index: HashMap<(Discriminant<Datum>, String), usize> = HashMap::new();
    for row in &rows.rows {
        let key = &row[key_col];
        let slot = *index.entry((mem::discriminant(key), key.to_string())).or_insert_with(|| {
            keys.push(key.clone());
            by_key.push(Vec::new());
            keys.len() - 1
        });
        by_key[slot].push(row);
    }

    let mut out = MetricResult::new();
    match (series, bucket_col) {
        (Some((period, start, end)), Some(bucket_col)) => {
            let axis = Axis::new(period, start, end);
            let mut per_field: Vec<Vec<Vec<Datum>>> = vec![Vec::with_capacity(keys.len()); value_cols.len()];
            for key_rows in &by_key {
                let filled = axis.fill(key_rows, bucket_col, &value_cols)?;
                for (field, values) in per_field.iter_mut().zip(filled) {
                    field.push(values);
                }
            }
            axis.insert_labels(period, &mut out);
            for (values, &col) in per_field.into_iter().zip(&value_cols) {
                out.insert(rows.columns[col].clone(), FieldValue::Grouped(values));
            }
        }
        _ => {
            let mut per_field: Vec<Vec<Datum>> = vec![Vec::with_capacity(keys.len()); value_cols.len()];
            for (key, key_rows) in keys.iter().zip(&by_key) {
                if key_rows.len() > 1 {
                    return Err(Error::ContractViolation(format!(
                        "key '{key}' appears in {} rows",
                        key_rows.len()
                    )));
                }
                for (field, &col) in per_field.iter_mut().zip(&value_cols) {
                    field.push(zero_if_null(&key_rows[0][col]));
                }
            }
            for (values, &col) in per_field.into_iter().zip(&value_cols) {
                out.insert(rows.columns[col].clone(), FieldValue::List(values));
            }
        }
    }
    out.insert(key_column, FieldValue::List(keys));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rows(columns: &[&str], rows: Vec<Vec<Datum>>) -> QueryRows {
        QueryRows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn month(y: i32, m: u32) -> Datum {
        Datum::Int(y as i64 * 12 + m as i64)
    }

    #[test]
    fn test_months_are_zero_filled() {
        let raw = rows(
            &["id", "commits"],
            vec![
                vec![month(2025, 1), Datum::Int(4)],
                vec![month(2025, 2), Datum::Int(9)],
            ],
        );
        let r = complete_periods(&raw, Period::Month, date(2025, 1, 1), date(2025, 4, 1)).unwrap();
        assert_eq!(
            r.list("commits").unwrap(),
            &[Datum::Int(4), Datum::Int(9), Datum::Int(0)]
        );
        assert_eq!(
            r.list("date").unwrap(),
            &[Datum::from("Jan 2025"), Datum::from("Feb 2025"), Datum::from("Mar 2025")]
        );
        let ids: Vec<i64> = r.list("id").unwrap().iter().filter_map(|d| d.as_i64()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(r.list("unixtime").unwrap()[0], Datum::Int(1735689600));
    }

    #[test]
    fn test_series_length_matches_bucket_count() {
        let raw = rows(&["id", "n"], vec![]);
        for (period, expected) in [
            (Period::Day, 59),
            (Period::Week, 9),
            (Period::Month, 2),
            (Period::Year, 1),
        ] {
            let r = complete_periods(&raw, period, date(2025, 1, 1), date(2025, 3, 1)).unwrap();
            assert_eq!(r.list("n").unwrap().len(), expected, "{period}");
            assert!(r.list("n").unwrap().iter().all(|d| *d == Datum::Int(0)));
        }
    }

    #[test]
    fn test_contract_violations() {
        let start = date(2025, 1, 1);
        let end = date(2025, 3, 1);

        let missing = rows(&["commits"], vec![vec![Datum::Int(1)]]);
        assert!(matches!(
            complete_periods(&missing, Period::Month, start, end),
            Err(Error::ContractViolation(_))
        ));

        let outside = rows(&["id", "n"], vec![vec![month(2025, 7), Datum::Int(1)]]);
        assert!(matches!(
            complete_periods(&outside, Period::Month, start, end),
            Err(Error::ContractViolation(_))
        ));

        let duplicate = rows(
            &["id", "n"],
            vec![vec![month(2025, 1), Datum::Int(1)], vec![month(2025, 1), Datum::Int(2)]],
        );
        assert!(matches!(
            complete_periods(&duplicate, Period::Month, start, end),
            Err(Error::ContractViolation(_))
        ));

        let ragged = rows(&["id", "n"], vec![vec![month(2025, 1)]]);
        assert!(matches!(scalar_result(&ragged), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_scalar_empty_and_null_read_as_zero() {
        let empty = rows(&["commits"], vec![]);
        assert_eq!(scalar_result(&empty).unwrap().scalar("commits"), Some(&Datum::Int(0)));
        let null = rows(&["commits"], vec![vec![Datum::Null]]);
        assert_eq!(scalar_result(&null).unwrap().scalar("commits"), Some(&Datum::Int(0)));
    }

    #[test]
    fn test_pivot_aggregate_keeps_key_order() {
        let raw = rows(
            &["repository", "commits"],
            vec![
                vec![Datum::from("r1"), Datum::Int(5)],
                vec![Datum::from("r2"), Datum::Int(3)],
                vec![Datum::from("r3"), Datum::Int(2)],
            ],
        );
        let r = pivot_grouped(&raw, "repository", None).unwrap();
        assert_eq!(
            r.list("repository").unwrap(),
            &[Datum::from("r1"), Datum::from("r2"), Datum::from("r3")]
        );
        assert_eq!(r.list("commits").unwrap(), &[Datum::Int(5), Datum::Int(3), Datum::Int(2)]);
    }

    #[test]
    fn test_pivot_series_completes_each_key() {
        let raw = rows(
            &["id", "company", "commits"],
            vec![
                vec![month(2025, 1), Datum::from("Acme"), Datum::Int(2)],
                vec![month(2025, 1), Datum::from("Globex"), Datum::Int(1)],
                vec![month(2025, 3), Datum::from("Acme"), Datum::Int(7)],
            ],
        );
        let r = pivot_grouped(
            &raw,
            "company",
            Some((Period::Month, date(2025, 1, 1), date(2025, 4, 1))),
        )
        .unwrap();
        assert_eq!(r.list("company").unwrap(), &[Datum::from("Acme"), Datum::from("Globex")]);
        let series = r.grouped("commits").unwrap();
        assert_eq!(series[0], vec![Datum::Int(2), Datum::Int(0), Datum::Int(7)]);
        assert_eq!(series[1], vec![Datum::Int(1), Datum::Int(0), Datum::Int(0)]);
        assert_eq!(r.list("id").unwrap().len(), 3);
    }

    #[test]
    fn test_pivot_empty_is_empty_key_list() {
        let raw = rows(&["repository", "commits"], vec![]);
        let r = pivot_grouped(&raw, "repository", None).unwrap();
        assert!(r.list("repository").unwrap().is_empty());
        assert!(r.list("commits").unwrap().is_empty());
    }

    #[test]
    fn test_pivot_keys_compare_by_type() {
        let raw = rows(
            &["repository", "commits"],
            vec![vec![Datum::Int(1), Datum::Int(5)], vec![Datum::from("1"), Datum::Int(2)]],
        );
        let r = pivot_grouped(&raw, "repository", None).unwrap();
        assert_eq!(r.list("repository").unwrap(), &[Datum::Int(1), Datum::from("1")]);
        assert_eq!(r.list("commits").unwrap(), &[Datum::Int(5), Datum::Int(2)]);
    }

    #[test]
    fn test_pivot_rejects_repeated_key_in_aggregate() {
        let raw = rows(
            &["repository", "commits"],
            vec![vec![Datum::from("r1"), Datum::Int(5)], vec![Datum::from("r1"), Datum::Int(1)]],
        );
        assert!(matches!(
            pivot_grouped(&raw, "repository", None),
            Err(Error::ContractViolation(_))
        ));
    }
}
