use std::cmp::Ordering;

use rusqlite::Connection;

use super::types::{ratio, Datum, FieldValue, MetricResult};
use super::{grouped_aggregate, Metric, MetricDefinition, DEFAULT_LIST_LIMIT};
use crate::adapter::its::{closed_predicate, issue_join};
use crate::adapter::{DataSource, EventContext};
use crate::error::{Error, Result};
use crate::filter::{Dimension, FilterSpec};
use crate::identity::{identity_join, PEOPLE_COUNT};
use crate::normalize::{DATE_FIELD, UNIXTIME_FIELD};
use crate::query::compiler::BUCKET_COLUMN;
use crate::query::fragment::SqlFragments;

/// Changes that close an issue, with the issue joined in.
fn closing_changes(filter: &FilterSpec) -> SqlFragments {
    let condition = filter.closed_condition().cloned().unwrap_or_default();
    SqlFragments::new()
        .join(issue_join())
        .filter(closed_predicate(&condition))
}

/// Issues submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Opened;

impl Metric for Opened {
    fn id(&self) -> &'static str {
        "opened"
    }

    fn name(&self) -> &'static str {
        "Opened issues"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Its
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        Ok(MetricDefinition::new(
            EventContext::its_opened(),
            self.id(),
            "COUNT(DISTINCT i.id)",
        ))
    }
}

/// Distinct people submitting issues.
#[derive(Debug, Clone, Copy, Default)]
pub struct Openers;

impl Metric for Openers {
    fn id(&self) -> &'static str {
        "openers"
    }

    fn name(&self) -> &'static str {
        "Issue submitters"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Its
    }

    fn list_dimension(&self) -> Dimension {
        Dimension::Person
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        let event = EventContext::its_opened();
        let base = SqlFragments::new().join(identity_join(&event));
        Ok(MetricDefinition::new(event, self.id(), PEOPLE_COUNT).with_base(base))
    }
}

/// Issues with a closing change in the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Closed;

impl Metric for Closed {
    fn id(&self) -> &'static str {
        "closed"
    }

    fn name(&self) -> &'static str {
        "Closed issues"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Its
    }

    fn definition(&self, filter: &FilterSpec) -> Result<MetricDefinition> {
        Ok(MetricDefinition::new(
            EventContext::its_changes(),
            self.id(),
            "COUNT(DISTINCT ch.issue_id)",
        )
        .with_base(closing_changes(filter)))
    }
}

/// Distinct people closing issues.
#[derive(Debug, Clone, Copy, Default)]
pub struct Closers;

impl Metric for Closers {
    fn id(&self) -> &'static str {
        "closers"
    }

    fn name(&self) -> &'static str {
        "Issue closers"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Its
    }

    fn list_dimension(&self) -> Dimension {
        Dimension::Person
    }

    fn definition(&self, filter: &FilterSpec) -> Result<MetricDefinition> {
        let event = EventContext::its_changes();
        let base = closing_changes(filter).join(identity_join(&event));
        Ok(MetricDefinition::new(event, self.id(), PEOPLE_COUNT).with_base(base))
    }
}

/// Backlog management index: closed issues per opened issue, in percent.
///
/// Composed from [`Closed`] and [`Opened`], so every output operation is
/// overridden. A window with nothing opened has no index (`null`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Bmi;

fn bmi_value(closed: &Datum, opened: &Datum) -> Datum {
    Datum::from(ratio(closed.or_zero(), opened.or_zero()).map(|r| r * 100.0))
}

fn missing(field: &str) -> Error {
    Error::ContractViolation(format!("missing field '{field}'"))
}

fn union_keys(first: &[Datum], second: &[Datum]) -> Vec<Datum> {
    let mut keys = first.to_vec();
    for k in second {
        if !keys.contains(k) {
            keys.push(k.clone());
        }
    }
    keys
}

fn value_for(keys: &[Datum], values: &[Datum], key: &Datum) -> Datum {
    keys.iter()
        .position(|k| k == key)
        .and_then(|i| values.get(i).cloned())
        .unwrap_or(Datum::Int(0))
}

/// Per-key closed, opened and bmi lists, keys in opened order first.
fn combine_grouped(key: &str, closed: &MetricResult, opened: &MetricResult) -> Result<MetricResult> {
    let ck = closed.list(key).ok_or_else(|| missing(key))?;
    let cv = closed.list("closed").ok_or_else(|| missing("closed"))?;
    let ok = opened.list(key).ok_or_else(|| missing(key))?;
    let ov = opened.list("opened").ok_or_else(|| missing("opened"))?;

    let keys = union_keys(ok, ck);
    let closed_values: Vec<Datum> = keys.iter().map(|k| value_for(ck, cv, k)).collect();
    let opened_values: Vec<Datum> = keys.iter().map(|k| value_for(ok, ov, k)).collect();
    let bmi = closed_values
        .iter()
        .zip(&opened_values)
        .map(|(c, o)| bmi_value(c, o))
        .collect();

    let mut out = MetricResult::new();
    out.insert(key, FieldValue::List(keys));
    out.insert("closed", FieldValue::List(closed_values));
    out.insert("opened", FieldValue::List(opened_values));
    out.insert("bmi", FieldValue::List(bmi));
    Ok(out)
}

/// Rows of a combined grouped result, in the given order.
fn select_rows(result: &MetricResult, key: &str, order: &[usize]) -> Result<MetricResult> {
    let mut out = MetricResult::new();
    for field in [key, "closed", "opened", "bmi"] {
        let values = result.list(field).ok_or_else(|| missing(field))?;
        out.insert(
            field,
            FieldValue::List(order.iter().filter_map(|&i| values.get(i).cloned()).collect()),
        );
    }
    Ok(out)
}

/// Row order by index, highest first; rows without an index go last.
fn ranked_by_bmi(combined: &MetricResult, limit: Option<u32>) -> Result<Vec<usize>> {
    let bmi = combined.list("bmi").ok_or_else(|| missing("bmi"))?;
    let mut order: Vec<usize> = (0..bmi.len()).collect();
    order.sort_by(|&a, &b| match (bmi[a].as_f64(), bmi[b].as_f64()) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    if let Some(l) = limit {
        order.truncate(l as usize);
    }
    Ok(order)
}

fn copy_axis(from: &MetricResult, to: &mut MetricResult) -> Result<()> {
    for field in [BUCKET_COLUMN, DATE_FIELD, UNIXTIME_FIELD] {
        let values = from.list(field).ok_or_else(|| missing(field))?;
        to.insert(field, FieldValue::List(values.to_vec()));
    }
    Ok(())
}

impl Metric for Bmi {
    fn id(&self) -> &'static str {
        "bmi"
    }

    fn name(&self) -> &'static str {
        "Backlog management index"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Its
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        Err(Error::Other("bmi is derived from closed and opened".into()))
    }

    fn get_agg(&self, conn: &Connection, filter: &FilterSpec) -> Result<MetricResult> {
        match filter.group_dimension() {
            None => {
                let closed = Closed.get_agg(conn, filter)?;
                let opened = Opened.get_agg(conn, filter)?;
                let c = closed.scalar("closed").ok_or_else(|| missing("closed"))?;
                let o = opened.scalar("opened").ok_or_else(|| missing("opened"))?;
                let mut out = MetricResult::new();
                out.insert("bmi", FieldValue::Scalar(bmi_value(c, o)));
                out.insert("closed", FieldValue::Scalar(c.clone()));
                out.insert("opened", FieldValue::Scalar(o.clone()));
                Ok(out)
            }
            Some(dim) => {
                let closed = grouped_aggregate(&Closed, conn, filter, dim, None)?;
                let opened = grouped_aggregate(&Opened, conn, filter, dim, None)?;
                let combined = combine_grouped(dim.name(), &closed, &opened)?;
                let order = ranked_by_bmi(&combined, filter.limit())?;
                select_rows(&combined, dim.name(), &order)
            }
        }
    }

    fn get_ts(&self, conn: &Connection, filter: &FilterSpec) -> Result<MetricResult> {
        let closed = Closed.get_ts(conn, filter)?;
        let opened = Opened.get_ts(conn, filter)?;
        let mut out = MetricResult::new();
        copy_axis(&opened, &mut out)?;

        match filter.group_dimension() {
            None => {
                let cv = closed.list("closed").ok_or_else(|| missing("closed"))?;
                let ov = opened.list("opened").ok_or_else(|| missing("opened"))?;
                if cv.len() != ov.len() {
                    return Err(Error::ContractViolation(format!(
                        "closed has {} bucket(s), opened {}",
                        cv.len(),
                        ov.len()
                    )));
                }
                let bmi = cv.iter().zip(ov).map(|(c, o)| bmi_value(c, o)).collect();
                out.insert("bmi", FieldValue::List(bmi));
                out.insert("closed", FieldValue::List(cv.to_vec()));
                out.insert("opened", FieldValue::List(ov.to_vec()));
            }
            Some(dim) => {
                let key = dim.name();
                let buckets = out.list(BUCKET_COLUMN).map_or(0, |b| b.len());
                let ck = closed.list(key).ok_or_else(|| missing(key))?;
                let cs = closed.grouped("closed").ok_or_else(|| missing("closed"))?;
                let ok = opened.list(key).ok_or_else(|| missing(key))?;
                let os = opened.grouped("opened").ok_or_else(|| missing("opened"))?;

                let keys = union_keys(ok, ck);
                let series_for = |ks: &[Datum], ss: &[Vec<Datum>], k: &Datum| {
                    ks.iter()
                        .position(|x| x == k)
                        .and_then(|i| ss.get(i).cloned())
                        .unwrap_or_else(|| vec![Datum::Int(0); buckets])
                };
                let closed_series: Vec<Vec<Datum>> =
                    keys.iter().map(|k| series_for(ck, cs, k)).collect();
                let opened_series: Vec<Vec<Datum>> =
                    keys.iter().map(|k| series_for(ok, os, k)).collect();
                let bmi = closed_series
                    .iter()
                    .zip(&opened_series)
                    .map(|(c, o)| c.iter().zip(o).map(|(c, o)| bmi_value(c, o)).collect())
                    .collect();

                out.insert(key, FieldValue::List(keys));
                out.insert("bmi", FieldValue::Grouped(bmi));
                out.insert("closed", FieldValue::Grouped(closed_series));
                out.insert("opened", FieldValue::Grouped(opened_series));
            }
        }
        Ok(out)
    }

    fn get_list(&self, conn: &Connection, filter: &FilterSpec) -> Result<MetricResult> {
        let dim = filter
            .group_dimension()
            .unwrap_or_else(|| self.list_dimension());
        let closed = grouped_aggregate(&Closed, conn, filter, dim, None)?;
        let opened = grouped_aggregate(&Opened, conn, filter, dim, None)?;
        let combined = combine_grouped(dim.name(), &closed, &opened)?;
        let limit = filter.limit().unwrap_or(DEFAULT_LIST_LIMIT);
        let order = ranked_by_bmi(&combined, Some(limit))?;
        select_rows(&combined, dim.name(), &order)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::filter::ClosedCondition;
    use crate::storage::{migrate, repository};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Tracker "bugs" gets four issues in March, two closed in March; tracker
    /// "tasks" gets one issue in April that is closed with a custom status.
    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        repository::add_identity(&conn, 10, DataSource::Its, "u-ana", "Ana").unwrap();
        repository::add_identity(&conn, 11, DataSource::Its, "u-bo", "Bo").unwrap();
        let bugs = repository::upsert_tracker(&conn, "bugs").unwrap();
        let tasks = repository::upsert_tracker(&conn, "tasks").unwrap();

        let mut issues = Vec::new();
        for (n, day) in [(1, 2), (2, 3), (3, 10), (4, 20)] {
            let id = repository::insert_issue(
                &conn,
                bugs,
                &format!("BUG-{n}"),
                Some(10),
                &format!("2025-03-{day:02} 08:00:00"),
            )
            .unwrap();
            issues.push(id);
        }
        repository::insert_change(&conn, issues[0], "status", "RESOLVED", Some(11), "2025-03-05 10:00:00").unwrap();
        repository::insert_change(&conn, issues[1], "status", "CLOSED", Some(11), "2025-03-12 10:00:00").unwrap();
        repository::insert_change(&conn, issues[2], "priority", "HIGH", Some(10), "2025-03-12 11:00:00").unwrap();

        let task = repository::insert_issue(&conn, tasks, "T-1", Some(11), "2025-04-02 08:00:00").unwrap();
        repository::insert_change(&conn, task, "state", "done", Some(10), "2025-04-03 08:00:00").unwrap();
        conn
    }

    fn march() -> FilterSpec {
        FilterSpec::builder(date(2025, 3, 1), date(2025, 4, 1)).build().unwrap()
    }

    #[test]
    fn test_opened_closed_and_people() {
        let conn = setup();
        let f = march();
        assert_eq!(Opened.get_agg(&conn, &f).unwrap().scalar("opened"), Some(&Datum::Int(4)));
        assert_eq!(Closed.get_agg(&conn, &f).unwrap().scalar("closed"), Some(&Datum::Int(2)));
        assert_eq!(Openers.get_agg(&conn, &f).unwrap().scalar("openers"), Some(&Datum::Int(1)));
        assert_eq!(Closers.get_agg(&conn, &f).unwrap().scalar("closers"), Some(&Datum::Int(1)));
    }

    #[test]
    fn test_closed_condition_override() {
        let conn = setup();
        let f = FilterSpec::builder(date(2025, 4, 1), date(2025, 5, 1))
            .closed_condition(ClosedCondition {
                field: "state".into(),
                values: vec!["done".into()],
            })
            .build()
            .unwrap();
        assert_eq!(Closed.get_agg(&conn, &f).unwrap().scalar("closed"), Some(&Datum::Int(1)));

        let f = FilterSpec::builder(date(2025, 4, 1), date(2025, 5, 1)).build().unwrap();
        assert_eq!(Closed.get_agg(&conn, &f).unwrap().scalar("closed"), Some(&Datum::Int(0)));
    }

    #[test]
    fn test_bmi_and_its_sentinel() {
        let conn = setup();
        let r = Bmi.get_agg(&conn, &march()).unwrap();
        assert_eq!(r.scalar("bmi"), Some(&Datum::Float(50.0)));

        let empty = FilterSpec::builder(date(2025, 6, 1), date(2025, 7, 1)).build().unwrap();
        let r = Bmi.get_agg(&conn, &empty).unwrap();
        assert_eq!(r.scalar("bmi"), Some(&Datum::Null));
        assert_eq!(r.scalar("opened"), Some(&Datum::Int(0)));
    }

    #[test]
    fn test_bmi_series_per_bucket() {
        let conn = setup();
        let f = FilterSpec::builder(date(2025, 3, 1), date(2025, 5, 1)).build().unwrap();
        let r = Bmi.get_ts(&conn, &f).unwrap();
        assert_eq!(r.list("bmi").unwrap(), &[Datum::Float(50.0), Datum::Float(0.0)]);
        assert_eq!(r.list("date").unwrap().len(), 2);
    }

    #[test]
    fn test_bmi_grouped_limit_keeps_highest_index() {
        let conn = setup();
        let docs = repository::upsert_tracker(&conn, "docs").unwrap();
        let d1 = repository::insert_issue(&conn, docs, "DOC-1", Some(10), "2025-03-15 08:00:00").unwrap();
        repository::insert_change(&conn, d1, "status", "CLOSED", Some(11), "2025-03-16 08:00:00").unwrap();

        let f = FilterSpec::builder(date(2025, 3, 1), date(2025, 4, 1))
            .group_by("repository")
            .limit(1)
            .build()
            .unwrap();
        let r = Bmi.get_agg(&conn, &f).unwrap();
        assert_eq!(r.list("repository").unwrap(), &[Datum::from("docs")]);
        assert_eq!(r.list("bmi").unwrap(), &[Datum::Float(100.0)]);
        assert_eq!(r.list("opened").unwrap(), &[Datum::Int(1)]);

        let f = FilterSpec::builder(date(2025, 3, 1), date(2025, 4, 1))
            .group_by("repository")
            .build()
            .unwrap();
        let r = Bmi.get_agg(&conn, &f).unwrap();
        assert_eq!(r.list("repository").unwrap(), &[Datum::from("docs"), Datum::from("bugs")]);
    }

    #[test]
    fn test_bmi_grouped_by_tracker() {
        let conn = setup();
        let f = FilterSpec::builder(date(2025, 3, 1), date(2025, 5, 1))
            .group_by("repository")
            .build()
            .unwrap();
        let r = Bmi.get_agg(&conn, &f).unwrap();
        assert_eq!(r.list("repository").unwrap(), &[Datum::from("bugs"), Datum::from("tasks")]);
        assert_eq!(r.list("bmi").unwrap(), &[Datum::Float(50.0), Datum::Float(0.0)]);

        let list = Bmi.get_list(&conn, &march()).unwrap();
        assert_eq!(list.list("repository").unwrap(), &[Datum::from("bugs")]);
    }

    #[test]
    fn test_bmi_trends_keep_undefined_window() {
        let conn = setup();
        let t = Bmi.get_trends(&conn, &march(), date(2025, 4, 1), 31).unwrap();
        match t.trends {
            crate::trends::TrendScope::Total(v) => {
                assert_eq!(v.last_value, Some(50.0));
                // nothing opened before March: no index, not zero
                assert_eq!(v.previous_value, None);
                assert_eq!(v.delta, None);
                assert_eq!(v.percentage_change, None);
            }
            other => panic!("expected total trend, got {other:?}"),
        }
    }
}
