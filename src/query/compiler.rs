use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::adapter::DataSource;
use crate::date_util::sql_date;
use crate::error::{Error, Result};
use crate::filter::Dimension;
use crate::metrics::types::Datum;
use crate::query::fragment::SqlFragments;
use crate::query::period::Period;

/// Name of the bucket column in time-series queries.
pub const BUCKET_COLUMN: &str = "id";

/// A value expression and the output column it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueField {
    pub alias: String,
    pub expr: String,
}

impl ValueField {
    pub fn new(alias: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            expr: expr.into(),
        }
    }
}

/// All-items grouping: the dimension and the adapter's key expression, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub dimension: Dimension,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One snapshot over the window.
    Aggregate,
    /// One row per period bucket.
    TimeSeries,
}

/// Everything the compiler needs for one statement.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub data_source: DataSource,
    pub from: String,
    pub fields: Vec<ValueField>,
    pub fragments: SqlFragments,
    pub date_column: String,
    pub startdate: NaiveDate,
    pub enddate: NaiveDate,
    pub period: Period,
    pub grouping: Option<Grouping>,
    pub limit: Option<u32>,
}

/// SQL text plus its bound values, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Raw result rows with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Datum>>,
}

impl QueryRows {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

pub fn compile(spec: &QuerySpec, mode: Mode) -> Result<CompiledQuery> {
    if spec.fields.is_empty() {
        return Err(Error::Other("query has no value fields".into()));
    }

    let group = match &spec.grouping {
        Some(g) => match &g.key {
            Some(key) => Some((g.dimension.name(), key.as_str())),
            None => return Err(Error::unsupported(g.dimension, spec.data_source)),
        },
        None => None,
    };

    let mut params: Vec<Value> = Vec::new();
    let mut select = Vec::new();
    let mut group_by = Vec::new();
    let mut order_by = Vec::new();

    if mode == Mode::TimeSeries {
        let bucket = spec.period.sql_bucket(&spec.date_column);
        select.push(format!("{bucket} AS {BUCKET_COLUMN}"));
        group_by.push(bucket);
        order_by.push(format!("{BUCKET_COLUMN} ASC"));
    }
    if let Some((alias, key)) = group {
        select.push(format!("{key} AS {alias}"));
        group_by.push(key.to_string());
        if mode == Mode::Aggregate {
            order_by.push(format!("{} DESC", spec.fields[0].alias));
        }
        order_by.push(format!("{alias} ASC"));
    }
    for f in &spec.fields {
        select.push(format!("{} AS {}", f.expr, f.alias));
    }

    let mut sql = format!("SELECT {} FROM {}", select.join(", "), spec.from);
    for join in spec.fragments.joins() {
        sql.push(' ');
        sql.push_str(&join.to_sql());
    }

    let mut wheres = vec![
        format!("{} >= ?", spec.date_column),
        format!("{} < ?", spec.date_column),
    ];
    params.push(Value::from(sql_date(spec.startdate)));
    params.push(Value::from(sql_date(spec.enddate)));
    for p in spec.fragments.predicates() {
        wheres.push(format!("({})", p.sql));
        params.extend(p.params.iter().cloned());
    }
    sql.push_str(" WHERE ");
    sql.push_str(&wheres.join(" AND "));

    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }
    if let (Mode::Aggregate, Some(limit), Some(_)) = (mode, spec.limit, group) {
        sql.push_str(" LIMIT ?");
        params.push(Value::from(limit as i64));
    }

    Ok(CompiledQuery { sql, params })
}

/// Run a compiled query. Driver errors propagate as `Error::Database`.
pub fn execute(conn: &Connection, query: &CompiledQuery) -> Result<QueryRows> {
    log::debug!("{} [{} param(s)]", query.sql, query.params.len());
    let mut stmt = conn.prepare(&query.sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut out = QueryRows {
        columns,
        rows: Vec::new(),
    };
    let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Datum::from(row.get_ref(i)?));
        }
        out.rows.push(values);
    }
    if out.rows.is_empty() {
        log::debug!("Query returned no rows");
    }
    Ok(out)
}
