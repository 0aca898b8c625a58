pub mod its;
pub mod registry;
pub mod scm;
pub mod types;

pub use types::*;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::adapter::{DataSource, EventContext};
use crate::error::Result;
use crate::filter::{Dimension, FilterSpec};
use crate::normalize::{complete_periods, pivot_grouped, scalar_result};
use crate::query::compiler::{compile, execute, Grouping, Mode, QuerySpec, ValueField};
use crate::query::fragment::SqlFragments;
use crate::trends::{self, TrendResult};

/// Ranked lists return this many items unless the filter sets a limit.
pub const DEFAULT_LIST_LIMIT: u32 = 10;

/// What a metric counts: the event it is measured on, its value fields and
/// any fragments that apply regardless of the filter.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub event: EventContext,
    /// The first field is the primary value; its alias is the metric id.
    pub fields: Vec<ValueField>,
    pub base: SqlFragments,
}

impl MetricDefinition {
    pub fn new(event: EventContext, id: &str, expr: &str) -> Self {
        Self {
            event,
            fields: vec![ValueField::new(id, expr)],
            base: SqlFragments::new(),
        }
    }

    pub fn with_base(mut self, base: SqlFragments) -> Self {
        self.base = base;
        self
    }
}

/// A named measure over one data source.
///
/// Implementors only describe themselves through [`Metric::definition`]; the
/// four output operations default to the shared engine below and can be
/// overridden by metrics composed from others.
pub trait Metric: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn data_source(&self) -> DataSource;

    /// Dimension ranked by `get_list` when the filter does not group.
    fn list_dimension(&self) -> Dimension {
        Dimension::Repository
    }

    fn definition(&self, filter: &FilterSpec) -> Result<MetricDefinition>;

    fn get_agg(&self, conn: &Connection, filter: &FilterSpec) -> Result<MetricResult> {
        aggregate(self, conn, filter)
    }

    fn get_ts(&self, conn: &Connection, filter: &FilterSpec) -> Result<MetricResult> {
        time_series(self, conn, filter)
    }

    fn get_trends(
        &self,
        conn: &Connection,
        filter: &FilterSpec,
        anchor: NaiveDate,
        days: u32,
    ) -> Result<TrendResult> {
        trends::compute(self, conn, filter, anchor, days)
    }

    fn get_list(&self, conn: &Connection, filter: &FilterSpec) -> Result<MetricResult> {
        ranked_list(self, conn, filter)
    }
}

fn build_query<M: Metric + ?Sized>(
    metric: &M,
    conn: &Connection,
    filter: &FilterSpec,
    group: Option<Dimension>,
) -> Result<QuerySpec> {
    let def = metric.definition(filter)?;
    let source = metric.data_source();
    let adapter = source.adapter();

    let mut fragments = def.base;
    fragments.merge(adapter.filter_fragments(conn, &def.event, filter)?);
    let grouping = match group {
        Some(dimension) => {
            fragments.merge(adapter.joins(&def.event, dimension)?);
            Some(Grouping {
                dimension,
                key: adapter.group_key(dimension),
            })
        }
        None => None,
    };

    Ok(QuerySpec {
        data_source: source,
        from: def.event.table.to_string(),
        fields: def.fields,
        fragments,
        date_column: def.event.date.to_string(),
        startdate: filter.startdate(),
        enddate: filter.enddate(),
        period: filter.period(),
        grouping,
        limit: filter.limit(),
    })
}

/// Snapshot over the filter window; one entry per item in all-items mode.
pub fn aggregate<M: Metric + ?Sized>(
    metric: &M,
    conn: &Connection,
    filter: &FilterSpec,
) -> Result<MetricResult> {
    let group = filter.group_dimension();
    let spec = build_query(metric, conn, filter, group)?;
    let rows = execute(conn, &compile(&spec, Mode::Aggregate)?)?;
    match group {
        Some(dim) => pivot_grouped(&rows, dim.name(), None),
        None => scalar_result(&rows),
    }
}

/// Gap-filled series over the filter window, one per item in all-items mode.
pub fn time_series<M: Metric + ?Sized>(
    metric: &M,
    conn: &Connection,
    filter: &FilterSpec,
) -> Result<MetricResult> {
    let group = filter.group_dimension();
    let spec = build_query(metric, conn, filter, group)?;
    let rows = execute(conn, &compile(&spec, Mode::TimeSeries)?)?;
    let window = (filter.period(), filter.startdate(), filter.enddate());
    match group {
        Some(dim) => pivot_grouped(&rows, dim.name(), Some(window)),
        None => complete_periods(&rows, window.0, window.1, window.2),
    }
}

/// One entry per distinct `dim` item, descending by the primary value and cut
/// to `limit` items when given.
pub fn grouped_aggregate<M: Metric + ?Sized>(
    metric: &M,
    conn: &Connection,
    filter: &FilterSpec,
    dim: Dimension,
    limit: Option<u32>,
) -> Result<MetricResult> {
    let mut spec = build_query(metric, conn, filter, Some(dim))?;
    spec.limit = limit;
    let rows = execute(conn, &compile(&spec, Mode::Aggregate)?)?;
    pivot_grouped(&rows, dim.name(), None)
}

/// Top items by the primary value, descending.
pub fn ranked_list<M: Metric + ?Sized>(
    metric: &M,
    conn: &Connection,
    filter: &FilterSpec,
) -> Result<MetricResult> {
    let dim = filter
        .group_dimension()
        .unwrap_or_else(|| metric.list_dimension());
    let limit = filter.limit().unwrap_or(DEFAULT_LIST_LIMIT);
    grouped_aggregate(metric, conn, filter, dim, Some(limit))
}
