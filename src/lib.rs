pub mod adapter;
pub mod date_util;
pub mod error;
pub mod filter;
pub mod identity;
pub mod metrics;
pub mod normalize;
pub mod query;
pub mod storage;
pub mod trends;

use chrono::NaiveDate;
use serde::Serialize;

pub use adapter::DataSource;
pub use error::{Error, Result};
pub use filter::{ClosedCondition, Dimension, FilterSpec, FilterSpecBuilder};
pub use metrics::{Datum, FieldValue, Metric, MetricResult};
pub use query::period::Period;
pub use storage::Database;
pub use trends::{TrendResult, TrendScope, TrendValues};

use metrics::registry;
use storage::repository;

/// Settings read from `app_config`.
pub mod config_keys {
    pub const DEFAULT_PERIOD: &str = "default_period";
    pub const DEFAULT_LIMIT: &str = "default_limit";
    pub const ITS_CLOSED_FIELD: &str = "its.closed_field";
    pub const ITS_CLOSED_VALUES: &str = "its.closed_values";

    pub const ALL: [&str; 4] = [DEFAULT_PERIOD, DEFAULT_LIMIT, ITS_CLOSED_FIELD, ITS_CLOSED_VALUES];
}

/// Catalog entry for one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub data_source: DataSource,
}

/// Main entry point: runs metrics against a caller-owned [`Database`].
///
/// Every call looks the metric up, moves the filter into one reader job and
/// runs exactly one metric operation there.
pub struct RepoMetrics {
    db: Database,
}

impl RepoMetrics {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for loading data and direct queries).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub async fn agg(&self, metric_id: &str, filter: FilterSpec) -> Result<MetricResult> {
        let metric = registry::lookup(metric_id)?;
        log::info!(
            "agg {} over [{}, {})",
            metric.id(),
            filter.startdate(),
            filter.enddate()
        );
        self.db
            .reader()
            .call(move |conn| Ok::<_, rusqlite::Error>(metric.get_agg(conn, &filter)))
            .await?
    }

    pub async fn ts(&self, metric_id: &str, filter: FilterSpec) -> Result<MetricResult> {
        let metric = registry::lookup(metric_id)?;
        log::info!(
            "ts {} by {} over [{}, {})",
            metric.id(),
            filter.period(),
            filter.startdate(),
            filter.enddate()
        );
        self.db
            .reader()
            .call(move |conn| Ok::<_, rusqlite::Error>(metric.get_ts(conn, &filter)))
            .await?
    }

    pub async fn trends(
        &self,
        metric_id: &str,
        filter: FilterSpec,
        anchor: NaiveDate,
        days: u32,
    ) -> Result<TrendResult> {
        let metric = registry::lookup(metric_id)?;
        log::info!("trends {} at {anchor} over {days} day(s)", metric.id());
        self.db
            .reader()
            .call(move |conn| {
                Ok::<_, rusqlite::Error>(metric.get_trends(conn, &filter, anchor, days))
            })
            .await?
    }

    pub async fn list(&self, metric_id: &str, filter: FilterSpec) -> Result<MetricResult> {
        let metric = registry::lookup(metric_id)?;
        log::info!("list {} (limit {:?})", metric.id(), filter.limit());
        self.db
            .reader()
            .call(move |conn| Ok::<_, rusqlite::Error>(metric.get_list(conn, &filter)))
            .await?
    }

    pub fn metrics(&self) -> Vec<MetricInfo> {
        registry::all()
            .iter()
            .map(|m| MetricInfo {
                id: m.id(),
                name: m.name(),
                data_source: m.data_source(),
            })
            .collect()
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await?)
    }

    /// Store a setting after checking the key is known and the value parses.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        match key {
            config_keys::DEFAULT_PERIOD => {
                Period::parse(value)?;
            }
            config_keys::DEFAULT_LIMIT => {
                value
                    .parse::<u32>()
                    .map_err(|_| Error::Config(format!("{key} must be a number, got '{value}'")))?;
            }
            config_keys::ITS_CLOSED_FIELD | config_keys::ITS_CLOSED_VALUES => {
                if value.trim().is_empty() {
                    return Err(Error::Config(format!("{key} cannot be empty")));
                }
            }
            other => return Err(Error::Config(format!("unknown config key: {other}"))),
        }
        let (key, value) = (key.to_string(), value.to_string());
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?;
        Ok(())
    }

    pub async fn list_config(&self) -> Result<Vec<(String, String)>> {
        Ok(self.db.reader().call(|conn| repository::list_config(conn)).await?)
    }

    pub async fn default_period(&self) -> Result<Option<Period>> {
        self.get_config(config_keys::DEFAULT_PERIOD)
            .await?
            .map(|p| Period::parse(&p))
            .transpose()
    }

    pub async fn default_limit(&self) -> Result<Option<u32>> {
        match self.get_config(config_keys::DEFAULT_LIMIT).await? {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| Error::Config(format!("stored default_limit is not a number: {v}"))),
            None => Ok(None),
        }
    }

    /// Closed condition from `its.closed_field` / `its.closed_values`, each
    /// falling back to the built-in default when unset.
    pub async fn closed_condition(&self) -> Result<Option<ClosedCondition>> {
        let field = self.get_config(config_keys::ITS_CLOSED_FIELD).await?;
        let values = self.get_config(config_keys::ITS_CLOSED_VALUES).await?;
        if field.is_none() && values.is_none() {
            return Ok(None);
        }
        let default = ClosedCondition::default();
        let mut parsed: Vec<String> = values
            .iter()
            .flat_map(|v| v.split(','))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if parsed.is_empty() {
            if values.is_some() {
                log::warn!("{} has no usable values, using defaults", config_keys::ITS_CLOSED_VALUES);
            }
            parsed = default.values;
        }
        Ok(Some(ClosedCondition {
            field: field.unwrap_or(default.field),
            values: parsed,
        }))
    }

    /// Canonical identities flagged as bots.
    pub async fn bot_uuids(&self) -> Result<Vec<String>> {
        Ok(self.db.reader().call(|conn| repository::bot_uuids(conn)).await?)
    }

    /// Row count per warehouse table.
    pub async fn status(&self) -> Result<Vec<(String, i64)>> {
        Ok(self.db.reader().call(|conn| repository::table_counts(conn)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EnrollmentKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded() -> RepoMetrics {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                repository::add_identity(conn, 1, DataSource::Scm, "u-ana", "Ana")?;
                repository::add_identity(conn, 2, DataSource::Scm, "u-bot", "ci-bot")?;
                repository::set_bot(conn, "u-bot", true)?;
                repository::add_enrollment(conn, "u-ana", EnrollmentKind::Country, "NZ", None, None)?;
                let core = repository::upsert_scm_repository(conn, "core", None)?;
                repository::insert_commit(conn, "c1", core, Some(1), Some(1), "2025-05-02 10:00:00")?;
                repository::insert_commit(conn, "c2", core, Some(2), Some(2), "2025-05-03 10:00:00")?;
                repository::insert_commit(conn, "c3", core, Some(1), Some(1), "2025-06-03 10:00:00")?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
        RepoMetrics::new(db)
    }

    fn may_june() -> FilterSpecBuilder {
        FilterSpec::builder(date(2025, 5, 1), date(2025, 7, 1))
    }

    #[tokio::test]
    async fn test_agg_and_ts() {
        let rm = seeded().await;
        let r = rm.agg("commits", may_june().build().unwrap()).await.unwrap();
        assert_eq!(r.scalar("commits"), Some(&Datum::Int(3)));

        let r = rm.ts("commits", may_june().build().unwrap()).await.unwrap();
        assert_eq!(r.list("commits").unwrap(), &[Datum::Int(2), Datum::Int(1)]);
    }

    #[tokio::test]
    async fn test_bots_can_be_excluded() {
        let rm = seeded().await;
        let mut b = may_june();
        for uuid in rm.bot_uuids().await.unwrap() {
            b = b.exclude_actor(&uuid);
        }
        let r = rm.agg("commits", b.build().unwrap()).await.unwrap();
        assert_eq!(r.scalar("commits"), Some(&Datum::Int(2)));
    }

    #[tokio::test]
    async fn test_errors_pass_through_unchanged() {
        let rm = seeded().await;
        let err = rm.agg("stars", may_june().build().unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownMetric(_)));

        let f = may_june().group_by("project").build().unwrap();
        let err = rm.agg("commits", f).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedDimension { .. }));
    }

    #[tokio::test]
    async fn test_list_and_trends() {
        let rm = seeded().await;
        let f = may_june().group_by("country").build().unwrap();
        let r = rm.list("commits", f).await.unwrap();
        assert_eq!(r.list("country").unwrap(), &[Datum::from("NZ")]);
        assert_eq!(r.list("commits").unwrap(), &[Datum::Int(2)]);

        let t = rm
            .trends("commits", may_june().build().unwrap(), date(2025, 7, 1), 30)
            .await
            .unwrap();
        assert_eq!(t.metric, "commits");
        match t.trends {
            TrendScope::Total(v) => {
                assert_eq!(v.last_value, Some(1.0));
                assert_eq!(v.previous_value, Some(2.0));
                assert_eq!(v.percentage_change, Some(-50.0));
            }
            other => panic!("expected total trend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_config_validation_and_defaults() {
        let rm = seeded().await;
        assert_eq!(rm.default_period().await.unwrap(), None);
        assert_eq!(rm.closed_condition().await.unwrap(), None);

        rm.set_config("default_period", "weekly").await.unwrap();
        rm.set_config("default_limit", "3").await.unwrap();
        rm.set_config("its.closed_values", "Done, Won't Fix").await.unwrap();
        assert!(matches!(rm.set_config("colour", "blue").await, Err(Error::Config(_))));
        assert!(matches!(
            rm.set_config("default_period", "fortnight").await,
            Err(Error::MalformedFilter(_))
        ));

        assert_eq!(rm.default_period().await.unwrap(), Some(Period::Week));
        assert_eq!(rm.default_limit().await.unwrap(), Some(3));
        let cond = rm.closed_condition().await.unwrap().unwrap();
        assert_eq!(cond.field, "status");
        assert_eq!(cond.values, vec!["Done".to_string(), "Won't Fix".to_string()]);
        assert_eq!(rm.list_config().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_catalog_and_status() {
        let rm = seeded().await;
        let ids: Vec<&str> = rm.metrics().iter().map(|m| m.id).collect();
        assert!(ids.contains(&"commits") && ids.contains(&"bmi"));

        let status = rm.status().await.unwrap();
        assert!(status.contains(&("scm_commits".to_string(), 3)));
    }
}
