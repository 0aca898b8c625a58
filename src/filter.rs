//! The immutable filter describing what a metric call computes.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::query::period::Period;

static RE_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_]+)\s*=\s*(\S.*?)\s*$").unwrap());

/// Parse `dimension=value`. A value of `*` selects every item of the
/// dimension and yields `None`.
pub fn parse_assignment(s: &str) -> Result<(Dimension, Option<String>)> {
    let caps = RE_ASSIGNMENT
        .captures(s)
        .ok_or_else(|| Error::MalformedFilter(format!("expected dimension=value, got '{s}'")))?;
    let dim = Dimension::parse(&caps[1])?;
    let value = match &caps[2] {
        "*" => None,
        v => Some(v.to_string()),
    };
    Ok((dim, value))
}

/// A named drill-down axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Repository,
    Company,
    Country,
    Domain,
    Project,
    Person,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Repository,
        Dimension::Company,
        Dimension::Country,
        Dimension::Domain,
        Dimension::Project,
        Dimension::Person,
    ];

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "repository" | "repositories" | "repo" => Ok(Dimension::Repository),
            "company" | "companies" | "organization" | "org" => Ok(Dimension::Company),
            "country" | "countries" => Ok(Dimension::Country),
            "domain" | "domains" => Ok(Dimension::Domain),
            "project" | "projects" => Ok(Dimension::Project),
            "person" | "people" | "identity" => Ok(Dimension::Person),
            other => Err(Error::unsupported(other, "any")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Repository => "repository",
            Dimension::Company => "company",
            Dimension::Country => "country",
            Dimension::Domain => "domain",
            Dimension::Project => "project",
            Dimension::Person => "person",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which change marks an issue as closed: `field` took one of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedCondition {
    pub field: String,
    pub values: Vec<String>,
}

impl Default for ClosedCondition {
    fn default() -> Self {
        Self {
            field: "status".to_string(),
            values: vec!["RESOLVED".to_string(), "CLOSED".to_string()],
        }
    }
}

/// Filter for one metric call. Built once through [`FilterSpecBuilder`] and
/// never mutated; [`FilterSpec::with_date_range`] derives a new instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    period: Period,
    startdate: NaiveDate,
    enddate: NaiveDate,
    selection: Vec<(Dimension, Option<String>)>,
    limit: Option<u32>,
    exclude_actors: Vec<String>,
    exclude_organizations: Vec<String>,
    global_dimension: Option<(Dimension, String)>,
    closed_condition: Option<ClosedCondition>,
}

impl FilterSpec {
    pub fn builder(startdate: NaiveDate, enddate: NaiveDate) -> FilterSpecBuilder {
        FilterSpecBuilder::new(startdate, enddate)
    }

    /// Same filter over `[startdate, enddate)`.
    pub fn with_date_range(&self, startdate: NaiveDate, enddate: NaiveDate) -> Result<Self> {
        check_window(startdate, enddate)?;
        Ok(Self {
            startdate,
            enddate,
            ..self.clone()
        })
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn startdate(&self) -> NaiveDate {
        self.startdate
    }

    pub fn enddate(&self) -> NaiveDate {
        self.enddate
    }

    pub fn window_days(&self) -> i64 {
        (self.enddate - self.startdate).num_days()
    }

    /// Dimension/value pairs in the order they were given.
    pub fn selection(&self) -> &[(Dimension, Option<String>)] {
        &self.selection
    }

    /// True when a dimension was given without a value.
    pub fn is_group_all(&self) -> bool {
        self.group_dimension().is_some()
    }

    pub fn group_dimension(&self) -> Option<Dimension> {
        match self.selection.as_slice() {
            [(dim, None)] => Some(*dim),
            _ => None,
        }
    }

    /// Dimensions bound to a literal value, primary selection first and the
    /// global dimension last.
    pub fn bound_dimensions(&self) -> Vec<(Dimension, &str)> {
        let mut out: Vec<(Dimension, &str)> = self
            .selection
            .iter()
            .filter_map(|(d, v)| v.as_deref().map(|v| (*d, v)))
            .collect();
        if let Some((d, v)) = &self.global_dimension {
            out.push((*d, v.as_str()));
        }
        out
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn exclude_actors(&self) -> &[String] {
        &self.exclude_actors
    }

    pub fn exclude_organizations(&self) -> &[String] {
        &self.exclude_organizations
    }

    pub fn global_dimension(&self) -> Option<(Dimension, &str)> {
        self.global_dimension.as_ref().map(|(d, v)| (*d, v.as_str()))
    }

    pub fn closed_condition(&self) -> Option<&ClosedCondition> {
        self.closed_condition.as_ref()
    }
}

fn check_window(startdate: NaiveDate, enddate: NaiveDate) -> Result<()> {
    if startdate >= enddate {
        return Err(Error::MalformedFilter(format!(
            "startdate {startdate} must be before enddate {enddate}"
        )));
    }
    Ok(())
}

/// Builder for [`FilterSpec`]. Validation happens in [`FilterSpecBuilder::build`].
#[derive(Debug, Clone)]
pub struct FilterSpecBuilder {
    startdate: NaiveDate,
    enddate: NaiveDate,
    period: Period,
    period_name: Option<String>,
    dimension: Option<String>,
    values: Option<Vec<String>>,
    limit: Option<u32>,
    exclude_actors: Vec<String>,
    exclude_organizations: Vec<String>,
    global_dimension: Option<(String, String)>,
    closed_condition: Option<ClosedCondition>,
}

impl FilterSpecBuilder {
    pub fn new(startdate: NaiveDate, enddate: NaiveDate) -> Self {
        Self {
            startdate,
            enddate,
            period: Period::Month,
            period_name: None,
            dimension: None,
            values: None,
            limit: None,
            exclude_actors: Vec::new(),
            exclude_organizations: Vec::new(),
            global_dimension: None,
            closed_condition: None,
        }
    }

    pub fn period(mut self, period: Period) -> Self {
        self.period = period;
        self.period_name = None;
        self
    }

    /// Period given by name; an unknown name fails at `build`.
    pub fn period_name(mut self, name: &str) -> Self {
        self.period_name = Some(name.to_string());
        self
    }

    /// Bind comma-separated dimension names to values positionally.
    pub fn dimension(mut self, names: &str, values: &[&str]) -> Self {
        self.dimension = Some(names.to_string());
        self.values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Select a dimension without a value: one result per distinct item.
    pub fn group_by(mut self, name: &str) -> Self {
        self.dimension = Some(name.to_string());
        self.values = None;
        self
    }

    /// Apply `dimension=value` arguments. Several bound values combine into a
    /// compound selection; `dimension=*` must stand alone.
    pub fn assignments<S: AsRef<str>>(self, args: &[S]) -> Result<Self> {
        let parsed = args
            .iter()
            .map(|a| parse_assignment(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if parsed.is_empty() {
            return Ok(self);
        }
        if parsed.iter().any(|(_, v)| v.is_none()) {
            return match parsed.as_slice() {
                [(dim, None)] => Ok(self.group_by(dim.name())),
                _ => Err(Error::MalformedFilter(
                    "dimension=* cannot be combined with other filters".into(),
                )),
            };
        }
        let names: Vec<&str> = parsed.iter().map(|(d, _)| d.name()).collect();
        let values: Vec<&str> = parsed.iter().filter_map(|(_, v)| v.as_deref()).collect();
        Ok(self.dimension(&names.join(","), &values))
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn exclude_actor(mut self, uuid: &str) -> Self {
        self.exclude_actors.push(uuid.to_string());
        self
    }

    pub fn exclude_organization(mut self, name: &str) -> Self {
        self.exclude_organizations.push(name.to_string());
        self
    }

    pub fn global_dimension(mut self, name: &str, value: &str) -> Self {
        self.global_dimension = Some((name.to_string(), value.to_string()));
        self
    }

    pub fn closed_condition(mut self, condition: ClosedCondition) -> Self {
        self.closed_condition = Some(condition);
        self
    }

    pub fn build(self) -> Result<FilterSpec> {
        check_window(self.startdate, self.enddate)?;

        let period = match &self.period_name {
            Some(name) => Period::parse(name)?,
            None => self.period,
        };

        let selection = match &self.dimension {
            None => Vec::new(),
            Some(names) => {
                let dims = names
                    .split(',')
                    .map(Dimension::parse)
                    .collect::<Result<Vec<_>>>()?;
                match &self.values {
                    None if dims.len() == 1 => vec![(dims[0], None)],
                    None => {
                        return Err(Error::MalformedFilter(format!(
                            "all-items mode needs a single dimension, got '{names}'"
                        )))
                    }
                    Some(values) if values.len() != dims.len() => {
                        return Err(Error::MalformedFilter(format!(
                            "{} dimension(s) '{names}' but {} value(s)",
                            dims.len(),
                            values.len()
                        )))
                    }
                    Some(values) => dims
                        .into_iter()
                        .zip(values.iter().cloned().map(Some))
                        .collect(),
                }
            }
        };

        let global_dimension = match self.global_dimension {
            Some((name, value)) => Some((Dimension::parse(&name)?, value)),
            None => None,
        };

        if let Some(cond) = &self.closed_condition {
            if cond.values.is_empty() {
                return Err(Error::MalformedFilter(
                    "closed condition needs at least one value".into(),
                ));
            }
        }

        Ok(FilterSpec {
            period,
            startdate: self.startdate,
            enddate: self.enddate,
            selection,
            limit: self.limit,
            exclude_actors: self.exclude_actors,
            exclude_organizations: self.exclude_organizations,
            global_dimension,
            closed_condition: self.closed_condition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn builder() -> FilterSpecBuilder {
        FilterSpec::builder(date(2025, 1, 1), date(2025, 4, 1))
    }

    #[test]
    fn test_build_defaults() {
        let f = builder().build().unwrap();
        assert_eq!(f.period(), Period::Month);
        assert!(f.selection().is_empty());
        assert!(!f.is_group_all());
        assert_eq!(f.window_days(), 90);
    }

    #[test]
    fn test_rejects_empty_window() {
        let err = FilterSpec::builder(date(2025, 1, 1), date(2025, 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedFilter(_)));
    }

    #[test]
    fn test_rejects_unknown_period() {
        let err = builder().period_name("hourly").build().unwrap_err();
        assert!(matches!(err, Error::MalformedFilter(_)));
    }

    #[test]
    fn test_compound_dimension_binds_positionally() {
        let f = builder()
            .dimension("company,country", &["Acme", "Spain"])
            .build()
            .unwrap();
        assert_eq!(
            f.bound_dimensions(),
            vec![(Dimension::Company, "Acme"), (Dimension::Country, "Spain")]
        );
        assert!(!f.is_group_all());
    }

    #[test]
    fn test_arity_mismatch_is_malformed() {
        let err = builder()
            .dimension("company,country", &["Acme"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedFilter(_)));
    }

    #[test]
    fn test_group_all_requires_single_dimension() {
        let f = builder().group_by("repository").build().unwrap();
        assert_eq!(f.group_dimension(), Some(Dimension::Repository));

        let err = builder().group_by("company,country").build().unwrap_err();
        assert!(matches!(err, Error::MalformedFilter(_)));
    }

    #[test]
    fn test_unknown_dimension() {
        let err = builder().group_by("galaxy").build().unwrap_err();
        assert!(matches!(err, Error::UnsupportedDimension { .. }));
    }

    #[test]
    fn test_global_dimension_is_bound_last() {
        let f = builder()
            .group_by("company")
            .global_dimension("project", "eclipse")
            .build()
            .unwrap();
        assert!(f.is_group_all());
        assert_eq!(f.bound_dimensions(), vec![(Dimension::Project, "eclipse")]);
    }

    #[test]
    fn test_with_date_range_returns_new_instance() {
        let f = builder().dimension("repository", &["core"]).build().unwrap();
        let g = f.with_date_range(date(2024, 1, 1), date(2024, 2, 1)).unwrap();
        assert_eq!(f.startdate(), date(2025, 1, 1));
        assert_eq!(g.startdate(), date(2024, 1, 1));
        assert_eq!(g.selection(), f.selection());
        assert!(f.with_date_range(date(2024, 2, 1), date(2024, 1, 1)).is_err());
    }

    #[test]
    fn test_assignments() {
        let f = builder()
            .assignments(&["repository=core", "company = Acme Corp"])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            f.bound_dimensions(),
            vec![(Dimension::Repository, "core"), (Dimension::Company, "Acme Corp")]
        );

        let f = builder().assignments(&["org=*"]).unwrap().build().unwrap();
        assert_eq!(f.group_dimension(), Some(Dimension::Company));

        assert!(builder().assignments(&["org=*", "repo=core"]).is_err());
        assert!(matches!(parse_assignment("repository"), Err(Error::MalformedFilter(_))));
        assert!(matches!(parse_assignment("planet=mars"), Err(Error::UnsupportedDimension { .. })));
    }
}
