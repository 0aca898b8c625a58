use super::{Metric, MetricDefinition};
use crate::adapter::{DataSource, EventContext};
use crate::error::Result;
use crate::filter::{Dimension, FilterSpec};
use crate::identity::{identity_join, PEOPLE_COUNT};
use crate::query::fragment::SqlFragments;

/// Number of commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Commits;

impl Metric for Commits {
    fn id(&self) -> &'static str {
        "commits"
    }

    fn name(&self) -> &'static str {
        "Commits"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Scm
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        Ok(MetricDefinition::new(
            EventContext::scm_commits(),
            self.id(),
            "COUNT(DISTINCT s.id)",
        ))
    }
}

/// Distinct people authoring commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authors;

impl Metric for Authors {
    fn id(&self) -> &'static str {
        "authors"
    }

    fn name(&self) -> &'static str {
        "Authors"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Scm
    }

    fn list_dimension(&self) -> Dimension {
        Dimension::Person
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        let event = EventContext::scm_commits();
        let base = SqlFragments::new().join(identity_join(&event));
        Ok(MetricDefinition::new(event, self.id(), PEOPLE_COUNT).with_base(base))
    }
}

/// Distinct people committing, which differs from authoring for patches
/// applied on someone else's behalf.
#[derive(Debug, Clone, Copy, Default)]
pub struct Committers;

impl Metric for Committers {
    fn id(&self) -> &'static str {
        "committers"
    }

    fn name(&self) -> &'static str {
        "Committers"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Scm
    }

    fn list_dimension(&self) -> Dimension {
        Dimension::Person
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        let event = EventContext::scm_commits_by_committer();
        let base = SqlFragments::new().join(identity_join(&event));
        Ok(MetricDefinition::new(event, self.id(), PEOPLE_COUNT).with_base(base))
    }
}

/// Repositories with at least one commit in the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Repositories;

impl Metric for Repositories {
    fn id(&self) -> &'static str {
        "repositories"
    }

    fn name(&self) -> &'static str {
        "Active repositories"
    }

    fn data_source(&self) -> DataSource {
        DataSource::Scm
    }

    fn list_dimension(&self) -> Dimension {
        Dimension::Company
    }

    fn definition(&self, _filter: &FilterSpec) -> Result<MetricDefinition> {
        Ok(MetricDefinition::new(
            EventContext::scm_commits(),
            self.id(),
            "COUNT(DISTINCT s.repository_id)",
        ))
    }
}
