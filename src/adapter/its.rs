use rusqlite::types::Value;
use rusqlite::Connection;

use super::{
    identity_group_key, identity_joins, identity_predicate, project_predicate, DataSource,
    DimensionAdapter, EventContext,
};
use crate::error::{Error, Result};
use crate::filter::{ClosedCondition, Dimension};
use crate::query::fragment::{placeholders, Join, Predicate, SqlFragments};

impl EventContext {
    /// Issues, attributed to their submitter at submission time.
    pub const fn its_opened() -> Self {
        Self {
            table: "its_issues i",
            actor: "i.submitted_by",
            date: "i.submitted_on",
            repository: "i.tracker_id",
        }
    }

    /// Issue changes, attributed to whoever made the change. Needs
    /// [`issue_join`] for the tracker column.
    pub const fn its_changes() -> Self {
        Self {
            table: "its_changes ch",
            actor: "ch.changed_by",
            date: "ch.changed_on",
            repository: "i.tracker_id",
        }
    }
}

/// Join from a change to its issue.
pub fn issue_join() -> Join {
    Join::new("its_issues i", "i.id = ch.issue_id")
}

/// Predicate selecting changes that close an issue.
pub fn closed_predicate(condition: &ClosedCondition) -> Predicate {
    let mut params = vec![Value::from(condition.field.clone())];
    params.extend(condition.values.iter().cloned().map(Value::from));
    Predicate::with_params(
        format!(
            "ch.field = ? AND ch.new_value IN ({})",
            placeholders(condition.values.len())
        ),
        params,
    )
}

/// Issue tracking: `its_issues` and `its_changes` over `its_trackers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItsAdapter;

impl DimensionAdapter for ItsAdapter {
    fn data_source(&self) -> DataSource {
        DataSource::Its
    }

    fn joins(&self, event: &EventContext, dim: Dimension) -> Result<SqlFragments> {
        match dim {
            Dimension::Repository => Ok(SqlFragments::new().join(Join::new(
                "its_trackers t",
                format!("t.id = {}", event.repository),
            ))),
            Dimension::Project => Ok(SqlFragments::new()),
            other => identity_joins(event, other)
                .ok_or_else(|| Error::unsupported(other, self.data_source())),
        }
    }

    fn predicate(
        &self,
        conn: &Connection,
        event: &EventContext,
        dim: Dimension,
        value: &str,
    ) -> Result<Predicate> {
        match dim {
            Dimension::Repository => Ok(Predicate::eq("t.url", value.to_string())),
            Dimension::Project => project_predicate(conn, DataSource::Its, event.repository, value),
            other => identity_predicate(other, value)
                .ok_or_else(|| Error::unsupported(other, self.data_source())),
        }
    }

    fn group_key(&self, dim: Dimension) -> Option<String> {
        match dim {
            Dimension::Repository => Some("t.url".to_string()),
            Dimension::Project => None,
            other => identity_group_key(other),
        }
    }
}
