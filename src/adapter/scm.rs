use rusqlite::Connection;

use super::{
    identity_group_key, identity_joins, identity_predicate, project_predicate, DataSource,
    DimensionAdapter, EventContext,
};
use crate::error::{Error, Result};
use crate::filter::Dimension;
use crate::query::fragment::{Join, Predicate, SqlFragments};

impl EventContext {
    /// Commits, attributed to their author.
    pub const fn scm_commits() -> Self {
        Self {
            table: "scm_commits s",
            actor: "s.author_id",
            date: "s.date",
            repository: "s.repository_id",
        }
    }

    /// Commits, attributed to their committer.
    pub const fn scm_commits_by_committer() -> Self {
        Self {
            actor: "s.committer_id",
            ..Self::scm_commits()
        }
    }
}

/// Source code management: `scm_commits` over `scm_repositories`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScmAdapter;

impl DimensionAdapter for ScmAdapter {
    fn data_source(&self) -> DataSource {
        DataSource::Scm
    }

    fn joins(&self, event: &EventContext, dim: Dimension) -> Result<SqlFragments> {
        match dim {
            Dimension::Repository => Ok(SqlFragments::new().join(Join::new(
                "scm_repositories r",
                format!("r.id = {}", event.repository),
            ))),
            // Filtered through a subquery on the event's repository column.
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
            Dimension::Repository => Ok(Predicate::eq("r.name", value.to_string())),
            Dimension::Project => project_predicate(conn, DataSource::Scm, event.repository, value),
            other => identity_predicate(other, value)
                .ok_or_else(|| Error::unsupported(other, self.data_source())),
        }
    }

    fn group_key(&self, dim: Dimension) -> Option<String> {
        match dim {
            Dimension::Repository => Some("r.name".to_string()),
            Dimension::Project => None,
            other => identity_group_key(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{migrate, repository};

    #[test]
    fn test_every_dimension_has_fragments() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let event = EventContext::scm_commits();
        for dim in Dimension::ALL {
            let f = ScmAdapter.fragments(&conn, &event, dim, Some("x")).unwrap();
            assert_eq!(f.predicates().len(), 1, "{dim}");
        }
    }

    #[test]
    fn test_company_joins_through_author_enrollment() {
        let conn = Connection::open_in_memory().unwrap();
        let event = EventContext::scm_commits();
        let f = ScmAdapter
            .fragments(&conn, &event, Dimension::Company, Some("Acme"))
            .unwrap();
        let tables: Vec<&str> = f.joins().iter().map(|j| j.table.as_str()).collect();
        assert_eq!(tables, vec!["identities pid", "enrollments enr_org", "organizations org"]);
        assert_eq!(f.joins()[0].on, "pid.id = s.author_id");
        assert_eq!(f.predicates()[0].sql, "org.name = ?");
    }

    #[test]
    fn test_committer_context_changes_actor_only() {
        let event = EventContext::scm_commits_by_committer();
        let f = ScmAdapter.joins(&event, Dimension::Person).unwrap();
        assert_eq!(f.joins()[0].on, "pid.id = s.committer_id");
        assert_eq!(event.date, "s.date");
    }

    #[test]
    fn test_group_keys() {
        assert_eq!(ScmAdapter.group_key(Dimension::Repository).as_deref(), Some("r.name"));
        assert_eq!(ScmAdapter.group_key(Dimension::Company).as_deref(), Some("org.name"));
        assert_eq!(ScmAdapter.group_key(Dimension::Person).as_deref(), Some("pid.uuid"));
        assert_eq!(ScmAdapter.group_key(Dimension::Project), None);
    }

    #[test]
    fn test_project_predicate_uses_closure() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        repository::add_subproject(&conn, "parent", "child").unwrap();
        let event = EventContext::scm_commits();
        let p = ScmAdapter
            .predicate(&conn, &event, Dimension::Project, "parent")
            .unwrap();
        assert!(p.sql.starts_with("s.repository_id IN (SELECT"));
        assert_eq!(p.params.len(), 3);
    }
}
