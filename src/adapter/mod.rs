//! Per-data-source mapping from a dimension to the joins, predicates and
//! grouping key it needs.

pub mod its;
pub mod scm;

use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::filter::{Dimension, FilterSpec};
use crate::identity;
use crate::query::fragment::{Predicate, SqlFragments};

/// The data sources with an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Scm,
    Its,
}

impl DataSource {
    pub const ALL: [DataSource; 2] = [DataSource::Scm, DataSource::Its];

    pub fn name(&self) -> &'static str {
        match self {
            DataSource::Scm => "scm",
            DataSource::Its => "its",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "scm" | "git" => Ok(DataSource::Scm),
            "its" | "issues" => Ok(DataSource::Its),
            other => Err(Error::Config(format!("unknown data source: {other}"))),
        }
    }

    /// The adapter registered for this data source.
    pub fn adapter(&self) -> &'static dyn DimensionAdapter {
        match self {
            DataSource::Scm => &scm::ScmAdapter,
            DataSource::Its => &its::ItsAdapter,
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The event row a metric counts: its table (with alias) and the columns the
/// adapters hang dimensions on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub table: &'static str,
    pub actor: &'static str,
    pub date: &'static str,
    pub repository: &'static str,
}

pub trait DimensionAdapter: Send + Sync {
    fn data_source(&self) -> DataSource;

    /// Joins needed to reference `dim` from `event`.
    fn joins(&self, event: &EventContext, dim: Dimension) -> Result<SqlFragments>;

    /// Predicate restricting `dim` to `value`. Needs a connection because
    /// project filters expand to the subproject closure first.
    fn predicate(
        &self,
        conn: &Connection,
        event: &EventContext,
        dim: Dimension,
        value: &str,
    ) -> Result<Predicate>;

    /// Grouping expression for all-items mode, `None` when the dimension
    /// cannot be grouped on.
    fn group_key(&self, dim: Dimension) -> Option<String>;

    /// Joins plus, when `value` is given, the restricting predicate.
    fn fragments(
        &self,
        conn: &Connection,
        event: &EventContext,
        dim: Dimension,
        value: Option<&str>,
    ) -> Result<SqlFragments> {
        let mut out = self.joins(event, dim)?;
        if let Some(v) = value {
            out.add_predicate(self.predicate(conn, event, dim, v)?);
        }
        Ok(out)
    }

    /// Everything the filter restricts, independent of grouping: bound
    /// dimensions, the global dimension and actor/organization exclusions.
    fn filter_fragments(
        &self,
        conn: &Connection,
        event: &EventContext,
        filter: &FilterSpec,
    ) -> Result<SqlFragments> {
        let mut out = SqlFragments::new();
        for (dim, value) in filter.bound_dimensions() {
            out.merge(self.fragments(conn, event, dim, Some(value))?);
        }
        if let Some(f) = identity::exclude_actors(event, filter.exclude_actors()) {
            out.merge(f);
        }
        if let Some(f) = identity::exclude_organizations(event, filter.exclude_organizations()) {
            out.merge(f);
        }
        Ok(out)
    }
}

/// Joins and predicates shared by every adapter for identity-backed
/// dimensions. Returns `None` for dimensions the caller must handle.
pub(crate) fn identity_joins(event: &EventContext, dim: Dimension) -> Option<SqlFragments> {
    if dim == Dimension::Person {
        return Some(SqlFragments::new().join(identity::identity_join(event)));
    }
    identity::EnrollmentKind::for_dimension(dim).map(|kind| identity::affiliation_fragments(event, kind))
}

pub(crate) fn identity_predicate(dim: Dimension, value: &str) -> Option<Predicate> {
    if dim == Dimension::Person {
        return Some(Predicate::eq(identity::UUID_COLUMN, value.to_string()));
    }
    identity::EnrollmentKind::for_dimension(dim)
        .map(|kind| Predicate::eq(&kind.name_column(), value.to_string()))
}

pub(crate) fn identity_group_key(dim: Dimension) -> Option<String> {
    if dim == Dimension::Person {
        return Some(identity::UUID_COLUMN.to_string());
    }
    identity::EnrollmentKind::for_dimension(dim).map(|kind| kind.name_column())
}

/// `project_id` and all its transitive subprojects. The seed is always part of
/// the result, so a leaf project yields a single-id list.
pub fn project_closure(conn: &Connection, project_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE closure(id) AS (
            SELECT ?1
            UNION
            SELECT pc.subproject_id FROM project_children pc
            JOIN closure c ON pc.project_id = c.id
         )
         SELECT id FROM closure",
    )?;
    let rows = stmt.query_map([project_id], |row| row.get::<_, String>(0))?;
    let mut ids = vec![project_id.to_string()];
    for id in rows {
        let id = id?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    log::debug!("Project {project_id} expands to {} project(s)", ids.len());
    Ok(ids)
}

/// Restrict `repository_column` to repositories of the project closure.
pub(crate) fn project_predicate(
    conn: &Connection,
    source: DataSource,
    repository_column: &str,
    project_id: &str,
) -> Result<Predicate> {
    let ids = project_closure(conn, project_id)?;
    let sql = format!(
        "{repository_column} IN (SELECT pr.repository_id FROM project_repositories pr \
         WHERE pr.data_source = ? AND pr.project_id IN ({}))",
        crate::query::fragment::placeholders(ids.len())
    );
    let mut params = vec![Value::from(source.name().to_string())];
    params.extend(ids.into_iter().map(Value::from));
    Ok(Predicate::with_params(sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{migrate, repository};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_closure_of_leaf_is_single_id() {
        let conn = conn();
        assert_eq!(project_closure(&conn, "lonely").unwrap(), vec!["lonely"]);
    }

    #[test]
    fn test_closure_is_transitive() {
        let conn = conn();
        repository::add_subproject(&conn, "p", "c1").unwrap();
        repository::add_subproject(&conn, "p", "c2").unwrap();
        repository::add_subproject(&conn, "c1", "g1").unwrap();
        repository::add_subproject(&conn, "other", "x").unwrap();

        let mut ids = project_closure(&conn, "p").unwrap();
        assert_eq!(ids[0], "p");
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2", "g1", "p"]);
    }

    #[test]
    fn test_closure_survives_cycles() {
        let conn = conn();
        repository::add_subproject(&conn, "a", "b").unwrap();
        repository::add_subproject(&conn, "b", "a").unwrap();
        let mut ids = project_closure(&conn, "a").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_project_predicate_binds_every_id() {
        let conn = conn();
        repository::add_subproject(&conn, "p", "c").unwrap();
        let p = project_predicate(&conn, DataSource::Scm, "s.repository_id", "p").unwrap();
        assert!(p.sql.contains("pr.project_id IN (?, ?)"));
        assert_eq!(p.params.len(), 3);
    }

    #[test]
    fn test_registry_selects_adapter_by_source() {
        for source in DataSource::ALL {
            assert_eq!(source.adapter().data_source(), source);
        }
    }
}
