//! Temporal identity resolution.
//!
//! Raw per-source actor ids are joined to canonical identities through the
//! `identities` table (alias `pid`). Organization, country and domain
//! attribution goes through `enrollments`, and only counts while
//! `start_date <= event_time < end_date`. Every data source builds its people
//! and affiliation joins from the functions here, so the window predicate is
//! written exactly once.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite::types::Value;
use serde::Serialize;

use crate::adapter::{DataSource, EventContext};
use crate::date_util::sql_timestamp;
use crate::error::Result;
use crate::filter::Dimension;
use crate::query::fragment::{placeholders, Join, Predicate, SqlFragments};

/// Canonical identity column once [`identity_join`] is applied.
pub const UUID_COLUMN: &str = "pid.uuid";

/// Expression counting distinct people behind the event's actor column.
pub const PEOPLE_COUNT: &str = "COUNT(DISTINCT pid.uuid)";

/// What an enrollment attributes an identity to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentKind {
    Organization,
    Country,
    Domain,
}

impl EnrollmentKind {
    pub fn for_dimension(dim: Dimension) -> Option<Self> {
        match dim {
            Dimension::Company => Some(EnrollmentKind::Organization),
            Dimension::Country => Some(EnrollmentKind::Country),
            Dimension::Domain => Some(EnrollmentKind::Domain),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentKind::Organization => "organization",
            EnrollmentKind::Country => "country",
            EnrollmentKind::Domain => "domain",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EnrollmentKind::Organization => "organizations",
            EnrollmentKind::Country => "countries",
            EnrollmentKind::Domain => "domains",
        }
    }

    fn alias(&self) -> &'static str {
        match self {
            EnrollmentKind::Organization => "org",
            EnrollmentKind::Country => "cou",
            EnrollmentKind::Domain => "dom",
        }
    }

    fn enrollment_alias(&self) -> &'static str {
        match self {
            EnrollmentKind::Organization => "enr_org",
            EnrollmentKind::Country => "enr_cou",
            EnrollmentKind::Domain => "enr_dom",
        }
    }

    /// Name column of the attributed entity, e.g. `org.name`.
    pub fn name_column(&self) -> String {
        format!("{}.name", self.alias())
    }
}

/// Join from the event's actor to its canonical identity.
pub fn identity_join(event: &EventContext) -> Join {
    Join::new("identities pid", format!("pid.id = {}", event.actor))
}

fn window_condition(alias: &str, date_column: &str) -> String {
    format!("{date_column} >= {alias}.start_date AND {date_column} < {alias}.end_date")
}

/// Joins attributing each event to the entities its actor was enrolled in at
/// the event's timestamp.
pub fn affiliation_fragments(event: &EventContext, kind: EnrollmentKind) -> SqlFragments {
    let enr = kind.enrollment_alias();
    SqlFragments::new()
        .join(identity_join(event))
        .join(Join::new(
            format!("enrollments {enr}"),
            format!(
                "{enr}.uuid = pid.uuid AND {enr}.kind = '{}' AND {}",
                kind.as_str(),
                window_condition(enr, event.date)
            ),
        ))
        .join(Join::new(
            format!("{} {}", kind.table(), kind.alias()),
            format!("{}.id = {enr}.target_id", kind.alias()),
        ))
}

/// Drop events by the given canonical identities. Events whose actor is
/// missing or has no identity link are kept.
pub fn exclude_actors(event: &EventContext, uuids: &[String]) -> Option<SqlFragments> {
    if uuids.is_empty() {
        return None;
    }
    let sql = format!(
        "({actor} IS NULL OR {actor} NOT IN (SELECT xi.id FROM identities xi WHERE xi.uuid IN ({})))",
        placeholders(uuids.len()),
        actor = event.actor,
    );
    let values = uuids.iter().cloned().map(Value::from).collect();
    Some(SqlFragments::new().filter(Predicate::with_params(sql, values)))
}

/// Drop events whose actor was enrolled in one of `names` at event time.
/// Actors with no enrollment or no identity link are kept.
pub fn exclude_organizations(event: &EventContext, names: &[String]) -> Option<SqlFragments> {
    if names.is_empty() {
        return None;
    }
    let sql = format!(
        "NOT EXISTS (SELECT 1 FROM identities xi \
         JOIN enrollments xe ON xe.uuid = xi.uuid \
         JOIN organizations xo ON xo.id = xe.target_id \
         WHERE xi.id = {} AND xe.kind = 'organization' AND {} \
         AND xo.name IN ({}))",
        event.actor,
        window_condition("xe", event.date),
        placeholders(names.len())
    );
    let values = names.iter().cloned().map(Value::from).collect();
    Some(SqlFragments::new().filter(Predicate::with_params(sql, values)))
}

/// Canonical identity of a raw actor.
pub fn resolve_uuid(conn: &Connection, source: DataSource, actor_id: i64) -> Result<Option<String>> {
    let uuid = conn
        .query_row(
            "SELECT uuid FROM identities WHERE id = ?1 AND data_source = ?2",
            params![actor_id, source.name()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(uuid)
}

/// Names `uuid` is attributed to at instant `at`, sorted.
pub fn affiliations_at(
    conn: &Connection,
    uuid: &str,
    kind: EnrollmentKind,
    at: NaiveDateTime,
) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT t.name FROM enrollments e
         JOIN {} t ON t.id = e.target_id
         WHERE e.uuid = ?1 AND e.kind = ?2 AND ?3 >= e.start_date AND ?3 < e.end_date
         ORDER BY t.name",
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![uuid, kind.as_str(), sql_timestamp(at)], |row| {
        row.get(0)
    })?;
    let names: std::result::Result<Vec<String>, _> = rows.collect();
    Ok(names?)
}
