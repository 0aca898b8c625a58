use rusqlite::{params, Connection, OptionalExtension};

use crate::adapter::DataSource;
use crate::identity::EnrollmentKind;

// ── Identities ─────────────────────────────────────────────────────

/// Link raw actor `id` of `source` to canonical identity `uuid`, creating the
/// identity on first sight.
pub fn add_identity(
    conn: &Connection,
    id: i64,
    source: DataSource,
    uuid: &str,
    name: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO unique_identities (uuid, name) VALUES (?1, ?2)
         ON CONFLICT(uuid) DO NOTHING",
        params![uuid, name],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO identities (id, data_source, uuid, name)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, source.name(), uuid, name],
    )?;
    Ok(())
}

pub fn set_bot(conn: &Connection, uuid: &str, is_bot: bool) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE unique_identities SET is_bot = ?2 WHERE uuid = ?1",
        params![uuid, is_bot],
    )?;
    Ok(())
}

/// Canonical identities flagged as bots.
pub fn bot_uuids(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT uuid FROM unique_identities WHERE is_bot = 1 ORDER BY uuid")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Id of the organization, country or domain called `name`, created if new.
pub fn upsert_named(
    conn: &Connection,
    kind: EnrollmentKind,
    name: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        &format!("INSERT INTO {} (name) VALUES (?1) ON CONFLICT(name) DO NOTHING", kind.table()),
        params![name],
    )?;
    conn.query_row(
        &format!("SELECT id FROM {} WHERE name = ?1", kind.table()),
        params![name],
        |row| row.get(0),
    )
}

/// Enroll `uuid` in `name` for `[start, end)`. Open bounds take the table
/// defaults.
pub fn add_enrollment(
    conn: &Connection,
    uuid: &str,
    kind: EnrollmentKind,
    name: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    let target = upsert_named(conn, kind, name)?;
    conn.execute(
        "INSERT INTO enrollments (uuid, kind, target_id, start_date, end_date)
         VALUES (?1, ?2, ?3, COALESCE(?4, '1900-01-01 00:00:00'), COALESCE(?5, '2100-01-01 00:00:00'))",
        params![uuid, kind.as_str(), target, start, end],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Projects ───────────────────────────────────────────────────────

pub fn add_project(conn: &Connection, project_id: &str, title: Option<&str>) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO projects (project_id, title) VALUES (?1, ?2)
         ON CONFLICT(project_id) DO UPDATE SET title = COALESCE(excluded.title, projects.title)",
        params![project_id, title],
    )?;
    Ok(())
}

pub fn add_subproject(conn: &Connection, parent: &str, child: &str) -> Result<(), rusqlite::Error> {
    add_project(conn, parent, None)?;
    add_project(conn, child, None)?;
    conn.execute(
        "INSERT OR IGNORE INTO project_children (project_id, subproject_id) VALUES (?1, ?2)",
        params![parent, child],
    )?;
    Ok(())
}

pub fn add_project_repository(
    conn: &Connection,
    project_id: &str,
    source: DataSource,
    repository_id: i64,
) -> Result<(), rusqlite::Error> {
    add_project(conn, project_id, None)?;
    conn.execute(
        "INSERT OR IGNORE INTO project_repositories (project_id, data_source, repository_id)
         VALUES (?1, ?2, ?3)",
        params![project_id, source.name(), repository_id],
    )?;
    Ok(())
}

// ── Source code management ─────────────────────────────────────────

pub fn upsert_scm_repository(
    conn: &Connection,
    name: &str,
    uri: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO scm_repositories (name, uri) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET uri = COALESCE(excluded.uri, scm_repositories.uri)",
        params![name, uri],
    )?;
    conn.query_row(
        "SELECT id FROM scm_repositories WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
}

pub fn insert_commit(
    conn: &Connection,
    rev: &str,
    repository_id: i64,
    author_id: Option<i64>,
    committer_id: Option<i64>,
    date: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO scm_commits (rev, repository_id, author_id, committer_id, author_date, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![rev, repository_id, author_id, committer_id, date],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Issue tracking ─────────────────────────────────────────────────

pub fn upsert_tracker(conn: &Connection, url: &str) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO its_trackers (url) VALUES (?1) ON CONFLICT(url) DO NOTHING",
        params![url],
    )?;
    conn.query_row(
        "SELECT id FROM its_trackers WHERE url = ?1",
        params![url],
        |row| row.get(0),
    )
}

pub fn insert_issue(
    conn: &Connection,
    tracker_id: i64,
    issue: &str,
    submitted_by: Option<i64>,
    submitted_on: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO its_issues (tracker_id, issue, submitted_by, submitted_on)
         VALUES (?1, ?2, ?3, ?4)",
        params![tracker_id, issue, submitted_by, submitted_on],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record that `field` of an issue changed to `new_value`. The issue's
/// `status` column follows status changes.
pub fn insert_change(
    conn: &Connection,
    issue_id: i64,
    field: &str,
    new_value: &str,
    changed_by: Option<i64>,
    changed_on: &str,
) -> Result<i64, rusqlite::Error> {
    let old_value: Option<String> = if field == "status" {
        conn.query_row(
            "SELECT status FROM its_issues WHERE id = ?1",
            params![issue_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten()
    } else {
        None
    };
    conn.execute(
        "INSERT INTO its_changes (issue_id, field, old_value, new_value, changed_by, changed_on)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![issue_id, field, old_value, new_value, changed_by, changed_on],
    )?;
    let id = conn.last_insert_rowid();
    if field == "status" {
        conn.execute(
            "UPDATE its_issues SET status = ?2 WHERE id = ?1",
            params![issue_id, new_value],
        )?;
    }
    Ok(id)
}

// ── Status ─────────────────────────────────────────────────────────

const COUNTED_TABLES: [&str; 9] = [
    "unique_identities",
    "identities",
    "enrollments",
    "projects",
    "scm_repositories",
    "scm_commits",
    "its_trackers",
    "its_issues",
    "its_changes",
];

/// Row count per warehouse table.
pub fn table_counts(conn: &Connection) -> Result<Vec<(String, i64)>, rusqlite::Error> {
    COUNTED_TABLES
        .iter()
        .map(|table| {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok::<_, rusqlite::Error>((table.to_string(), n))
        })
        .collect()
}

// ── App Config ─────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}
