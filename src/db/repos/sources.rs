use rusqlite::{params, Connection, Row};

use crate::db::models::JobSource;
use crate::error::AppError;

/// Only auto-create job_sources rows for known adapters — prevents
/// untrusted source names from polluting the table.
pub const KNOWN_SOURCE_NAMES: [&str; 4] = ["Adzuna", "RemoteOK", "TheMuse", "USAJobs"];

fn row_to_source(row: &Row) -> rusqlite::Result<JobSource> {
    Ok(JobSource {
        id: row.get("id")?,
        source_name: row.get("source_name")?,
        source_type: row.get("source_type")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

pub fn get_by_name(conn: &Connection, source_name: &str) -> Result<Option<JobSource>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM job_sources WHERE source_name = ?1")?;
    let mut rows = stmt.query_map(params![source_name], row_to_source)?;
    Ok(rows.next().transpose()?)
}

/// Look up or create a job source by name. Returns None for names outside
/// the allow-list.
pub fn resolve_source_id(conn: &Connection, source_name: &str) -> Result<Option<String>, AppError> {
    if let Some(source) = get_by_name(conn, source_name)? {
        return Ok(Some(source.id));
    }

    if !KNOWN_SOURCE_NAMES.contains(&source_name) {
        tracing::warn!(source = %source_name, "Unknown source name, cannot auto-create");
        return Ok(None);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO job_sources (id, source_name, source_type, description, created_at)
         VALUES (?1, ?2, 'API', ?3, ?4)",
        params![id, source_name, format!("Jobs from {source_name}"), now],
    )?;
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_resolve_creates_known_source_once() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();

        let first = resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        let second = resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_rejects_unknown_source() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();

        assert!(resolve_source_id(&conn, "SketchyBoard").unwrap().is_none());
        assert!(get_by_name(&conn, "SketchyBoard").unwrap().is_none());
    }
}
