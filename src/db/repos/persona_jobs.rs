//! Per-user persona ↔ job link repository.
//!
//! Every read that accepts a user_id joins through personas to enforce
//! tenant isolation; an id owned by another user behaves like a missing id.

use rusqlite::{params, Connection, Row};

use crate::db::models::{
    CreatePersonaJob, PersonaJob, UpdatePersonaJob, STATUS_DISCOVERED, STATUS_DISMISSED,
};
use crate::error::AppError;

fn row_to_persona_job(row: &Row) -> rusqlite::Result<PersonaJob> {
    let failed: Option<String> = row.get("failed_non_negotiables")?;
    let details: Option<String> = row.get("score_details")?;
    Ok(PersonaJob {
        id: row.get("id")?,
        persona_id: row.get("persona_id")?,
        job_posting_id: row.get("job_posting_id")?,
        discovery_method: row.get("discovery_method")?,
        discovered_at: row.get("discovered_at")?,
        status: row.get("status")?,
        is_favorite: row.get::<_, i64>("is_favorite")? != 0,
        fit_score: row.get("fit_score")?,
        stretch_score: row.get("stretch_score")?,
        failed_non_negotiables: failed
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        score_details: details.and_then(|s| serde_json::from_str(&s).ok()),
        scored_at: row.get("scored_at")?,
        dismissed_at: row.get("dismissed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_by_id(
    conn: &Connection,
    id: &str,
    user_id: &str,
) -> Result<Option<PersonaJob>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT pj.* FROM persona_jobs pj
         JOIN personas p ON pj.persona_id = p.id
         WHERE pj.id = ?1 AND p.user_id = ?2",
    )?;
    let mut rows = stmt.query_map(params![id, user_id], row_to_persona_job)?;
    Ok(rows.next().transpose()?)
}

/// All links for a user across personas, newest discovery first.
pub fn get_all_for_user(conn: &Connection, user_id: &str) -> Result<Vec<PersonaJob>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT pj.* FROM persona_jobs pj
         JOIN personas p ON pj.persona_id = p.id
         WHERE p.user_id = ?1
         ORDER BY pj.discovered_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_persona_job)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_for_persona(
    conn: &Connection,
    persona_id: &str,
    user_id: &str,
) -> Result<Vec<PersonaJob>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT pj.* FROM persona_jobs pj
         JOIN personas p ON pj.persona_id = p.id
         WHERE pj.persona_id = ?1 AND p.user_id = ?2
         ORDER BY pj.discovered_at DESC",
    )?;
    let rows = stmt.query_map(params![persona_id, user_id], row_to_persona_job)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_discovered_for_persona(
    conn: &Connection,
    persona_id: &str,
    user_id: &str,
) -> Result<Vec<PersonaJob>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT pj.* FROM persona_jobs pj
         JOIN personas p ON pj.persona_id = p.id
         WHERE pj.persona_id = ?1 AND p.user_id = ?2 AND pj.status = ?3
         ORDER BY pj.discovered_at DESC",
    )?;
    let rows = stmt.query_map(
        params![persona_id, user_id, STATUS_DISCOVERED],
        row_to_persona_job,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Link lookup by (persona, job). User-facing callers pass `Some(user_id)`
/// to verify ownership; system-level callers (dedup, surfacing) pass None.
pub fn get_by_persona_and_job(
    conn: &Connection,
    persona_id: &str,
    job_posting_id: &str,
    user_id: Option<&str>,
) -> Result<Option<PersonaJob>, AppError> {
    match user_id {
        Some(uid) => {
            let mut stmt = conn.prepare(
                "SELECT pj.* FROM persona_jobs pj
                 JOIN personas p ON pj.persona_id = p.id
                 WHERE pj.persona_id = ?1 AND pj.job_posting_id = ?2 AND p.user_id = ?3",
            )?;
            let mut rows =
                stmt.query_map(params![persona_id, job_posting_id, uid], row_to_persona_job)?;
            Ok(rows.next().transpose()?)
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM persona_jobs WHERE persona_id = ?1 AND job_posting_id = ?2",
            )?;
            let mut rows = stmt.query_map(params![persona_id, job_posting_id], row_to_persona_job)?;
            Ok(rows.next().transpose()?)
        }
    }
}

/// Persona ids already linked to a job (surfacing skip-list).
pub fn get_persona_ids_for_job(
    conn: &Connection,
    job_posting_id: &str,
) -> Result<std::collections::HashSet<String>, AppError> {
    let mut stmt = conn.prepare("SELECT persona_id FROM persona_jobs WHERE job_posting_id = ?1")?;
    let rows = stmt.query_map(params![job_posting_id], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Create a link. With `Some(user_id)` the persona must belong to that user;
/// returns Ok(None) when it does not. Raises a UNIQUE violation if the
/// (persona, job) pair is already linked — callers that can race wrap this
/// in a savepoint.
pub fn create(
    conn: &Connection,
    input: &CreatePersonaJob,
    user_id: Option<&str>,
) -> Result<Option<PersonaJob>, AppError> {
    if let Some(uid) = user_id {
        if !crate::db::repos::personas::is_owned_by(conn, &input.persona_id, uid)? {
            return Ok(None);
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO persona_jobs
         (id, persona_id, job_posting_id, discovery_method, discovered_at, status,
          is_favorite, fit_score, stretch_score, failed_non_negotiables, score_details,
          scored_at, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?13)",
        params![
            id,
            input.persona_id,
            input.job_posting_id,
            input.discovery_method,
            now,
            input.status.clone().unwrap_or_else(|| STATUS_DISCOVERED.into()),
            input.is_favorite.unwrap_or(false) as i64,
            input.fit_score,
            input.stretch_score,
            input
                .failed_non_negotiables
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            input
                .score_details
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            input.scored_at,
            now,
        ],
    )?;

    get_by_persona_and_job(conn, &input.persona_id, &input.job_posting_id, None)
}

/// Update user-state fields, scoped to user. A transition to Dismissed sets
/// dismissed_at in the same statement unless the caller provided one.
pub fn update(
    conn: &Connection,
    id: &str,
    user_id: &str,
    mut input: UpdatePersonaJob,
) -> Result<Option<PersonaJob>, AppError> {
    if get_by_id(conn, id, user_id)?.is_none() {
        return Ok(None);
    }

    if input.status.as_deref() == Some(STATUS_DISMISSED) && input.dismissed_at.is_none() {
        input.dismissed_at = Some(Some(chrono::Utc::now().to_rfc3339()));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut sets: Vec<String> = vec!["updated_at = ?1".into()];
    let mut param_idx = 2u32;

    push_field!(input.status, "status", sets, param_idx);
    push_field!(input.is_favorite, "is_favorite", sets, param_idx);
    push_field!(input.fit_score, "fit_score", sets, param_idx);
    push_field!(input.stretch_score, "stretch_score", sets, param_idx);
    push_field!(input.failed_non_negotiables, "failed_non_negotiables", sets, param_idx);
    push_field!(input.score_details, "score_details", sets, param_idx);
    push_field!(input.scored_at, "scored_at", sets, param_idx);
    push_field!(input.dismissed_at, "dismissed_at", sets, param_idx);

    let sql = format!(
        "UPDATE persona_jobs SET {} WHERE id = ?{}",
        sets.join(", "),
        param_idx
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(now)];
    if let Some(ref v) = input.status { param_values.push(Box::new(v.clone())); }
    if let Some(v) = input.is_favorite { param_values.push(Box::new(v as i64)); }
    if let Some(ref v) = input.fit_score { param_values.push(Box::new(*v)); }
    if let Some(ref v) = input.stretch_score { param_values.push(Box::new(*v)); }
    if let Some(ref v) = input.failed_non_negotiables {
        param_values.push(Box::new(serde_json::to_string(v)?));
    }
    if let Some(ref v) = input.score_details {
        param_values.push(Box::new(serde_json::to_string(v)?));
    }
    if let Some(ref v) = input.scored_at { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.dismissed_at { param_values.push(Box::new(v.clone())); }
    param_values.push(Box::new(id.to_string()));

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    conn.execute(&sql, params_ref.as_slice())?;

    get_by_id(conn, id, user_id)
}

fn bulk_placeholders(count: usize, offset: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + offset + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bulk status update, filtered by ownership. Returns the affected count.
pub fn bulk_update_status(
    conn: &Connection,
    ids: &[String],
    user_id: &str,
    status: &str,
) -> Result<usize, AppError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let now = chrono::Utc::now().to_rfc3339();
    let dismissed_at = (status == STATUS_DISMISSED).then(|| now.clone());

    // ?1 = status, ?2 = dismissed_at, ?3 = updated_at, ?4 = user_id, ids after.
    let sql = format!(
        "UPDATE persona_jobs
         SET status = ?1,
             dismissed_at = CASE WHEN ?2 IS NOT NULL THEN ?2 ELSE dismissed_at END,
             updated_at = ?3
         WHERE id IN ({})
           AND persona_id IN (SELECT id FROM personas WHERE user_id = ?4)",
        bulk_placeholders(ids.len(), 4)
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(status.to_string()),
        Box::new(dismissed_at),
        Box::new(now),
        Box::new(user_id.to_string()),
    ];
    for id in ids {
        param_values.push(Box::new(id.clone()));
    }
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    Ok(conn.execute(&sql, params_ref.as_slice())?)
}

/// Bulk favorite toggle, filtered by ownership. Returns the affected count.
pub fn bulk_update_favorite(
    conn: &Connection,
    ids: &[String],
    user_id: &str,
    is_favorite: bool,
) -> Result<usize, AppError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let now = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "UPDATE persona_jobs
         SET is_favorite = ?1, updated_at = ?2
         WHERE id IN ({})
           AND persona_id IN (SELECT id FROM personas WHERE user_id = ?3)",
        bulk_placeholders(ids.len(), 3)
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(is_favorite as i64),
        Box::new(now),
        Box::new(user_id.to_string()),
    ];
    for id in ids {
        param_values.push(Box::new(id.clone()));
    }
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    Ok(conn.execute(&sql, params_ref.as_slice())?)
}
