//! Base resumes, tailored variants, cover letters, and applications.

use rusqlite::{params, Connection, Row};

use crate::db::models::{Application, BaseResume, CoverLetter, JobVariant};
use crate::error::AppError;

fn row_to_base_resume(row: &Row) -> rusqlite::Result<BaseResume> {
    Ok(BaseResume {
        id: row.get("id")?,
        persona_id: row.get("persona_id")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        is_primary: row.get::<_, i64>("is_primary")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_variant(row: &Row) -> rusqlite::Result<JobVariant> {
    let order: String = row.get("job_bullet_order")?;
    let bullets: Option<String> = row.get("bullets_snapshot")?;
    Ok(JobVariant {
        id: row.get("id")?,
        base_resume_id: row.get("base_resume_id")?,
        persona_id: row.get("persona_id")?,
        job_posting_id: row.get("job_posting_id")?,
        status: row.get("status")?,
        modified_summary: row.get("modified_summary")?,
        job_bullet_order: serde_json::from_str(&order).unwrap_or_default(),
        summary_snapshot: row.get("summary_snapshot")?,
        bullets_snapshot: bullets.and_then(|s| serde_json::from_str(&s).ok()),
        archived_at: row.get("archived_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_cover_letter(row: &Row) -> rusqlite::Result<CoverLetter> {
    Ok(CoverLetter {
        id: row.get("id")?,
        persona_id: row.get("persona_id")?,
        job_posting_id: row.get("job_posting_id")?,
        job_variant_id: row.get("job_variant_id")?,
        content: row.get("content")?,
        word_count: row.get("word_count")?,
        status: row.get("status")?,
        archived_at: row.get("archived_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get("id")?,
        persona_id: row.get("persona_id")?,
        job_posting_id: row.get("job_posting_id")?,
        persona_job_id: row.get("persona_job_id")?,
        status: row.get("status")?,
        is_pinned: row.get::<_, i64>("is_pinned")? != 0,
        archived_at: row.get("archived_at")?,
        description_snapshot: row.get("description_snapshot")?,
        submitted_resume_pdf_id: row.get("submitted_resume_pdf_id")?,
        applied_at: row.get("applied_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

// ============================================================================
// Base resumes
// ============================================================================

pub fn create_base_resume(
    conn: &Connection,
    persona_id: &str,
    title: &str,
    summary: &str,
    is_primary: bool,
) -> Result<BaseResume, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO base_resumes (id, persona_id, title, summary, is_primary, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, persona_id, title, summary, is_primary as i64, now],
    )?;
    conn.query_row("SELECT * FROM base_resumes WHERE id = ?1", params![id], row_to_base_resume)
        .map_err(AppError::Database)
}

/// The persona's primary resume, falling back to the newest one.
pub fn get_primary_base_resume(
    conn: &Connection,
    persona_id: &str,
) -> Result<Option<BaseResume>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM base_resumes WHERE persona_id = ?1
         ORDER BY is_primary DESC, created_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![persona_id], row_to_base_resume)?;
    Ok(rows.next().transpose()?)
}

// ============================================================================
// Job variants
// ============================================================================

pub fn get_variant_for_persona_and_job(
    conn: &Connection,
    persona_id: &str,
    job_posting_id: &str,
) -> Result<Option<JobVariant>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM job_variants
         WHERE persona_id = ?1 AND job_posting_id = ?2 AND status != 'Archived'
         ORDER BY created_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![persona_id, job_posting_id], row_to_variant)?;
    Ok(rows.next().transpose()?)
}

/// Insert a Draft variant. `job_bullet_order` must be populated; snapshots
/// stay NULL until approval.
pub fn create_draft_variant(
    conn: &Connection,
    base_resume_id: &str,
    persona_id: &str,
    job_posting_id: &str,
    modified_summary: Option<&str>,
    job_bullet_order: &[String],
) -> Result<JobVariant, AppError> {
    if job_bullet_order.is_empty() {
        return Err(AppError::Validation("job_bullet_order cannot be empty".into()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO job_variants
         (id, base_resume_id, persona_id, job_posting_id, status, modified_summary,
          job_bullet_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'Draft', ?5, ?6, ?7, ?7)",
        params![
            id,
            base_resume_id,
            persona_id,
            job_posting_id,
            modified_summary,
            serde_json::to_string(job_bullet_order)?,
            now,
        ],
    )?;
    conn.query_row("SELECT * FROM job_variants WHERE id = ?1", params![id], row_to_variant)
        .map_err(AppError::Database)
}

// ============================================================================
// Cover letters
// ============================================================================

pub fn create_draft_cover_letter(
    conn: &Connection,
    persona_id: &str,
    job_posting_id: &str,
    job_variant_id: Option<&str>,
    content: &str,
) -> Result<CoverLetter, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let word_count = content.split_whitespace().count() as i64;
    conn.execute(
        "INSERT INTO cover_letters
         (id, persona_id, job_posting_id, job_variant_id, content, word_count,
          status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'Draft', ?7, ?7)",
        params![id, persona_id, job_posting_id, job_variant_id, content, word_count, now],
    )?;
    conn.query_row("SELECT * FROM cover_letters WHERE id = ?1", params![id], row_to_cover_letter)
        .map_err(AppError::Database)
}

// ============================================================================
// Applications
// ============================================================================

/// Create an application, snapshotting the job description at apply time.
pub fn create_application(
    conn: &Connection,
    persona_id: &str,
    job_posting_id: &str,
    persona_job_id: Option<&str>,
) -> Result<Application, AppError> {
    let snapshot: String = conn
        .query_row(
            "SELECT description FROM job_postings WHERE id = ?1",
            params![job_posting_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound(format!("Job posting {job_posting_id}"))
            }
            other => AppError::Database(other),
        })?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO applications
         (id, persona_id, job_posting_id, persona_job_id, status, description_snapshot,
          applied_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'Applied', ?5, ?6, ?6, ?6)",
        params![id, persona_id, job_posting_id, persona_job_id, snapshot, now],
    )?;
    conn.query_row("SELECT * FROM applications WHERE id = ?1", params![id], row_to_application)
        .map_err(AppError::Database)
}

pub fn set_application_pinned(
    conn: &Connection,
    id: &str,
    is_pinned: bool,
) -> Result<bool, AppError> {
    let rows = conn.execute(
        "UPDATE applications SET is_pinned = ?1, updated_at = ?2 WHERE id = ?3",
        params![is_pinned as i64, chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(rows > 0)
}

pub fn archive_application(conn: &Connection, id: &str) -> Result<bool, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE applications SET archived_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(rows > 0)
}

// ============================================================================
// Submitted PDFs
// ============================================================================

pub fn insert_submitted_pdf(
    conn: &Connection,
    application_id: Option<&str>,
    kind: &str,
    content: &[u8],
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO submitted_pdfs (id, application_id, kind, content, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, application_id, kind, content, now],
    )?;
    Ok(id)
}
