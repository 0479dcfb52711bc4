//! Shared-pool job posting repository (Tier 0).
//!
//! WARNING — SYSTEM-ONLY: writes here have no user scoping and must only be
//! called from trusted internal code (dedup pipeline, surfacing worker,
//! orchestrator, admin tooling). Never wire them to a user-facing surface.

use rusqlite::{params, Connection, Row};

use crate::db::models::{AlsoFoundOn, CreateJobPosting, GhostSignals, JobPosting, UpdateJobPosting};
use crate::error::AppError;

fn row_to_job_posting(row: &Row) -> rusqlite::Result<JobPosting> {
    let also_found_on: Option<String> = row.get("also_found_on")?;
    let ghost_signals: Option<String> = row.get("ghost_signals")?;
    let previous_posting_ids: Option<String> = row.get("previous_posting_ids")?;

    Ok(JobPosting {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        external_id: row.get("external_id")?,
        also_found_on: AlsoFoundOn::parse(also_found_on.as_deref()),
        job_title: row.get("job_title")?,
        company_name: row.get("company_name")?,
        company_url: row.get("company_url")?,
        source_url: row.get("source_url")?,
        apply_url: row.get("apply_url")?,
        location: row.get("location")?,
        work_model: row.get("work_model")?,
        seniority_level: row.get("seniority_level")?,
        salary_min: row.get("salary_min")?,
        salary_max: row.get("salary_max")?,
        salary_currency: row.get("salary_currency")?,
        description: row.get("description")?,
        description_hash: row.get("description_hash")?,
        culture_text: row.get("culture_text")?,
        requirements: row.get("requirements")?,
        preferred_skills: row.get("preferred_skills")?,
        raw_text: row.get("raw_text")?,
        years_experience_min: row.get("years_experience_min")?,
        years_experience_max: row.get("years_experience_max")?,
        posted_date: row.get("posted_date")?,
        application_deadline: row.get("application_deadline")?,
        first_seen_date: row.get("first_seen_date")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        is_quarantined: row.get::<_, i64>("is_quarantined")? != 0,
        quarantined_until: row.get("quarantined_until")?,
        ghost_score: row.get("ghost_score")?,
        ghost_signals: ghost_signals.and_then(|s| serde_json::from_str(&s).ok()),
        repost_count: row.get("repost_count")?,
        previous_posting_ids: previous_posting_ids
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        last_verified_at: row.get("last_verified_at")?,
        expired_at: row.get("expired_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<JobPosting>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM job_postings WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_job_posting)?;
    Ok(rows.next().transpose()?)
}

/// Dedup step 1 lookup: exact (source_id, external_id) match.
pub fn get_by_source_and_external_id(
    conn: &Connection,
    source_id: &str,
    external_id: &str,
) -> Result<Option<JobPosting>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM job_postings WHERE source_id = ?1 AND external_id = ?2")?;
    let mut rows = stmt.query_map(params![source_id, external_id], row_to_job_posting)?;
    Ok(rows.next().transpose()?)
}

/// Dedup step 2 lookup: content match via SHA-256 description hash.
pub fn get_by_description_hash(
    conn: &Connection,
    description_hash: &str,
) -> Result<Option<JobPosting>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM job_postings WHERE description_hash = ?1")?;
    let mut rows = stmt.query_map(params![description_hash], row_to_job_posting)?;
    Ok(rows.next().transpose()?)
}

/// Candidates for the similarity step of dedup: same company, newest first.
pub fn get_by_company_for_similarity(
    conn: &Connection,
    company_name: &str,
) -> Result<Vec<JobPosting>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM job_postings WHERE company_name = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![company_name], row_to_job_posting)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn create(conn: &Connection, input: &CreateJobPosting) -> Result<JobPosting, AppError> {
    if input.job_title.trim().is_empty() {
        return Err(AppError::Validation("Job title cannot be empty".into()));
    }
    if input.description_hash.len() != 64 {
        return Err(AppError::Validation(
            "description_hash must be a SHA-256 hex digest".into(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO job_postings
         (id, source_id, external_id, job_title, company_name, company_url, source_url,
          apply_url, location, work_model, seniority_level, salary_min, salary_max,
          salary_currency, description, description_hash, culture_text, requirements,
          preferred_skills, raw_text, years_experience_min, years_experience_max,
          first_seen_date, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?24)",
        params![
            id,
            input.source_id,
            input.external_id,
            input.job_title,
            input.company_name,
            input.company_url,
            input.source_url,
            input.apply_url,
            input.location,
            input.work_model,
            input.seniority_level,
            input.salary_min,
            input.salary_max,
            input.salary_currency,
            input.description,
            input.description_hash,
            input.culture_text,
            input.requirements,
            input.preferred_skills,
            input.raw_text,
            input.years_experience_min,
            input.years_experience_max,
            input.first_seen_date,
            now,
        ],
    )?;

    get_by_id(conn, &id)?.ok_or_else(|| AppError::Internal("job posting vanished after insert".into()))
}

/// Update a pool row. The mutable field set is exactly what
/// `UpdateJobPosting` can express; id, source_id and created_at have no
/// representation there.
pub fn update(
    conn: &Connection,
    id: &str,
    input: &UpdateJobPosting,
) -> Result<Option<JobPosting>, AppError> {
    if get_by_id(conn, id)?.is_none() {
        return Ok(None);
    }

    let now = chrono::Utc::now().to_rfc3339();

    let mut sets: Vec<String> = vec!["updated_at = ?1".into()];
    let mut param_idx = 2u32;

    push_field!(input.external_id, "external_id", sets, param_idx);
    push_field!(input.job_title, "job_title", sets, param_idx);
    push_field!(input.company_name, "company_name", sets, param_idx);
    push_field!(input.company_url, "company_url", sets, param_idx);
    push_field!(input.source_url, "source_url", sets, param_idx);
    push_field!(input.apply_url, "apply_url", sets, param_idx);
    push_field!(input.location, "location", sets, param_idx);
    push_field!(input.work_model, "work_model", sets, param_idx);
    push_field!(input.seniority_level, "seniority_level", sets, param_idx);
    push_field!(input.salary_min, "salary_min", sets, param_idx);
    push_field!(input.salary_max, "salary_max", sets, param_idx);
    push_field!(input.salary_currency, "salary_currency", sets, param_idx);
    push_field!(input.description, "description", sets, param_idx);
    push_field!(input.description_hash, "description_hash", sets, param_idx);
    push_field!(input.culture_text, "culture_text", sets, param_idx);
    push_field!(input.requirements, "requirements", sets, param_idx);
    push_field!(input.preferred_skills, "preferred_skills", sets, param_idx);
    push_field!(input.raw_text, "raw_text", sets, param_idx);
    push_field!(input.years_experience_min, "years_experience_min", sets, param_idx);
    push_field!(input.years_experience_max, "years_experience_max", sets, param_idx);
    push_field!(input.posted_date, "posted_date", sets, param_idx);
    push_field!(input.application_deadline, "application_deadline", sets, param_idx);
    push_field!(input.first_seen_date, "first_seen_date", sets, param_idx);
    push_field!(input.last_verified_at, "last_verified_at", sets, param_idx);
    push_field!(input.expired_at, "expired_at", sets, param_idx);
    push_field!(input.ghost_score, "ghost_score", sets, param_idx);
    push_field!(input.ghost_signals, "ghost_signals", sets, param_idx);
    push_field!(input.repost_count, "repost_count", sets, param_idx);
    push_field!(input.previous_posting_ids, "previous_posting_ids", sets, param_idx);
    push_field!(input.also_found_on, "also_found_on", sets, param_idx);
    push_field!(input.is_active, "is_active", sets, param_idx);
    push_field!(input.is_quarantined, "is_quarantined", sets, param_idx);
    push_field!(input.quarantined_until, "quarantined_until", sets, param_idx);

    let sql = format!(
        "UPDATE job_postings SET {} WHERE id = ?{}",
        sets.join(", "),
        param_idx
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(now)];
    if let Some(ref v) = input.external_id { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.job_title { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.company_name { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.company_url { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.source_url { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.apply_url { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.location { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.work_model { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.seniority_level { param_values.push(Box::new(v.clone())); }
    if let Some(v) = input.salary_min { param_values.push(Box::new(v)); }
    if let Some(v) = input.salary_max { param_values.push(Box::new(v)); }
    if let Some(ref v) = input.salary_currency { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.description { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.description_hash { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.culture_text { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.requirements { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.preferred_skills { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.raw_text { param_values.push(Box::new(v.clone())); }
    if let Some(v) = input.years_experience_min { param_values.push(Box::new(v)); }
    if let Some(v) = input.years_experience_max { param_values.push(Box::new(v)); }
    if let Some(ref v) = input.posted_date { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.application_deadline { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.first_seen_date { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.last_verified_at { param_values.push(Box::new(v.clone())); }
    if let Some(ref v) = input.expired_at { param_values.push(Box::new(v.clone())); }
    if let Some(v) = input.ghost_score { param_values.push(Box::new(v)); }
    if let Some(ref v) = input.ghost_signals {
        param_values.push(Box::new(serde_json::to_string(v)?));
    }
    if let Some(v) = input.repost_count { param_values.push(Box::new(v)); }
    if let Some(ref v) = input.previous_posting_ids {
        param_values.push(Box::new(serde_json::to_string(v)?));
    }
    if let Some(ref v) = input.also_found_on {
        param_values.push(Box::new(v.to_json_string()));
    }
    if let Some(v) = input.is_active { param_values.push(Box::new(v as i64)); }
    if let Some(v) = input.is_quarantined { param_values.push(Box::new(v as i64)); }
    if let Some(ref v) = input.quarantined_until { param_values.push(Box::new(v.clone())); }
    param_values.push(Box::new(id.to_string()));

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    conn.execute(&sql, params_ref.as_slice())?;

    get_by_id(conn, id)
}

/// Convenience setter for `is_active = false`.
pub fn deactivate(conn: &Connection, id: &str) -> Result<Option<JobPosting>, AppError> {
    update(
        conn,
        id,
        &UpdateJobPosting {
            is_active: Some(false),
            ..Default::default()
        },
    )
}

/// Attach ghost-score data outside the normal update path (used by the
/// orchestrator right after enrichment).
pub fn set_ghost_data(
    conn: &Connection,
    id: &str,
    ghost_score: i64,
    signals: &GhostSignals,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE job_postings SET ghost_score = ?1, ghost_signals = ?2, updated_at = ?3
         WHERE id = ?4",
        params![
            ghost_score.clamp(0, 100),
            serde_json::to_string(signals)?,
            chrono::Utc::now().to_rfc3339(),
            id,
        ],
    )?;
    Ok(())
}

/// Clear quarantine on rows whose TTL has elapsed. Returns affected count.
pub fn release_expired_quarantines(conn: &Connection) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE job_postings
         SET is_quarantined = 0, quarantined_until = NULL, updated_at = ?1
         WHERE is_quarantined = 1 AND quarantined_until IS NOT NULL AND quarantined_until <= ?1",
        params![now],
    )?;
    Ok(rows)
}

/// Active, non-quarantined postings created at or after `since`, newest first.
pub fn get_surfacing_candidates(
    conn: &Connection,
    since: &str,
    limit: i64,
) -> Result<Vec<JobPosting>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM job_postings
         WHERE is_active = 1 AND is_quarantined = 0 AND created_at >= ?1
         ORDER BY created_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![since, limit], row_to_job_posting)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}


#[cfg(test)]
mod tests {
    use super::test_support::make_posting;
    use super::*;
    use crate::db::init_test_db;
    use crate::db::repos::sources;

    #[test]
    fn test_create_and_lookups() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();

        let mut input = make_posting(&source_id, "Software Engineer", "Build things in Rust");
        input.external_id = Some("AZ-1".into());
        let created = create(&conn, &input).unwrap();

        assert!(get_by_id(&conn, &created.id).unwrap().is_some());
        assert_eq!(
            get_by_source_and_external_id(&conn, &source_id, "AZ-1")
                .unwrap()
                .unwrap()
                .id,
            created.id
        );
        assert_eq!(
            get_by_description_hash(&conn, &created.description_hash)
                .unwrap()
                .unwrap()
                .id,
            created.id
        );
        let candidates = get_by_company_for_similarity(&conn, "Acme Corp").unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_duplicate_hash_rejected() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();

        let input = make_posting(&source_id, "Engineer", "Identical description");
        create(&conn, &input).unwrap();
        let err = create(&conn, &input).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_update_preserves_immutable_fields() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();

        let created = create(
            &conn,
            &make_posting(&source_id, "Software Engineer", "Original description"),
        )
        .unwrap();

        let updated = update(
            &conn,
            &created.id,
            &UpdateJobPosting {
                job_title: Some("Senior Software Engineer".into()),
                location: Some("Remote".into()),
                last_verified_at: Some(chrono::Utc::now().to_rfc3339()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(updated.job_title, "Senior Software Engineer");
        assert_eq!(updated.location.as_deref(), Some("Remote"));
        assert!(updated.last_verified_at.is_some());
        // Immutable fields survive.
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.source_id, created.source_id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.first_seen_date, created.first_seen_date);
    }

    #[test]
    fn test_deactivate() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let source_id = sources::resolve_source_id(&conn, "RemoteOK").unwrap().unwrap();

        let created = create(&conn, &make_posting(&source_id, "Engineer", "Desc")).unwrap();
        let updated = deactivate(&conn, &created.id).unwrap().unwrap();
        assert!(!updated.is_active);
    }

    #[test]
    fn test_quarantine_release() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let source_id = sources::resolve_source_id(&conn, "TheMuse").unwrap().unwrap();

        let created = create(&conn, &make_posting(&source_id, "Engineer", "Qdesc")).unwrap();
        let past = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        update(
            &conn,
            &created.id,
            &UpdateJobPosting {
                is_quarantined: Some(true),
                quarantined_until: Some(Some(past)),
                ..Default::default()
            },
        )
        .unwrap();

        let released = release_expired_quarantines(&conn).unwrap();
        assert_eq!(released, 1);
        let row = get_by_id(&conn, &created.id).unwrap().unwrap();
        assert!(!row.is_quarantined);
    }
}
