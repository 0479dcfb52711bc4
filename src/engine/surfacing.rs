//! Pool surfacing: match newly pooled jobs to eligible personas.
//!
//! Cross-tenant by design — the pass runs with system-level privileges and
//! no user scoping. Link creation is at-least-once with idempotent links:
//! the UNIQUE (persona, job) constraint plus savepoint recovery makes
//! re-processing and concurrent workers safe.

use rusqlite::Connection;

use crate::db::models::{CreatePersonaJob, JobPosting, Persona, Skill, DISCOVERY_POOL};
use crate::db::repos::{job_postings, persona_jobs, personas};
use crate::engine::pool_scoring::{calculate_lightweight_fit, keyword_pre_screen};
use crate::error::AppError;

/// Rate limits per pass.
pub const MAX_JOBS_PER_PASS: i64 = 50;
pub const MAX_PERSONAS_PER_JOB: usize = 100;
pub const MAX_PERSONAS_PER_QUERY: i64 = 500;

/// Statistics from a single surfacing pass.
#[derive(Debug, Clone)]
pub struct SurfacingPassResult {
    pub jobs_processed: usize,
    pub links_created: usize,
    pub links_skipped_threshold: usize,
    pub links_skipped_existing: usize,
    pub started_at: String,
    pub finished_at: String,
}

/// Execute one surfacing pass over jobs pooled at or after `since`.
pub fn run_surfacing_pass(
    conn: &mut Connection,
    since: &str,
) -> Result<SurfacingPassResult, AppError> {
    let started_at = chrono::Utc::now().to_rfc3339();

    // Quarantines with an elapsed TTL become visible again first.
    let released = job_postings::release_expired_quarantines(conn)?;
    if released > 0 {
        tracing::info!(released, "Released expired quarantines");
    }

    let jobs = job_postings::get_surfacing_candidates(conn, since, MAX_JOBS_PER_PASS)?;
    if jobs.is_empty() {
        return Ok(SurfacingPassResult {
            jobs_processed: 0,
            links_created: 0,
            links_skipped_threshold: 0,
            links_skipped_existing: 0,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    let persona_rows = personas::get_onboarded(conn, MAX_PERSONAS_PER_QUERY)?;
    if persona_rows.is_empty() {
        return Ok(SurfacingPassResult {
            jobs_processed: jobs.len(),
            links_created: 0,
            links_skipped_threshold: 0,
            links_skipped_existing: 0,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    // Skills loaded once per persona, reused across all jobs in the pass.
    let mut candidates: Vec<(Persona, Vec<Skill>)> = Vec::with_capacity(persona_rows.len());
    for persona in persona_rows {
        let skills = personas::get_skills(conn, &persona.id)?;
        candidates.push((persona, skills));
    }

    let mut created = 0;
    let mut skipped_threshold = 0;
    let mut skipped_existing = 0;

    for job in &jobs {
        let (c, st, se) = surface_job_to_personas(conn, job, &candidates)?;
        created += c;
        skipped_threshold += st;
        skipped_existing += se;
    }

    let result = SurfacingPassResult {
        jobs_processed: jobs.len(),
        links_created: created,
        links_skipped_threshold: skipped_threshold,
        links_skipped_existing: skipped_existing,
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
    };
    tracing::info!(
        jobs = result.jobs_processed,
        created = result.links_created,
        below_threshold = result.links_skipped_threshold,
        existing = result.links_skipped_existing,
        "Surfacing pass complete"
    );
    Ok(result)
}

/// Surface one job to matching personas. Returns
/// (links_created, skipped_threshold, skipped_existing).
fn surface_job_to_personas(
    conn: &mut Connection,
    job: &JobPosting,
    candidates: &[(Persona, Vec<Skill>)],
) -> Result<(usize, usize, usize), AppError> {
    let existing_persona_ids = persona_jobs::get_persona_ids_for_job(conn, &job.id)?;

    let mut created = 0;
    let mut skipped_threshold = 0;
    let mut skipped_existing = 0;
    let mut evaluated = 0;

    for (persona, skills) in candidates {
        if evaluated >= MAX_PERSONAS_PER_JOB {
            break;
        }

        if existing_persona_ids.contains(&persona.id) {
            skipped_existing += 1;
            continue;
        }

        evaluated += 1;

        let skill_names: Vec<String> = skills.iter().map(|s| s.skill_name.clone()).collect();
        if !keyword_pre_screen(&job.job_title, &job.description, &skill_names) {
            skipped_threshold += 1;
            continue;
        }

        let fit = calculate_lightweight_fit(job, persona, skills);
        if fit.total < persona.minimum_fit_threshold {
            skipped_threshold += 1;
            continue;
        }

        match create_pool_link(conn, &persona.id, &job.id, fit.total)? {
            Some(_) => created += 1,
            None => skipped_existing += 1,
        }
    }

    Ok((created, skipped_threshold, skipped_existing))
}

/// Create a pool-discovered link under a savepoint; a UNIQUE race means
/// someone else surfaced it first and is not an error.
fn create_pool_link(
    conn: &mut Connection,
    persona_id: &str,
    job_posting_id: &str,
    fit_score: i64,
) -> Result<Option<String>, AppError> {
    let input = CreatePersonaJob {
        persona_id: persona_id.to_string(),
        job_posting_id: job_posting_id.to_string(),
        discovery_method: DISCOVERY_POOL.to_string(),
        fit_score: Some(fit_score),
        scored_at: Some(chrono::Utc::now().to_rfc3339()),
        ..Default::default()
    };

    let attempt = {
        let sp = conn.savepoint()?;
        match persona_jobs::create(&sp, &input, None) {
            Ok(link) => {
                sp.commit()?;
                Ok(link)
            }
            Err(e) => Err(e),
        }
    };

    match attempt {
        Ok(link) => Ok(link.map(|l| l.id)),
        Err(e) if e.is_unique_violation() => {
            tracing::debug!(persona_id, job_posting_id, "Pool link already exists");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreatePersonaInput, CreateUserInput, UpdateJobPosting};
    use crate::db::repos::job_postings::test_support::make_posting;
    use crate::db::repos::{sources, users};

    fn since_yesterday() -> String {
        (chrono::Utc::now() - chrono::Duration::hours(24)).to_rfc3339()
    }

    fn make_persona(
        conn: &Connection,
        threshold: i64,
        skills: &[&str],
        onboarded: bool,
    ) -> String {
        let user = users::create(conn, CreateUserInput {
            email: format!("{}@example.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        let persona = personas::create(conn, CreatePersonaInput {
            user_id: user.id,
            full_name: "Surfacing Target".into(),
            email: "s@example.com".into(),
            minimum_fit_threshold: Some(threshold),
            onboarding_complete: Some(onboarded),
            ..Default::default()
        }).unwrap();
        for skill in skills {
            personas::add_skill(conn, &persona.id, skill, "Hard").unwrap();
        }
        persona.id
    }

    fn make_job(conn: &Connection, description: &str) -> String {
        let source_id = sources::resolve_source_id(conn, "Adzuna").unwrap().unwrap();
        job_postings::create(conn, &make_posting(&source_id, "Rust Engineer", description))
            .unwrap()
            .id
    }

    #[test]
    fn test_pass_creates_links_for_matching_personas() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();

        let matching = make_persona(&conn, 10, &["Rust"], true);
        // No skill overlap: pre-screen filters this one out.
        let non_matching = make_persona(&conn, 10, &["Pottery"], true);
        // Not onboarded: never evaluated.
        let dormant = make_persona(&conn, 10, &["Rust"], false);
        let job_id = make_job(&conn, "We ship Rust services every day");

        let result = run_surfacing_pass(&mut conn, &since_yesterday()).unwrap();
        assert_eq!(result.jobs_processed, 1);
        assert_eq!(result.links_created, 1);
        assert_eq!(result.links_skipped_threshold, 1);

        let link = persona_jobs::get_by_persona_and_job(&conn, &matching, &job_id, None)
            .unwrap()
            .unwrap();
        assert_eq!(link.discovery_method, "pool");
        assert_eq!(link.status, "Discovered");
        assert!(link.fit_score.is_some());
        assert!(link.scored_at.is_some());

        for persona in [&non_matching, &dormant] {
            assert!(persona_jobs::get_by_persona_and_job(&conn, persona, &job_id, None)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_pass_is_idempotent() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();

        make_persona(&conn, 10, &["Rust"], true);
        make_job(&conn, "Rust work, first posting");

        let first = run_surfacing_pass(&mut conn, &since_yesterday()).unwrap();
        assert_eq!(first.links_created, 1);

        // Re-processing the same window creates nothing new.
        let second = run_surfacing_pass(&mut conn, &since_yesterday()).unwrap();
        assert_eq!(second.links_created, 0);
        assert_eq!(second.links_skipped_existing, 1);
    }

    #[test]
    fn test_threshold_gates_link_creation() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();

        // Impossibly high threshold: pre-screen passes, score gate fails.
        let persona_id = make_persona(&conn, 100, &["Rust"], true);
        // Work model mismatch keeps the lightweight score below 100.
        conn.execute(
            "UPDATE personas SET remote_preference = 'Remote Only' WHERE id = ?1",
            rusqlite::params![persona_id],
        )
        .unwrap();
        let job_id = make_job(&conn, "Rust work onsite only");
        conn.execute(
            "UPDATE job_postings SET work_model = 'Onsite' WHERE id = ?1",
            rusqlite::params![job_id],
        )
        .unwrap();

        let result = run_surfacing_pass(&mut conn, &since_yesterday()).unwrap();
        assert_eq!(result.links_created, 0);
        assert_eq!(result.links_skipped_threshold, 1);
    }

    #[test]
    fn test_quarantined_jobs_invisible_until_released() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();

        make_persona(&conn, 10, &["Rust"], true);
        let job_id = make_job(&conn, "Rust role behind quarantine");
        job_postings::update(
            &conn,
            &job_id,
            &UpdateJobPosting {
                is_quarantined: Some(true),
                quarantined_until: Some(Some(
                    (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                )),
                ..Default::default()
            },
        )
        .unwrap();

        let result = run_surfacing_pass(&mut conn, &since_yesterday()).unwrap();
        assert_eq!(result.jobs_processed, 0);

        // Expire the quarantine: the next pass releases and surfaces it.
        job_postings::update(
            &conn,
            &job_id,
            &UpdateJobPosting {
                quarantined_until: Some(Some(
                    (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
                )),
                ..Default::default()
            },
        )
        .unwrap();
        let result = run_surfacing_pass(&mut conn, &since_yesterday()).unwrap();
        assert_eq!(result.jobs_processed, 1);
        assert_eq!(result.links_created, 1);
    }

    #[test]
    fn test_since_window_excludes_old_jobs() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();

        make_persona(&conn, 10, &["Rust"], true);
        make_job(&conn, "Rust job from the past");

        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let result = run_surfacing_pass(&mut conn, &future).unwrap();
        assert_eq!(result.jobs_processed, 0);
    }
}
