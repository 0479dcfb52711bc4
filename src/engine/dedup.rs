//! Global deduplication for the shared job pool.
//!
//! The 4-step match procedure decides whether an incoming posting is a
//! re-encounter of one already pooled, a cross-source duplicate, a repost,
//! or new content:
//!
//! 1. (source_id, external_id) match → UPDATE the existing row
//! 2. description_hash match → append to also_found_on
//! 3. company + title + description similarity → new row LINKED as repost
//! 4. no match → CREATE new
//!
//! Afterwards the persona_jobs link for the discovering persona is created
//! (or returned if present). Concurrent writers racing on a uniqueness
//! constraint recover via savepoint rollback + re-query, so the outer
//! transaction stays valid.

use rusqlite::Connection;

use crate::db::models::{
    AlsoFoundOn, AlsoFoundOnSource, CreateJobPosting, CreatePersonaJob, JobPosting, PersonaJob,
    UpdateJobPosting,
};
use crate::db::repos::{job_postings, persona_jobs};
use crate::engine::similarity::{
    description_similarity, is_similar_title, truncate_chars, MAX_SIMILARITY_DESC_LEN,
    SIMILARITY_HIGH, SIMILARITY_MEDIUM,
};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupAction {
    UpdateExisting,
    AddToAlsoFoundOn,
    CreateLinkedRepost,
    CreateNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchConfidence {
    High,
    Medium,
}

/// Result of the dedup pipeline.
#[derive(Debug)]
pub struct DeduplicationOutcome {
    pub action: DedupAction,
    pub job_posting: JobPosting,
    pub persona_job: PersonaJob,
    pub confidence: Option<MatchConfidence>,
    pub matched_job_id: Option<String>,
}

/// Normalized posting data entering the pipeline.
#[derive(Debug, Clone, Default)]
pub struct DedupJobData {
    pub source_id: String,
    pub job_title: String,
    pub company_name: String,
    pub description: String,
    pub description_hash: String,
    pub first_seen_date: String,
    pub external_id: Option<String>,
    pub company_url: Option<String>,
    pub source_url: Option<String>,
    pub apply_url: Option<String>,
    pub location: Option<String>,
    pub work_model: Option<String>,
    pub seniority_level: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub posted_date: Option<String>,
    pub application_deadline: Option<String>,
    pub culture_text: Option<String>,
    pub requirements: Option<String>,
    pub preferred_skills: Option<String>,
    pub raw_text: Option<String>,
    pub years_experience_min: Option<i64>,
    pub years_experience_max: Option<i64>,
}

impl DedupJobData {
    /// Fields a same-source re-encounter may refresh on the existing row.
    /// Excludes identity and pipeline-computed fields (first_seen_date,
    /// ghost data, repost chain, also_found_on, is_active).
    fn source_update_fields(&self) -> UpdateJobPosting {
        UpdateJobPosting {
            job_title: Some(self.job_title.clone()),
            company_name: Some(self.company_name.clone()),
            company_url: self.company_url.clone(),
            source_url: self.source_url.clone(),
            apply_url: self.apply_url.clone(),
            location: self.location.clone(),
            work_model: self.work_model.clone(),
            seniority_level: self.seniority_level.clone(),
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            salary_currency: self.salary_currency.clone(),
            description: Some(self.description.clone()),
            description_hash: Some(self.description_hash.clone()),
            culture_text: self.culture_text.clone(),
            requirements: self.requirements.clone(),
            preferred_skills: self.preferred_skills.clone(),
            raw_text: self.raw_text.clone(),
            years_experience_min: self.years_experience_min,
            years_experience_max: self.years_experience_max,
            posted_date: self.posted_date.clone(),
            application_deadline: self.application_deadline.clone(),
            last_verified_at: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    fn create_fields(&self) -> CreateJobPosting {
        CreateJobPosting {
            source_id: self.source_id.clone(),
            job_title: self.job_title.clone(),
            company_name: self.company_name.clone(),
            description: self.description.clone(),
            description_hash: self.description_hash.clone(),
            first_seen_date: self.first_seen_date.clone(),
            external_id: self.external_id.clone(),
            company_url: self.company_url.clone(),
            source_url: self.source_url.clone(),
            apply_url: self.apply_url.clone(),
            location: self.location.clone(),
            work_model: self.work_model.clone(),
            seniority_level: self.seniority_level.clone(),
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            salary_currency: self.salary_currency.clone(),
            culture_text: self.culture_text.clone(),
            requirements: self.requirements.clone(),
            preferred_skills: self.preferred_skills.clone(),
            raw_text: self.raw_text.clone(),
            years_experience_min: self.years_experience_min,
            years_experience_max: self.years_experience_max,
        }
    }
}

/// Run the dedup pipeline and create the persona link.
///
/// `user_id` scopes link creation: user-facing callers pass `Some` and the
/// persona must belong to that user; system-level callers pass `None`.
pub fn deduplicate_and_save(
    conn: &mut Connection,
    job_data: &DedupJobData,
    persona_id: &str,
    user_id: Option<&str>,
    discovery_method: &str,
) -> Result<DeduplicationOutcome, AppError> {
    // Step 1: source_id + external_id match → UPDATE existing
    if let Some(ref external_id) = job_data.external_id {
        if let Some(existing) =
            job_postings::get_by_source_and_external_id(conn, &job_data.source_id, external_id)?
        {
            let updated = job_postings::update(conn, &existing.id, &job_data.source_update_fields())?
                .unwrap_or(existing);
            let persona_job =
                create_or_get_link(conn, persona_id, &updated.id, user_id, discovery_method)?;
            return Ok(DeduplicationOutcome {
                action: DedupAction::UpdateExisting,
                matched_job_id: Some(updated.id.clone()),
                job_posting: updated,
                persona_job,
                confidence: Some(MatchConfidence::High),
            });
        }
    }

    // Step 2: description_hash match → ADD to also_found_on
    if let Some(existing) = job_postings::get_by_description_hash(conn, &job_data.description_hash)? {
        let merged = build_updated_also_found_on(&existing, job_data);
        let updated = job_postings::update(
            conn,
            &existing.id,
            &UpdateJobPosting {
                also_found_on: Some(merged),
                ..Default::default()
            },
        )?
        .unwrap_or(existing);
        let persona_job =
            create_or_get_link(conn, persona_id, &updated.id, user_id, discovery_method)?;
        return Ok(DeduplicationOutcome {
            action: DedupAction::AddToAlsoFoundOn,
            matched_job_id: Some(updated.id.clone()),
            job_posting: updated,
            persona_job,
            confidence: Some(MatchConfidence::High),
        });
    }

    // Step 3: company + title + description similarity → LINK as repost
    let candidates = job_postings::get_by_company_for_similarity(conn, &job_data.company_name)?;
    if let Some((matched, confidence)) = find_similarity_match(job_data, &candidates) {
        let repost = create_repost(conn, job_data, matched)?;
        let persona_job =
            create_or_get_link(conn, persona_id, &repost.id, user_id, discovery_method)?;
        return Ok(DeduplicationOutcome {
            action: DedupAction::CreateLinkedRepost,
            matched_job_id: Some(matched.id.clone()),
            job_posting: repost,
            persona_job,
            confidence: Some(confidence),
        });
    }

    // Step 4: No match → CREATE new in shared pool
    let job_posting = create_with_conflict_recovery(conn, job_data)?;
    let persona_job =
        create_or_get_link(conn, persona_id, &job_posting.id, user_id, discovery_method)?;
    Ok(DeduplicationOutcome {
        action: DedupAction::CreateNew,
        job_posting,
        persona_job,
        confidence: None,
        matched_job_id: None,
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Build a new also_found_on value with the incoming source appended,
/// deduplicated by source_id. Always a fresh value — never an in-place
/// mutation — so JSON change detection in the storage layer sees it.
fn build_updated_also_found_on(existing: &JobPosting, job_data: &DedupJobData) -> AlsoFoundOn {
    let mut sources = existing.also_found_on.sources.clone();
    let already_recorded = sources.iter().any(|s| s.source_id == job_data.source_id);
    if !already_recorded {
        sources.push(AlsoFoundOnSource {
            source_id: job_data.source_id.clone(),
            external_id: job_data.external_id.clone(),
            source_url: job_data.source_url.clone(),
            found_at: chrono::Utc::now().to_rfc3339(),
        });
    }
    AlsoFoundOn { sources }
}

/// Best similarity match among same-company candidates: a HIGH-ratio pair
/// wins immediately; otherwise the best MEDIUM candidate, if any.
fn find_similarity_match<'a>(
    job_data: &DedupJobData,
    candidates: &'a [JobPosting],
) -> Option<(&'a JobPosting, MatchConfidence)> {
    let new_description = truncate_chars(&job_data.description, MAX_SIMILARITY_DESC_LEN);

    let mut best_medium: (Option<&JobPosting>, f64) = (None, 0.0);

    for candidate in candidates {
        if !is_similar_title(&job_data.job_title, &candidate.job_title) {
            continue;
        }

        let candidate_desc = truncate_chars(&candidate.description, MAX_SIMILARITY_DESC_LEN);
        let ratio = description_similarity(new_description, candidate_desc);
        if ratio > SIMILARITY_HIGH {
            return Some((candidate, MatchConfidence::High));
        }
        if ratio > SIMILARITY_MEDIUM && ratio > best_medium.1 {
            best_medium = (Some(candidate), ratio);
        }
    }

    best_medium.0.map(|c| (c, MatchConfidence::Medium))
}

/// Create a new pool row linked as a repost of the matched job. The chain
/// grows at the front: newest predecessor first.
fn create_repost(
    conn: &mut Connection,
    job_data: &DedupJobData,
    matched: &JobPosting,
) -> Result<JobPosting, AppError> {
    let mut chain = vec![matched.id.clone()];
    chain.extend(matched.previous_posting_ids.iter().cloned());

    let created = create_with_conflict_recovery(conn, job_data)?;
    let updated = job_postings::update(
        conn,
        &created.id,
        &UpdateJobPosting {
            previous_posting_ids: Some(chain),
            repost_count: Some(matched.repost_count + 1),
            ..Default::default()
        },
    )?
    .unwrap_or(created);
    Ok(updated)
}

/// Insert a pool row, recovering from UNIQUE races.
///
/// The insert runs under a savepoint so a constraint violation does not
/// invalidate the surrounding transaction; on violation the savepoint is
/// rolled back, the dedup keys are re-queried, and the winner is returned.
fn create_with_conflict_recovery(
    conn: &mut Connection,
    job_data: &DedupJobData,
) -> Result<JobPosting, AppError> {
    let attempt = {
        let sp = conn.savepoint()?;
        match job_postings::create(&sp, &job_data.create_fields()) {
            Ok(created) => {
                sp.commit()?;
                Ok(created)
            }
            // Savepoint dropped here → rolled back; connection stays usable.
            Err(e) => Err(e),
        }
    };

    match attempt {
        Ok(created) => Ok(created),
        Err(e) if e.is_unique_violation() => {
            if let Some(ref external_id) = job_data.external_id {
                if let Some(existing) = job_postings::get_by_source_and_external_id(
                    conn,
                    &job_data.source_id,
                    external_id,
                )? {
                    return Ok(existing);
                }
            }
            match job_postings::get_by_description_hash(conn, &job_data.description_hash)? {
                Some(existing) => Ok(existing),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Create the persona_jobs link, or return the existing one. Same savepoint
/// recovery over the (persona_id, job_posting_id) constraint.
pub fn create_or_get_link(
    conn: &mut Connection,
    persona_id: &str,
    job_posting_id: &str,
    user_id: Option<&str>,
    discovery_method: &str,
) -> Result<PersonaJob, AppError> {
    // Common path: already linked, no savepoint needed.
    if let Some(existing) =
        persona_jobs::get_by_persona_and_job(conn, persona_id, job_posting_id, user_id)?
    {
        return Ok(existing);
    }

    let input = CreatePersonaJob {
        persona_id: persona_id.to_string(),
        job_posting_id: job_posting_id.to_string(),
        discovery_method: discovery_method.to_string(),
        ..Default::default()
    };

    let attempt = {
        let sp = conn.savepoint()?;
        match persona_jobs::create(&sp, &input, user_id) {
            Ok(link) => {
                sp.commit()?;
                Ok(link)
            }
            Err(e) => Err(e),
        }
    };

    match attempt {
        Ok(Some(link)) => Ok(link),
        Ok(None) => {
            tracing::warn!(persona_id, user_id = ?user_id, "Persona not owned by user");
            Err(AppError::Validation(
                "Persona not owned by authenticated user".into(),
            ))
        }
        Err(e) if e.is_unique_violation() => {
            persona_jobs::get_by_persona_and_job(conn, persona_id, job_posting_id, user_id)?
                .ok_or(e)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreatePersonaInput, CreateUserInput};
    use crate::db::repos::{personas, sources, users};
    use crate::engine::similarity::description_hash;

    struct Fixture {
        user_id: String,
        persona_id: String,
        source_id: String,
        other_source_id: String,
    }

    fn setup(conn: &Connection) -> Fixture {
        let user = users::create(conn, CreateUserInput {
            email: format!("{}@example.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        let persona = personas::create(conn, CreatePersonaInput {
            user_id: user.id.clone(),
            full_name: "Dedup Tester".into(),
            email: "d@example.com".into(),
            ..Default::default()
        }).unwrap();
        let source_id = sources::resolve_source_id(conn, "Adzuna").unwrap().unwrap();
        let other_source_id = sources::resolve_source_id(conn, "RemoteOK").unwrap().unwrap();
        Fixture { user_id: user.id, persona_id: persona.id, source_id, other_source_id }
    }

    fn job_data(fixture: &Fixture, title: &str, description: &str, external_id: Option<&str>) -> DedupJobData {
        DedupJobData {
            source_id: fixture.source_id.clone(),
            job_title: title.into(),
            company_name: "Acme Corp".into(),
            description: description.into(),
            description_hash: description_hash(description),
            first_seen_date: "2026-07-01".into(),
            external_id: external_id.map(String::from),
            ..Default::default()
        }
    }

    const DESC_A: &str = "Build great software at Acme Corp using Python and FastAPI";

    #[test]
    fn test_step1_same_source_update() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let fixture = setup(&conn);

        let first = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Software Engineer", DESC_A, Some("LI-12345")),
            &fixture.persona_id,
            Some(&fixture.user_id),
            "scouter",
        )
        .unwrap();
        assert_eq!(first.action, DedupAction::CreateNew);
        let j1 = first.job_posting.id.clone();

        // Re-encounter with updated title and location.
        let mut incoming = job_data(&fixture, "Senior Software Engineer", DESC_A, Some("LI-12345"));
        incoming.location = Some("Remote".into());
        let outcome = deduplicate_and_save(
            &mut conn,
            &incoming,
            &fixture.persona_id,
            Some(&fixture.user_id),
            "scouter",
        )
        .unwrap();

        assert_eq!(outcome.action, DedupAction::UpdateExisting);
        assert_eq!(outcome.confidence, Some(MatchConfidence::High));
        assert_eq!(outcome.matched_job_id.as_deref(), Some(j1.as_str()));
        assert_eq!(outcome.job_posting.id, j1);
        assert_eq!(outcome.job_posting.job_title, "Senior Software Engineer");
        assert_eq!(outcome.job_posting.location.as_deref(), Some("Remote"));
        assert!(outcome.job_posting.last_verified_at.is_some());
        // first_seen_date preserved across the update.
        assert_eq!(outcome.job_posting.first_seen_date, "2026-07-01");
        assert_eq!(outcome.persona_job.discovery_method, "scouter");
    }

    #[test]
    fn test_step2_cross_source_hash_match_is_idempotent() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let fixture = setup(&conn);

        let first = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Software Engineer", DESC_A, Some("LI-1")),
            &fixture.persona_id,
            Some(&fixture.user_id),
            "scouter",
        )
        .unwrap();
        let j1 = first.job_posting.id.clone();

        // Same content from a different source.
        let mut incoming = job_data(&fixture, "Software Engineer", DESC_A, Some("IND-99999"));
        incoming.source_id = fixture.other_source_id.clone();
        incoming.source_url = Some("https://indeed.example/j/99999".into());

        let outcome = deduplicate_and_save(
            &mut conn, &incoming, &fixture.persona_id, Some(&fixture.user_id), "scouter",
        )
        .unwrap();
        assert_eq!(outcome.action, DedupAction::AddToAlsoFoundOn);
        assert_eq!(outcome.job_posting.id, j1);
        assert_eq!(outcome.job_posting.also_found_on.sources.len(), 1);
        let entry = &outcome.job_posting.also_found_on.sources[0];
        assert_eq!(entry.source_id, fixture.other_source_id);
        assert_eq!(entry.external_id.as_deref(), Some("IND-99999"));

        // Re-sending the same input yields the same single entry.
        let again = deduplicate_and_save(
            &mut conn, &incoming, &fixture.persona_id, Some(&fixture.user_id), "scouter",
        )
        .unwrap();
        assert_eq!(again.job_posting.also_found_on.sources.len(), 1);
    }

    #[test]
    fn test_step3_repost_detection() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let fixture = setup(&conn);

        let first = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Software Engineer", DESC_A, None),
            &fixture.persona_id,
            Some(&fixture.user_id),
            "scouter",
        )
        .unwrap();
        let j1 = first.job_posting.id.clone();

        // One token differs → new hash, high similarity.
        let desc_b = "Build great software at Acme Corp using Python and Django";
        let outcome = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Software Engineer", desc_b, None),
            &fixture.persona_id,
            Some(&fixture.user_id),
            "scouter",
        )
        .unwrap();

        assert_eq!(outcome.action, DedupAction::CreateLinkedRepost);
        assert_eq!(outcome.confidence, Some(MatchConfidence::High));
        assert_eq!(outcome.matched_job_id.as_deref(), Some(j1.as_str()));
        assert_ne!(outcome.job_posting.id, j1);
        assert_eq!(outcome.job_posting.previous_posting_ids, vec![j1.clone()]);
        assert_eq!(outcome.job_posting.repost_count, 1);

        // J1 itself unchanged.
        let original = job_postings::get_by_id(&conn, &j1).unwrap().unwrap();
        assert_eq!(original.repost_count, 0);
        assert!(original.previous_posting_ids.is_empty());
    }

    #[test]
    fn test_step4_create_new_and_cross_user_link() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let fixture = setup(&conn);

        let outcome = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Platform Engineer", "Run the platform", Some("AZ-7")),
            &fixture.persona_id,
            Some(&fixture.user_id),
            "scouter",
        )
        .unwrap();
        assert_eq!(outcome.action, DedupAction::CreateNew);
        assert!(outcome.confidence.is_none());
        let j1 = outcome.job_posting.id.clone();

        // A second user's persona discovers the same (source, external_id):
        // converges on the same pool row with its own link.
        let user_b = users::create(&conn, CreateUserInput {
            email: format!("{}@b.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        let persona_b = personas::create(&conn, CreatePersonaInput {
            user_id: user_b.id.clone(),
            full_name: "Second Persona".into(),
            email: "b@b.com".into(),
            ..Default::default()
        }).unwrap();

        let second = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Platform Engineer", "Run the platform", Some("AZ-7")),
            &persona_b.id,
            Some(&user_b.id),
            "scouter",
        )
        .unwrap();
        assert_eq!(second.job_posting.id, j1);

        // Two links exist; neither user can read the other's.
        let link_a = persona_jobs::get_by_persona_and_job(&conn, &fixture.persona_id, &j1, None)
            .unwrap()
            .unwrap();
        let link_b = persona_jobs::get_by_persona_and_job(&conn, &persona_b.id, &j1, None)
            .unwrap()
            .unwrap();
        assert_ne!(link_a.id, link_b.id);
        assert!(persona_jobs::get_by_id(&conn, &link_a.id, &user_b.id).unwrap().is_none());
        assert!(persona_jobs::get_by_id(&conn, &link_b.id, &fixture.user_id).unwrap().is_none());
    }

    #[test]
    fn test_link_rejects_foreign_persona() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let fixture = setup(&conn);

        let stranger = users::create(&conn, CreateUserInput {
            email: format!("{}@c.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();

        let err = deduplicate_and_save(
            &mut conn,
            &job_data(&fixture, "Engineer", "some posting", None),
            &fixture.persona_id,
            Some(&stranger.id),
            "scouter",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_conflict_recovery_returns_winner() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let fixture = setup(&conn);

        // Simulate losing a race: the row already exists when the insert runs.
        let data = job_data(&fixture, "Engineer", "contested posting", Some("AZ-RACE"));
        let winner = create_with_conflict_recovery(&mut conn, &data).unwrap();
        let loser = create_with_conflict_recovery(&mut conn, &data).unwrap();
        assert_eq!(winner.id, loser.id);

        // The failed insert left the connection fully usable.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
