//! Per-persona job scoring.
//!
//! One pipeline behind three entry points (single job, batch of up to 500,
//! rescore-all-discovered): non-negotiable filter → fit/stretch component
//! scoring → threshold-gated LLM rationale → persistence onto the
//! persona_jobs link. Persona embeddings are generated once per batch —
//! never per job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::models::{
    CustomNonNegotiable, JobPosting, Persona, Skill, UpdatePersonaJob,
};
use crate::db::repos::{job_postings, persona_jobs, personas};
use crate::db::DbPool;
use crate::engine::pool_scoring::{
    calculate_fit_score, score_experience_alignment, score_keyword_overlap,
    score_work_model_alignment, FitScoreResult, FIT_NEUTRAL_SCORE,
};
use crate::engine::provider::{
    CompleteOptions, EmbeddingProvider, LlmMessage, LlmProvider, TaskType,
};
use crate::error::AppError;

/// Fit score at or above which the LLM writes a rationale paragraph.
pub const RATIONALE_SCORE_THRESHOLD: i64 = 65;

/// Upper bound for one score_batch call.
pub const MAX_BATCH_SIZE: usize = 500;

/// Stretch component weights; they sum to 1.0.
pub const WEIGHT_TARGET_ROLE: f64 = 0.50;
pub const WEIGHT_TARGET_SKILLS: f64 = 0.40;
pub const WEIGHT_GROWTH: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StretchComponents {
    pub target_role: f64,
    pub target_skills: f64,
    pub growth_trajectory: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StretchScoreResult {
    pub total: i64,
    pub components: StretchComponents,
}

/// Outcome for one (persona, job) pair.
#[derive(Debug, Clone)]
pub struct JobScoreOutcome {
    pub job_posting_id: String,
    pub persona_job_id: String,
    pub fit: Option<FitScoreResult>,
    pub stretch: Option<StretchScoreResult>,
    pub failed_non_negotiables: Vec<String>,
    pub explanation: String,
    pub auto_draft_triggered: bool,
}

/// The persona-side vectors, generated once per batch.
struct PersonaVectors {
    hard_skills: Vec<f32>,
    soft_skills: Vec<f32>,
    role_interests: Vec<f32>,
}

pub struct ScoringService {
    pool: DbPool,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ScoringService {
    pub fn new(pool: DbPool, llm: Arc<dyn LlmProvider>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        ScoringService { pool, llm, embedder }
    }

    pub async fn score_job(
        &self,
        persona_id: &str,
        job_id: &str,
        user_id: &str,
    ) -> Result<JobScoreOutcome, AppError> {
        let mut results = self
            .score_batch(persona_id, &[job_id.to_string()], user_id)
            .await?;
        results
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id} for persona {persona_id}")))
    }

    pub async fn score_batch(
        &self,
        persona_id: &str,
        job_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<JobScoreOutcome>, AppError> {
        if job_ids.is_empty() {
            return Ok(vec![]);
        }
        if job_ids.len() > MAX_BATCH_SIZE {
            return Err(AppError::Validation(format!(
                "Batch size {} exceeds maximum of {MAX_BATCH_SIZE}",
                job_ids.len()
            )));
        }

        // Tenant isolation: the persona must belong to the caller.
        let (persona, skills, non_negotiables) = {
            let conn = self.pool.get()?;
            let persona = personas::get_owned(&conn, persona_id, user_id)?
                .ok_or_else(|| AppError::NotFound(format!("Persona {persona_id}")))?;
            let skills = personas::get_skills(&conn, persona_id)?;
            let non_negotiables = personas::get_non_negotiables(&conn, persona_id)?;
            (persona, skills, non_negotiables)
        };

        // Persona embeddings: exactly one embed call for the whole batch.
        let persona_vectors = self.generate_persona_vectors(&persona, &skills).await?;

        // Load jobs and their links up front.
        let mut loaded: Vec<(JobPosting, String)> = Vec::new();
        {
            let conn = self.pool.get()?;
            for job_id in job_ids {
                let Some(job) = job_postings::get_by_id(&conn, job_id)? else {
                    tracing::warn!(job_id, "Skipping unknown job in score batch");
                    continue;
                };
                let Some(link) =
                    persona_jobs::get_by_persona_and_job(&conn, persona_id, job_id, Some(user_id))?
                else {
                    tracing::warn!(job_id, persona_id, "Skipping job with no persona link");
                    continue;
                };
                loaded.push((job, link.id));
            }
        }
        if loaded.is_empty() {
            return Ok(vec![]);
        }

        // One embed call for all job texts (description-ish + title per job).
        let job_texts: Vec<String> = loaded
            .iter()
            .flat_map(|(job, _)| {
                let body = job.requirements.clone().unwrap_or_else(|| job.description.clone());
                [
                    crate::engine::similarity::truncate_chars(&body, 4000).to_string(),
                    job.job_title.clone(),
                ]
            })
            .collect();
        let job_vectors = self
            .embedder
            .embed(&job_texts)
            .await
            .map_err(AppError::Provider)?
            .vectors;

        let mut outcomes = Vec::with_capacity(loaded.len());
        for (idx, (job, link_id)) in loaded.iter().enumerate() {
            let body_vec = job_vectors.get(idx * 2);
            let title_vec = job_vectors.get(idx * 2 + 1);
            let outcome = self
                .score_one(
                    &persona,
                    &skills,
                    &non_negotiables,
                    &persona_vectors,
                    job,
                    link_id,
                    body_vec,
                    title_vec,
                    user_id,
                )
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub async fn rescore_all_discovered(
        &self,
        persona_id: &str,
        user_id: &str,
    ) -> Result<Vec<JobScoreOutcome>, AppError> {
        let job_ids: Vec<String> = {
            let conn = self.pool.get()?;
            persona_jobs::get_discovered_for_persona(&conn, persona_id, user_id)?
                .into_iter()
                .map(|link| link.job_posting_id)
                .take(MAX_BATCH_SIZE)
                .collect()
        };
        if job_ids.is_empty() {
            return Ok(vec![]);
        }
        self.score_batch(persona_id, &job_ids, user_id).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn generate_persona_vectors(
        &self,
        persona: &Persona,
        skills: &[Skill],
    ) -> Result<PersonaVectors, AppError> {
        let hard: Vec<&str> = skills
            .iter()
            .filter(|s| s.skill_type == "Hard")
            .map(|s| s.skill_name.as_str())
            .collect();
        let soft: Vec<&str> = skills
            .iter()
            .filter(|s| s.skill_type == "Soft")
            .map(|s| s.skill_name.as_str())
            .collect();

        let hard_text = format!("{} {}", hard.join(", "), persona.target_skills.join(", "));
        let soft_text = if soft.is_empty() { "collaboration".to_string() } else { soft.join(", ") };
        let role_text = if persona.target_roles.is_empty() {
            persona.current_role.clone().unwrap_or_else(|| "software engineer".into())
        } else {
            persona.target_roles.join(", ")
        };

        let texts = vec![hard_text, soft_text, role_text];
        let result = self.embedder.embed(&texts).await.map_err(AppError::Provider)?;
        let mut vectors = result.vectors.into_iter();
        let (Some(hard_skills), Some(soft_skills), Some(role_interests)) =
            (vectors.next(), vectors.next(), vectors.next())
        else {
            return Err(AppError::Internal("embedding provider returned too few vectors".into()));
        };

        // Persisted for reuse by other pipelines; staleness is acceptable.
        {
            let conn = self.pool.get()?;
            personas::upsert_embedding(&conn, &persona.id, "hard_skills", &hard_skills, &result.model)?;
            personas::upsert_embedding(&conn, &persona.id, "soft_skills", &soft_skills, &result.model)?;
            personas::upsert_embedding(&conn, &persona.id, "logistics", &role_interests, &result.model)?;
        }

        Ok(PersonaVectors { hard_skills, soft_skills, role_interests })
    }

    #[allow(clippy::too_many_arguments)]
    async fn score_one(
        &self,
        persona: &Persona,
        skills: &[Skill],
        non_negotiables: &[CustomNonNegotiable],
        persona_vectors: &PersonaVectors,
        job: &JobPosting,
        link_id: &str,
        body_vec: Option<&Vec<f32>>,
        title_vec: Option<&Vec<f32>>,
        user_id: &str,
    ) -> Result<JobScoreOutcome, AppError> {
        let failed = check_non_negotiables(persona, non_negotiables, job);
        if !failed.is_empty() {
            let explanation = format!(
                "Filtered out: failed non-negotiables ({})",
                failed.join(", ")
            );
            self.persist(link_id, user_id, None, None, &failed, &explanation, false)?;
            return Ok(JobScoreOutcome {
                job_posting_id: job.id.clone(),
                persona_job_id: link_id.to_string(),
                fit: None,
                stretch: None,
                failed_non_negotiables: failed,
                explanation,
                auto_draft_triggered: false,
            });
        }

        let fit = score_fit(persona, skills, persona_vectors, job, body_vec, title_vec);
        let stretch = score_stretch(persona, job);

        let explanation = if fit.total >= RATIONALE_SCORE_THRESHOLD {
            self.generate_rationale(persona, job, &fit).await
        } else {
            format!(
                "Low match: fit score {} is below the rationale threshold.",
                fit.total
            )
        };

        let auto_draft_triggered = fit.total >= persona.auto_draft_threshold;
        self.persist(
            link_id,
            user_id,
            Some(&fit),
            Some(&stretch),
            &[],
            &explanation,
            auto_draft_triggered,
        )?;

        Ok(JobScoreOutcome {
            job_posting_id: job.id.clone(),
            persona_job_id: link_id.to_string(),
            fit: Some(fit),
            stretch: Some(stretch),
            failed_non_negotiables: vec![],
            explanation,
            auto_draft_triggered,
        })
    }

    /// One-paragraph LLM rationale, with a templated fallback on provider
    /// failure.
    async fn generate_rationale(
        &self,
        persona: &Persona,
        job: &JobPosting,
        fit: &FitScoreResult,
    ) -> String {
        let messages = [
            LlmMessage::system(
                "You explain job-match scores. In one short paragraph, explain why this job \
                 fits the candidate, referencing the strongest scoring components. Plain text.",
            ),
            LlmMessage::user(format!(
                "Candidate target roles: {}. Job: {} at {}. Fit score {} \
                 (hard skills {:.0}, soft skills {:.0}, experience {:.0}, title {:.0}, logistics {:.0}).",
                persona.target_roles.join(", "),
                job.job_title,
                job.company_name,
                fit.total,
                fit.components.hard_skills,
                fit.components.soft_skills,
                fit.components.experience_level,
                fit.components.role_title,
                fit.components.location_logistics,
            )),
        ];
        let options = CompleteOptions {
            max_tokens: Some(300),
            temperature: Some(0.4),
            ..Default::default()
        };
        match self.llm.complete(&messages, TaskType::ScoreRationale, &options).await {
            Ok(response) => response.content.unwrap_or_else(|| fallback_rationale(job, fit)),
            Err(e) => {
                tracing::warn!(error = %e, job_id = %job.id, "Rationale generation failed, using template");
                fallback_rationale(job, fit)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        link_id: &str,
        user_id: &str,
        fit: Option<&FitScoreResult>,
        stretch: Option<&StretchScoreResult>,
        failed: &[String],
        explanation: &str,
        auto_draft_triggered: bool,
    ) -> Result<(), AppError> {
        let score_details = serde_json::json!({
            "fit": fit.map(|f| serde_json::json!({
                "components": f.components,
                "weights": {
                    "hard_skills": crate::engine::pool_scoring::WEIGHT_HARD_SKILLS,
                    "soft_skills": crate::engine::pool_scoring::WEIGHT_SOFT_SKILLS,
                    "experience_level": crate::engine::pool_scoring::WEIGHT_EXPERIENCE,
                    "role_title": crate::engine::pool_scoring::WEIGHT_ROLE_TITLE,
                    "location_logistics": crate::engine::pool_scoring::WEIGHT_LOCATION,
                },
            })),
            "stretch": stretch.map(|s| serde_json::json!({
                "components": s.components,
                "weights": {
                    "target_role": WEIGHT_TARGET_ROLE,
                    "target_skills": WEIGHT_TARGET_SKILLS,
                    "growth_trajectory": WEIGHT_GROWTH,
                },
            })),
            "explanation": explanation,
            "auto_draft_triggered": auto_draft_triggered,
        });

        let conn = self.pool.get()?;
        persona_jobs::update(
            &conn,
            link_id,
            user_id,
            UpdatePersonaJob {
                fit_score: Some(fit.map(|f| f.total)),
                stretch_score: Some(stretch.map(|s| s.total)),
                failed_non_negotiables: Some(failed.to_vec()),
                score_details: Some(score_details),
                scored_at: Some(chrono::Utc::now().to_rfc3339()),
                ..Default::default()
            },
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pure scoring pieces
// ---------------------------------------------------------------------------

/// Cosine similarity mapped onto 0–100; negative similarity floors at 0.
fn cosine_score(a: Option<&Vec<f32>>, b: &[f32]) -> f64 {
    let Some(a) = a else {
        return FIT_NEUTRAL_SCORE;
    };
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return FIT_NEUTRAL_SCORE;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return FIT_NEUTRAL_SCORE;
    }
    ((dot / (norm_a * norm_b)) * 100.0).clamp(0.0, 100.0)
}

fn score_fit(
    persona: &Persona,
    skills: &[Skill],
    vectors: &PersonaVectors,
    job: &JobPosting,
    body_vec: Option<&Vec<f32>>,
    title_vec: Option<&Vec<f32>>,
) -> FitScoreResult {
    let hard_skill_names: Vec<String> = skills
        .iter()
        .filter(|s| s.skill_type == "Hard")
        .map(|s| s.skill_name.clone())
        .collect();

    // Hard skills blend semantic and literal matching.
    let hard_cosine = cosine_score(body_vec, &vectors.hard_skills);
    let hard_keywords = score_keyword_overlap(&job.job_title, &job.description, &hard_skill_names);
    let hard_skills = 0.5 * hard_cosine + 0.5 * hard_keywords;

    let soft_text_vec = body_vec;
    let soft_skills = cosine_score(soft_text_vec, &vectors.soft_skills);

    let experience_level = score_experience_alignment(
        persona.years_experience,
        job.years_experience_min,
        job.years_experience_max,
    );
    let role_title = cosine_score(title_vec, &vectors.role_interests);
    let location_logistics = score_work_model_alignment(
        Some(persona.remote_preference.as_str()),
        job.work_model.as_deref(),
    );

    calculate_fit_score(hard_skills, soft_skills, experience_level, role_title, location_logistics)
}

fn score_stretch(persona: &Persona, job: &JobPosting) -> StretchScoreResult {
    let target_role = if persona.target_roles.is_empty() {
        FIT_NEUTRAL_SCORE
    } else {
        persona
            .target_roles
            .iter()
            .map(|role| title_overlap_score(role, &job.job_title))
            .fold(0.0, f64::max)
    };

    let target_skills = score_keyword_overlap(&job.job_title, &job.description, &persona.target_skills);
    let growth_trajectory = growth_score(persona.years_experience, job.seniority_level.as_deref());

    let total = target_role * WEIGHT_TARGET_ROLE
        + target_skills * WEIGHT_TARGET_SKILLS
        + growth_trajectory * WEIGHT_GROWTH;
    StretchScoreResult {
        total: (total.round() as i64).clamp(0, 100),
        components: StretchComponents { target_role, target_skills, growth_trajectory },
    }
}

/// Overlap of normalized title tokens, as a 0–100 score.
fn title_overlap_score(a: &str, b: &str) -> f64 {
    let tokens_a: std::collections::HashSet<String> = a
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    let tokens_b: std::collections::HashSet<String> = b
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let overlap = tokens_a.intersection(&tokens_b).count() as f64;
    overlap / tokens_a.len().min(tokens_b.len()) as f64 * 100.0
}

/// Growth trajectory: a job one seniority step above the persona's mapped
/// level is the ideal stretch.
fn growth_score(persona_years: Option<i64>, job_seniority: Option<&str>) -> f64 {
    const ORDER: [&str; 5] = ["Entry", "Mid", "Senior", "Lead", "Executive"];
    let (Some(years), Some(seniority)) = (persona_years, job_seniority) else {
        return FIT_NEUTRAL_SCORE;
    };
    let Some(job_level) = ORDER.iter().position(|s| *s == seniority) else {
        return FIT_NEUTRAL_SCORE;
    };
    let persona_level = match years {
        y if y >= 16 => 4,
        y if y >= 11 => 3,
        y if y >= 6 => 2,
        y if y >= 3 => 1,
        _ => 0,
    };
    let diff = job_level as i64 - persona_level;
    match diff {
        1 => 100.0,
        0 => 80.0,
        _ => (80.0 - 25.0 * (diff - 1).abs() as f64).max(0.0),
    }
}

fn fallback_rationale(job: &JobPosting, fit: &FitScoreResult) -> String {
    format!(
        "Good match: {} at {} scored {} overall, with hard skills at {:.0} and \
         experience alignment at {:.0}.",
        job.job_title,
        job.company_name,
        fit.total,
        fit.components.hard_skills,
        fit.components.experience_level,
    )
}

/// The non-negotiable filter: every configured constraint must hold.
/// Returns the list of failed filter names (empty = passes).
pub fn check_non_negotiables(
    persona: &Persona,
    custom: &[CustomNonNegotiable],
    job: &JobPosting,
) -> Vec<String> {
    let mut failed = Vec::new();
    let job_text = format!(
        "{} {} {}",
        job.job_title,
        job.description,
        job.requirements.as_deref().unwrap_or("")
    )
    .to_lowercase();

    if let (Some(minimum), Some(salary_max)) = (persona.minimum_base_salary, job.salary_max) {
        if salary_max < minimum {
            failed.push("minimum_salary".to_string());
        }
    }

    if score_work_model_alignment(
        Some(persona.remote_preference.as_str()),
        job.work_model.as_deref(),
    ) == 0.0
    {
        failed.push("work_model".to_string());
    }

    // Commutable-city check only binds personas who would go onsite.
    if persona.remote_preference == "Onsite OK" && !persona.commutable_cities.is_empty() {
        if let Some(ref location) = job.location {
            let location_lower = location.to_lowercase();
            let commutable = persona
                .commutable_cities
                .iter()
                .any(|city| location_lower.contains(&city.to_lowercase()));
            if !commutable {
                failed.push("commutable_location".to_string());
            }
        }
    }

    for exclusion in &persona.industry_exclusions {
        let needle = exclusion.to_lowercase();
        if job.company_name.to_lowercase().contains(&needle) || job_text.contains(&needle) {
            failed.push(format!("industry_exclusion:{exclusion}"));
            break;
        }
    }

    if persona.visa_sponsorship_required
        && !job_text.contains("visa sponsorship")
        && !job_text.contains("sponsorship available")
    {
        failed.push("visa_sponsorship".to_string());
    }

    for rule in custom {
        let mentioned = job_text.contains(&rule.criterion.to_lowercase());
        if mentioned != rule.expected_answer {
            failed.push(format!("custom:{}", rule.criterion));
        }
    }

    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreatePersonaInput, CreatePersonaJob, CreateUserInput};
    use crate::db::repos::job_postings::test_support::make_posting;
    use crate::db::repos::{sources, users};
    use crate::engine::provider::mock::{MockEmbeddingProvider, MockLlmProvider};
    use crate::engine::provider::ProviderError;

    struct Fixture {
        pool: DbPool,
        user_id: String,
        persona_id: String,
        job_ids: Vec<String>,
    }

    fn setup(job_count: usize) -> Fixture {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user = users::create(&conn, CreateUserInput {
            email: format!("{}@example.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        let persona = personas::create(&conn, CreatePersonaInput {
            user_id: user.id.clone(),
            full_name: "Scoring Target".into(),
            email: "s@example.com".into(),
            years_experience: Some(5),
            target_roles: Some(vec!["Software Engineer".into()]),
            target_skills: Some(vec!["Rust".into()]),
            ..Default::default()
        }).unwrap();
        personas::add_skill(&conn, &persona.id, "Rust", "Hard").unwrap();
        personas::add_skill(&conn, &persona.id, "Communication", "Soft").unwrap();

        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        let mut job_ids = Vec::new();
        for i in 0..job_count {
            let job = job_postings::create(
                &conn,
                &make_posting(
                    &source_id,
                    "Software Engineer",
                    &format!("Ship Rust services, job number {i}"),
                ),
            )
            .unwrap();
            persona_jobs::create(
                &conn,
                &CreatePersonaJob {
                    persona_id: persona.id.clone(),
                    job_posting_id: job.id.clone(),
                    discovery_method: "scouter".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
            job_ids.push(job.id);
        }
        drop(conn);
        Fixture { pool, user_id: user.id, persona_id: persona.id, job_ids }
    }

    fn service(fixture: &Fixture, llm: MockLlmProvider) -> (ScoringService, Arc<MockEmbeddingProvider>) {
        let embedder = Arc::new(MockEmbeddingProvider::new());
        (
            ScoringService::new(fixture.pool.clone(), Arc::new(llm), embedder.clone()),
            embedder,
        )
    }

    #[tokio::test]
    async fn test_score_job_persists_to_link() {
        let fixture = setup(1);
        let (svc, _) = service(&fixture, MockLlmProvider::with_responses(vec!["Great fit.".into()]));

        let outcome = svc
            .score_job(&fixture.persona_id, &fixture.job_ids[0], &fixture.user_id)
            .await
            .unwrap();
        assert!(outcome.fit.is_some());
        assert!(outcome.stretch.is_some());
        assert!(outcome.failed_non_negotiables.is_empty());

        let conn = fixture.pool.get().unwrap();
        let link = persona_jobs::get_by_id(&conn, &outcome.persona_job_id, &fixture.user_id)
            .unwrap()
            .unwrap();
        assert_eq!(link.fit_score, outcome.fit.as_ref().map(|f| f.total));
        assert!(link.scored_at.is_some());
        let details = link.score_details.unwrap();
        assert!(details.get("fit").is_some());
        assert!(details.get("explanation").is_some());
    }

    #[tokio::test]
    async fn test_embeddings_generated_once_per_batch() {
        let fixture = setup(5);
        let (svc, embedder) = service(&fixture, MockLlmProvider::with_responses(vec!["ok".into()]));

        svc.score_batch(&fixture.persona_id, &fixture.job_ids, &fixture.user_id)
            .await
            .unwrap();

        // One call for the persona vectors, one batched call for job texts —
        // never a call per job.
        assert_eq!(embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_size_limit() {
        let fixture = setup(0);
        let (svc, _) = service(&fixture, MockLlmProvider::with_responses(vec![]));

        let too_many: Vec<String> = (0..=MAX_BATCH_SIZE).map(|i| format!("job-{i}")).collect();
        let err = svc
            .score_batch(&fixture.persona_id, &too_many, &fixture.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Empty input returns empty output.
        let empty = svc
            .score_batch(&fixture.persona_id, &[], &fixture.user_id)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let fixture = setup(1);
        let (svc, _) = service(&fixture, MockLlmProvider::with_responses(vec![]));

        let stranger = {
            let conn = fixture.pool.get().unwrap();
            users::create(&conn, CreateUserInput {
                email: format!("{}@other.com", uuid::Uuid::new_v4()),
                password_hash: None,
                is_admin: None,
            }).unwrap().id
        };
        let err = svc
            .score_batch(&fixture.persona_id, &fixture.job_ids, &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_negotiable_failure_nulls_scores() {
        let fixture = setup(0);
        let conn = fixture.pool.get().unwrap();

        // Remote-only persona vs onsite job: hard filter.
        conn.execute(
            "UPDATE personas SET remote_preference = 'Remote Only' WHERE id = ?1",
            rusqlite::params![fixture.persona_id],
        )
        .unwrap();
        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        let mut input = make_posting(&source_id, "Software Engineer", "Onsite Rust work");
        input.work_model = Some("Onsite".into());
        let job = job_postings::create(&conn, &input).unwrap();
        persona_jobs::create(
            &conn,
            &CreatePersonaJob {
                persona_id: fixture.persona_id.clone(),
                job_posting_id: job.id.clone(),
                discovery_method: "scouter".into(),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        drop(conn);

        let llm = MockLlmProvider::with_responses(vec!["should not run".into()]);
        let (svc, _) = service(&fixture, llm);
        let outcome = svc
            .score_job(&fixture.persona_id, &job.id, &fixture.user_id)
            .await
            .unwrap();
        assert!(outcome.fit.is_none());
        assert!(outcome.stretch.is_none());
        assert_eq!(outcome.failed_non_negotiables, vec!["work_model".to_string()]);

        let conn = fixture.pool.get().unwrap();
        let link = persona_jobs::get_by_id(&conn, &outcome.persona_job_id, &fixture.user_id)
            .unwrap()
            .unwrap();
        assert!(link.fit_score.is_none());
        assert_eq!(link.failed_non_negotiables, vec!["work_model".to_string()]);
    }

    #[tokio::test]
    async fn test_rationale_falls_back_on_llm_error() {
        let fixture = setup(1);
        let llm = MockLlmProvider::failing(ProviderError::RateLimit("429".into()));
        let (svc, _) = service(&fixture, llm);

        let outcome = svc
            .score_job(&fixture.persona_id, &fixture.job_ids[0], &fixture.user_id)
            .await
            .unwrap();
        // Scored fine; the explanation came from the template.
        assert!(outcome.fit.is_some());
        if outcome.fit.as_ref().unwrap().total >= RATIONALE_SCORE_THRESHOLD {
            assert!(outcome.explanation.starts_with("Good match:"));
        }
    }

    #[test]
    fn test_growth_score_prefers_one_step_up() {
        // 5 years → Mid; Senior is the step up.
        assert_eq!(growth_score(Some(5), Some("Senior")), 100.0);
        assert_eq!(growth_score(Some(5), Some("Mid")), 80.0);
        assert_eq!(growth_score(Some(5), Some("Executive")), 30.0);
        assert_eq!(growth_score(None, Some("Senior")), FIT_NEUTRAL_SCORE);
    }

    #[test]
    fn test_check_non_negotiables_salary_and_visa() {
        let fixture = setup(0);
        let conn = fixture.pool.get().unwrap();
        let mut persona = personas::get_by_id(&conn, &fixture.persona_id).unwrap();
        persona.minimum_base_salary = Some(150_000);
        persona.visa_sponsorship_required = true;

        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        let mut input = make_posting(&source_id, "Engineer", "No sponsorship mentioned");
        input.salary_max = Some(120_000);
        let job = job_postings::create(&conn, &input).unwrap();

        let failed = check_non_negotiables(&persona, &[], &job);
        assert!(failed.contains(&"minimum_salary".to_string()));
        assert!(failed.contains(&"visa_sponsorship".to_string()));
    }
}
