//! Application-material generation: tailoring decision, variant creation,
//! story selection, cover-letter draft, freshness check, and a combined
//! reasoning paragraph for the review screen.

use std::sync::Arc;

use crate::db::models::{
    AchievementStory, BaseResume, CoverLetter, JobPosting, Persona, VoiceProfile,
};
use crate::db::repos::{job_postings, persona_jobs, personas, resumes};
use crate::db::DbPool;
use crate::engine::provider::{CompleteOptions, LlmMessage, LlmProvider, TaskType};
use crate::error::AppError;

/// How many achievement stories feed the cover letter.
const STORY_SELECTION_LIMIT: usize = 3;

/// Fit components below this are flagged as tailoring signals.
const LOW_COMPONENT_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTrigger {
    Manual,
    AutoDraft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailoringAction {
    UseBase,
    CreateVariant,
}

#[derive(Debug, Clone)]
pub struct TailoringSignal {
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct TailoringDecision {
    pub action: TailoringAction,
    pub signals: Vec<TailoringSignal>,
    pub reasoning: String,
}

/// Everything the review screen needs after one generation run.
#[derive(Debug)]
pub struct GenerationResult {
    pub cover_letter: Option<CoverLetter>,
    pub tailoring_action: Option<TailoringAction>,
    pub tailoring_reasoning: Option<String>,
    pub selected_story_ids: Vec<String>,
    pub agent_reasoning: Option<String>,
    pub review_warning: Option<String>,
    pub duplicate_message: Option<String>,
    pub job_active: bool,
}

pub struct ContentGenerationService {
    pool: DbPool,
    llm: Arc<dyn LlmProvider>,
}

impl ContentGenerationService {
    pub fn new(pool: DbPool, llm: Arc<dyn LlmProvider>) -> Self {
        ContentGenerationService { pool, llm }
    }

    pub async fn generate(
        &self,
        user_id: &str,
        persona_id: &str,
        job_posting_id: &str,
        trigger: GenerationTrigger,
    ) -> Result<GenerationResult, AppError> {
        for (value, name) in [(user_id, "user_id"), (persona_id, "persona_id"), (job_posting_id, "job_posting_id")] {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!("{name} cannot be empty")));
            }
        }

        let (persona, job, base_resume, stories, voice, score_details) = {
            let conn = self.pool.get()?;
            let persona = personas::get_owned(&conn, persona_id, user_id)?
                .ok_or_else(|| AppError::NotFound(format!("Persona {persona_id}")))?;
            let job = job_postings::get_by_id(&conn, job_posting_id)?
                .ok_or_else(|| AppError::NotFound(format!("Job posting {job_posting_id}")))?;

            // Step 1: duplicate check. An in-flight draft or an approved
            // variant blocks new generation.
            if let Some(variant) =
                resumes::get_variant_for_persona_and_job(&conn, persona_id, job_posting_id)?
            {
                let message = match variant.status.as_str() {
                    "Draft" => Some(format!(
                        "Already working on this job — a draft variant ({}) exists for review.",
                        variant.id
                    )),
                    "Approved" => Some(
                        "A variant for this job is approved; editing is blocked. \
                         Archive it to regenerate."
                            .to_string(),
                    ),
                    _ => None,
                };
                if let Some(message) = message {
                    return Ok(GenerationResult {
                        cover_letter: None,
                        tailoring_action: None,
                        tailoring_reasoning: None,
                        selected_story_ids: vec![],
                        agent_reasoning: None,
                        review_warning: None,
                        duplicate_message: Some(message),
                        job_active: job.is_active,
                    });
                }
            }

            // Step 2: base resume.
            let base_resume = resumes::get_primary_base_resume(&conn, persona_id)?
                .ok_or_else(|| AppError::NotFound(format!("Base resume for persona {persona_id}")))?;

            let stories = personas::get_stories(&conn, persona_id)?;
            let voice = personas::get_voice_profile(&conn, persona_id)?;
            let score_details = persona_jobs::get_by_persona_and_job(
                &conn,
                persona_id,
                job_posting_id,
                Some(user_id),
            )?
            .and_then(|link| link.score_details);

            (persona, job, base_resume, stories, voice, score_details)
        };

        // Step 3: tailoring decision from observable signals.
        let decision = evaluate_tailoring(&base_resume, &job, score_details.as_ref());

        // Step 4: conditional variant creation.
        if decision.action == TailoringAction::CreateVariant {
            self.create_variant(&base_resume, persona_id, &job, &decision)?;
        }

        // Step 5: story selection.
        let selected = select_stories(&stories, &job);
        let selected_ids: Vec<String> = selected.iter().map(|s| s.id.clone()).collect();

        // Step 6: cover-letter draft.
        let cover_letter = self
            .draft_cover_letter(&persona, &job, &selected, voice.as_ref(), &decision, trigger)
            .await?;

        // Step 7: freshness check — warn but still return the draft.
        let review_warning = freshness_warning(&job);

        // Step 8: one combined reasoning paragraph.
        let agent_reasoning = build_reasoning(&decision, &selected, &job);

        Ok(GenerationResult {
            cover_letter: Some(cover_letter),
            tailoring_action: Some(decision.action),
            tailoring_reasoning: Some(decision.reasoning),
            selected_story_ids: selected_ids,
            agent_reasoning: Some(agent_reasoning),
            review_warning,
            duplicate_message: None,
            job_active: job.is_active,
        })
    }

    fn create_variant(
        &self,
        base_resume: &BaseResume,
        persona_id: &str,
        job: &JobPosting,
        decision: &TailoringDecision,
    ) -> Result<(), AppError> {
        let conn = self.pool.get()?;

        // Bullet order: most relevant employment bullets first, judged by
        // keyword overlap with the job text.
        let histories = personas::get_work_histories(&conn, persona_id)?;
        let job_text = format!("{} {}", job.job_title, job.description).to_lowercase();
        let mut bullets: Vec<(String, usize)> = histories
            .iter()
            .flat_map(|h| h.bullets.iter())
            .map(|b| {
                let hits = b
                    .text
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|word| word.len() > 3 && job_text.contains(*word))
                    .count();
                (b.id.clone(), hits)
            })
            .collect();
        bullets.sort_by(|a, b| b.1.cmp(&a.1));
        let order: Vec<String> = bullets.into_iter().map(|(id, _)| id).collect();
        let order = if order.is_empty() {
            // Variant with no employment bullets still needs an order row.
            vec![format!("summary:{}", base_resume.id)]
        } else {
            order
        };

        let modified_summary = format!(
            "{} Focused on {} at {}.",
            base_resume.summary.trim_end_matches('.').trim(),
            job.job_title,
            job.company_name
        );

        resumes::create_draft_variant(
            &conn,
            &base_resume.id,
            persona_id,
            &job.id,
            Some(&modified_summary),
            &order,
        )?;
        tracing::info!(
            job_id = %job.id,
            signals = decision.signals.len(),
            "Created draft variant"
        );
        Ok(())
    }

    async fn draft_cover_letter(
        &self,
        persona: &Persona,
        job: &JobPosting,
        stories: &[&AchievementStory],
        voice: Option<&VoiceProfile>,
        decision: &TailoringDecision,
        trigger: GenerationTrigger,
    ) -> Result<CoverLetter, AppError> {
        let tone = voice.map(|v| v.tone.as_str()).unwrap_or("professional");
        let story_text = stories
            .iter()
            .map(|s| format!("- {}: {} {} {}", s.title, s.situation, s.action, s.result))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = [
            LlmMessage::system(format!(
                "You write cover letters in a {tone} voice. Between 200 and 350 words, \
                 one page, no salutation placeholders. Ground every claim in the \
                 provided stories; never invent experience."
            )),
            LlmMessage::user(format!(
                "Candidate: {} ({}). Applying to: {} at {}.\n\nJob description:\n{}\n\n\
                 Achievement stories:\n{}\n\nTailoring notes: {}",
                persona.full_name,
                persona.professional_summary.as_deref().unwrap_or(""),
                job.job_title,
                job.company_name,
                crate::engine::similarity::truncate_chars(&job.description, 6000),
                story_text,
                decision.reasoning,
            )),
        ];
        let options = CompleteOptions {
            max_tokens: Some(800),
            temperature: Some(0.7),
            ..Default::default()
        };

        let response = self
            .llm
            .complete(&messages, TaskType::CoverLetter, &options)
            .await?;
        let content = response
            .content
            .ok_or_else(|| AppError::Internal("cover letter response had no content".into()))?;

        let conn = self.pool.get()?;
        let variant_id = resumes::get_variant_for_persona_and_job(&conn, &persona.id, &job.id)?
            .map(|v| v.id);
        let letter = resumes::create_draft_cover_letter(
            &conn,
            &persona.id,
            &job.id,
            variant_id.as_deref(),
            &content,
        )?;
        tracing::info!(
            job_id = %job.id,
            words = letter.word_count,
            trigger = ?trigger,
            "Cover letter drafted"
        );
        Ok(letter)
    }
}

// ---------------------------------------------------------------------------
// Pure steps
// ---------------------------------------------------------------------------

/// Decide whether the base resume suffices or a tailored variant is
/// warranted, from missing keywords, weak score components, and
/// role-title divergence.
pub fn evaluate_tailoring(
    base_resume: &BaseResume,
    job: &JobPosting,
    score_details: Option<&serde_json::Value>,
) -> TailoringDecision {
    let mut signals = Vec::new();

    // Missing keywords: requirement terms absent from the resume summary.
    if let Some(ref requirements) = job.requirements {
        let summary_lower = base_resume.summary.to_lowercase();
        let missing: Vec<&str> = requirements
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty() && !summary_lower.contains(&term.to_lowercase()))
            .take(5)
            .collect();
        if !missing.is_empty() {
            signals.push(TailoringSignal {
                detail: format!("Missing keywords: {}", missing.join(", ")),
            });
        }
    }

    // Weak fit components from the stored score breakdown.
    if let Some(details) = score_details {
        if let Some(components) = details
            .get("fit")
            .and_then(|f| f.get("components"))
            .and_then(|c| c.as_object())
        {
            for (name, value) in components {
                if let Some(score) = value.as_f64() {
                    if score < LOW_COMPONENT_THRESHOLD {
                        signals.push(TailoringSignal {
                            detail: format!("Low {name} component ({score:.0})"),
                        });
                    }
                }
            }
        }
    }

    // Role-title divergence between the resume's framing and the job.
    let title_lower = job.job_title.to_lowercase();
    let resume_title_lower = base_resume.title.to_lowercase();
    let shares_token = resume_title_lower
        .split_whitespace()
        .any(|word| word.len() > 3 && title_lower.contains(word));
    if !shares_token {
        signals.push(TailoringSignal {
            detail: format!(
                "Role title divergence: resume '{}' vs job '{}'",
                base_resume.title, job.job_title
            ),
        });
    }

    if signals.is_empty() {
        TailoringDecision {
            action: TailoringAction::UseBase,
            signals,
            reasoning: "Base resume already aligns with this posting; no tailoring needed.".into(),
        }
    } else {
        let details: Vec<&str> = signals.iter().map(|s| s.detail.as_str()).collect();
        TailoringDecision {
            reasoning: format!("Tailoring recommended: {}.", details.join("; ")),
            action: TailoringAction::CreateVariant,
            signals,
        }
    }
}

/// Top stories by overlap between demonstrated skills and the job text.
pub fn select_stories<'a>(
    stories: &'a [AchievementStory],
    job: &JobPosting,
) -> Vec<&'a AchievementStory> {
    let job_text = format!(
        "{} {} {}",
        job.job_title,
        job.description,
        job.requirements.as_deref().unwrap_or("")
    )
    .to_lowercase();

    let mut scored: Vec<(&AchievementStory, usize)> = stories
        .iter()
        .map(|story| {
            let hits = story
                .skills_demonstrated
                .iter()
                .filter(|skill| job_text.contains(&skill.to_lowercase()))
                .count();
            (story, hits)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let relevant: Vec<&AchievementStory> = scored
        .iter()
        .filter(|(_, hits)| *hits > 0)
        .take(STORY_SELECTION_LIMIT)
        .map(|(story, _)| *story)
        .collect();
    if !relevant.is_empty() {
        return relevant;
    }
    // Nothing matched: fall back to the first stories rather than none.
    stories.iter().take(STORY_SELECTION_LIMIT).collect()
}

fn freshness_warning(job: &JobPosting) -> Option<String> {
    if !job.is_active || job.expired_at.is_some() {
        return Some(
            "This posting appears expired or inactive — review before sending.".to_string(),
        );
    }
    if let Some(ref deadline) = job.application_deadline {
        if deadline.as_str() < crate::db::today_ymd().as_str() {
            return Some(format!(
                "The application deadline ({deadline}) has passed — review before sending."
            ));
        }
    }
    None
}

fn build_reasoning(
    decision: &TailoringDecision,
    stories: &[&AchievementStory],
    job: &JobPosting,
) -> String {
    let tailoring = match decision.action {
        TailoringAction::UseBase => "kept the base resume".to_string(),
        TailoringAction::CreateVariant => format!(
            "created a tailored variant ({} signals)",
            decision.signals.len()
        ),
    };
    let story_titles: Vec<&str> = stories.iter().map(|s| s.title.as_str()).collect();
    format!(
        "For {} at {}: {}; selected {} stories ({}). {}",
        job.job_title,
        job.company_name,
        tailoring,
        stories.len(),
        story_titles.join(", "),
        decision.reasoning
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreatePersonaInput, CreateUserInput, UpdateJobPosting};
    use crate::db::repos::job_postings::test_support::make_posting;
    use crate::db::repos::sources;
    use crate::engine::provider::mock::MockLlmProvider;

    struct Fixture {
        pool: DbPool,
        user_id: String,
        persona_id: String,
        job_id: String,
        base_resume_id: String,
    }

    fn setup() -> Fixture {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user = crate::db::repos::users::create(&conn, CreateUserInput {
            email: format!("{}@example.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        let persona = personas::create(&conn, CreatePersonaInput {
            user_id: user.id.clone(),
            full_name: "Gen Tester".into(),
            email: "g@example.com".into(),
            ..Default::default()
        }).unwrap();
        let resume = resumes::create_base_resume(
            &conn,
            &persona.id,
            "Software Engineer Resume",
            "Software engineer shipping Rust services.",
            true,
        )
        .unwrap();
        personas::add_story(
            &conn,
            &persona.id,
            "Cut latency in half",
            "Slow checkout",
            "Profiled and rewrote the hot path in Rust",
            "P99 dropped 50%",
            &["Rust".to_string()],
        )
        .unwrap();
        personas::add_story(
            &conn,
            &persona.id,
            "Organized a bake sale",
            "Team morale",
            "Baked",
            "Happy team",
            &["Baking".to_string()],
        )
        .unwrap();
        let source_id = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        let mut input = make_posting(&source_id, "Software Engineer", "Ship Rust services at scale");
        input.requirements = Some("Rust, Kubernetes".into());
        let job = job_postings::create(&conn, &input).unwrap();
        drop(conn);
        Fixture {
            pool,
            user_id: user.id,
            persona_id: persona.id,
            job_id: job.id,
            base_resume_id: resume.id,
        }
    }

    fn service(fixture: &Fixture) -> ContentGenerationService {
        let llm = MockLlmProvider::with_responses(vec![
            "Dear hiring team, I build fast Rust services and would love to help.".into(),
        ]);
        ContentGenerationService::new(fixture.pool.clone(), Arc::new(llm))
    }

    #[tokio::test]
    async fn test_full_generation_run() {
        let fixture = setup();
        let svc = service(&fixture);

        let result = svc
            .generate(&fixture.user_id, &fixture.persona_id, &fixture.job_id, GenerationTrigger::Manual)
            .await
            .unwrap();

        assert!(result.cover_letter.is_some());
        assert!(result.duplicate_message.is_none());
        assert!(result.review_warning.is_none());
        assert!(result.job_active);
        // The relevant story was selected; the bake sale was not.
        assert_eq!(result.selected_story_ids.len(), 1);
        assert!(result.agent_reasoning.unwrap().contains("Cut latency in half"));

        let letter = result.cover_letter.unwrap();
        assert_eq!(letter.status, "Draft");
        assert!(letter.word_count > 0);
    }

    #[tokio::test]
    async fn test_duplicate_draft_blocks_generation() {
        let fixture = setup();
        {
            let conn = fixture.pool.get().unwrap();
            resumes::create_draft_variant(
                &conn,
                &fixture.base_resume_id,
                &fixture.persona_id,
                &fixture.job_id,
                None,
                &["b1".into()],
            )
            .unwrap();
        }

        let svc = service(&fixture);
        let result = svc
            .generate(&fixture.user_id, &fixture.persona_id, &fixture.job_id, GenerationTrigger::Manual)
            .await
            .unwrap();

        assert!(result.cover_letter.is_none());
        let message = result.duplicate_message.unwrap();
        assert!(message.to_lowercase().contains("already working"));
    }

    #[tokio::test]
    async fn test_approved_variant_blocks_editing() {
        let fixture = setup();
        {
            let conn = fixture.pool.get().unwrap();
            let variant = resumes::create_draft_variant(
                &conn,
                &fixture.base_resume_id,
                &fixture.persona_id,
                &fixture.job_id,
                None,
                &["b1".into()],
            )
            .unwrap();
            conn.execute(
                "UPDATE job_variants SET status = 'Approved' WHERE id = ?1",
                rusqlite::params![variant.id],
            )
            .unwrap();
        }

        let svc = service(&fixture);
        let result = svc
            .generate(&fixture.user_id, &fixture.persona_id, &fixture.job_id, GenerationTrigger::AutoDraft)
            .await
            .unwrap();
        assert!(result.cover_letter.is_none());
        assert!(result.duplicate_message.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn test_expired_job_warns_but_still_drafts() {
        let fixture = setup();
        {
            let conn = fixture.pool.get().unwrap();
            job_postings::update(
                &conn,
                &fixture.job_id,
                &UpdateJobPosting {
                    is_active: Some(false),
                    expired_at: Some(chrono::Utc::now().to_rfc3339()),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let svc = service(&fixture);
        let result = svc
            .generate(&fixture.user_id, &fixture.persona_id, &fixture.job_id, GenerationTrigger::Manual)
            .await
            .unwrap();

        assert!(result.cover_letter.is_some());
        let warning = result.review_warning.unwrap();
        assert!(warning.to_lowercase().contains("expired"));
        assert!(!result.job_active);
    }

    #[tokio::test]
    async fn test_rejects_empty_ids() {
        let fixture = setup();
        let svc = service(&fixture);
        let err = svc
            .generate("", &fixture.persona_id, &fixture.job_id, GenerationTrigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_tailoring_signals_drive_variant_creation() {
        let fixture = setup();
        let conn = fixture.pool.get().unwrap();
        let base = resumes::get_primary_base_resume(&conn, &fixture.persona_id)
            .unwrap()
            .unwrap();
        let job = job_postings::get_by_id(&conn, &fixture.job_id).unwrap().unwrap();

        // Kubernetes is missing from the summary → tailoring signal.
        let decision = evaluate_tailoring(&base, &job, None);
        assert_eq!(decision.action, TailoringAction::CreateVariant);
        assert!(decision.reasoning.contains("Kubernetes"));

        // A resume that mentions everything and shares the title: use base.
        let mut aligned = base.clone();
        aligned.summary = "Software engineer: Rust, Kubernetes.".into();
        aligned.title = "Software Engineer".into();
        let decision = evaluate_tailoring(&aligned, &job, None);
        assert_eq!(decision.action, TailoringAction::UseBase);
    }
}
