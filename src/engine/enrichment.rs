//! Batch enrichment of newly discovered postings.
//!
//! Two independent sub-stages: LLM skill/culture extraction and a
//! deterministic ghost-likelihood score. A single job's failure in either
//! stage never aborts the batch, and the stages fail independently.

use serde::{Deserialize, Serialize};

use crate::db::models::GhostSignals;
use crate::engine::provider::{CompleteOptions, LlmMessage, LlmProvider, TaskType};
use crate::engine::sources::RawJob;

/// Descriptions are truncated to this length before the extraction call.
const MAX_EXTRACTION_DESC_LEN: usize = 15_000;

// Ghost heuristics. Source-specific and tunable; the score is a likelihood,
// not a verdict.
const STALE_DAYS_HIGH: i64 = 45;
const STALE_DAYS_MEDIUM: i64 = 30;
const STALE_DAYS_LOW: i64 = 14;
const STALE_POINTS: [(i64, i64); 3] = [
    (STALE_DAYS_HIGH, 40),
    (STALE_DAYS_MEDIUM, 25),
    (STALE_DAYS_LOW, 10),
];
const REPOST_POINTS_EACH: i64 = 15;
const REPOST_POINTS_CAP: i64 = 45;
const MISSING_DATE_POINTS: i64 = 10;

/// Skills and culture text pulled out of a description by the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub preferred_skills: Vec<String>,
    #[serde(default)]
    pub culture_text: Option<String>,
    #[serde(default)]
    pub extraction_failed: bool,
}

/// A posting flowing through the fetch pipeline, annotated stage by stage.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub source_name: String,
    pub source_id: Option<String>,
    /// Set when the pool-membership check matched an existing row.
    pub pool_job_posting_id: Option<String>,
    pub raw: RawJob,
    pub extraction: Option<ExtractionResult>,
    pub ghost_score: Option<i64>,
    pub ghost_signals: Option<GhostSignals>,
}

impl PipelineJob {
    pub fn new(source_name: impl Into<String>, raw: RawJob) -> Self {
        PipelineJob {
            source_name: source_name.into(),
            source_id: None,
            pool_job_posting_id: None,
            raw,
            extraction: None,
            ghost_score: None,
            ghost_signals: None,
        }
    }
}

/// Strip zero-width characters that break tokenizers and keyword matching.
pub fn sanitize_description(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .collect()
}

const EXTRACTION_SYSTEM_PROMPT: &str = "You analyze job descriptions. Extract the required \
skills, the preferred (nice-to-have) skills, and any text describing company culture or values. \
Respond with a JSON object: {\"required_skills\": [string], \"preferred_skills\": [string], \
\"culture_text\": string or null}. Skills are short names like \"Python\" or \"Kubernetes\".";

/// Extract skills and culture from one description.
///
/// Never fails: any provider or parse error yields an empty result with
/// `extraction_failed` set so the job still proceeds through the pipeline.
pub async fn extract_skills_and_culture(
    llm: &dyn LlmProvider,
    description: &str,
) -> ExtractionResult {
    if description.trim().is_empty() {
        return ExtractionResult::default();
    }

    let sanitized = sanitize_description(description);
    let truncated = crate::engine::similarity::truncate_chars(&sanitized, MAX_EXTRACTION_DESC_LEN);

    let messages = [
        LlmMessage::system(EXTRACTION_SYSTEM_PROMPT),
        LlmMessage::user(truncated.to_string()),
    ];
    let options = CompleteOptions {
        max_tokens: Some(1024),
        temperature: Some(0.0),
        json_mode: true,
        ..Default::default()
    };

    let response = match llm.complete(&messages, TaskType::SkillExtraction, &options).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Skill extraction call failed");
            return ExtractionResult { extraction_failed: true, ..Default::default() };
        }
    };

    match response
        .content
        .as_deref()
        .map(serde_json::from_str::<ExtractionResult>)
    {
        Some(Ok(parsed)) => parsed,
        other => {
            tracing::warn!(parse_ok = false, "Skill extraction returned unusable content: {other:?}");
            ExtractionResult { extraction_failed: true, ..Default::default() }
        }
    }
}

/// Deterministic ghost-likelihood signals for one posting.
pub fn calculate_ghost_signals(
    posted_date: Option<&str>,
    repost_count: i64,
    today: chrono::NaiveDate,
) -> Option<GhostSignals> {
    let days_since_posted = match posted_date {
        Some(raw) => match chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some((today - date).num_days()),
            // Present but unparseable: the scorer cannot run for this job.
            Err(_) => return None,
        },
        None => None,
    };

    let mut score = 0i64;
    if let Some(days) = days_since_posted {
        for (threshold, points) in STALE_POINTS {
            if days >= threshold {
                score += points;
                break;
            }
        }
    } else {
        score += MISSING_DATE_POINTS;
    }
    score += (repost_count * REPOST_POINTS_EACH).min(REPOST_POINTS_CAP);

    Some(GhostSignals {
        ghost_score: score.clamp(0, 100),
        days_since_posted,
        repost_count,
        missing_posted_date: posted_date.is_none(),
    })
}

/// Ghost-score a batch in place. Per-job failures null that job's ghost
/// fields and leave the rest of the batch untouched.
pub fn calculate_ghost_scores(jobs: &mut [PipelineJob]) {
    let today = chrono::Utc::now().date_naive();
    for job in jobs.iter_mut() {
        match calculate_ghost_signals(job.raw.posted_date.as_deref(), 0, today) {
            Some(signals) => {
                job.ghost_score = Some(signals.ghost_score);
                job.ghost_signals = Some(signals);
            }
            None => {
                tracing::warn!(
                    external_id = ?job.raw.external_id,
                    "Ghost scoring failed for job; leaving unscored"
                );
                job.ghost_score = None;
                job.ghost_signals = None;
            }
        }
    }
}

/// Full enrichment: extraction then ghost scoring, both fail-forward.
pub async fn enrich_jobs(llm: &dyn LlmProvider, jobs: &mut Vec<PipelineJob>) {
    for job in jobs.iter_mut() {
        job.extraction = Some(extract_skills_and_culture(llm, &job.raw.description).await);
    }
    calculate_ghost_scores(jobs);
}
