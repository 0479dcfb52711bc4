//! Pure scoring functions shared by the full scoring pipeline and the
//! background surfacing worker. No database access, no side effects.

use serde::{Deserialize, Serialize};

use crate::db::models::{JobPosting, Persona, Skill};

/// Neutral component score when the data needed to judge is missing.
pub const FIT_NEUTRAL_SCORE: f64 = 70.0;

/// Fit component weights; they sum to 1.0.
pub const WEIGHT_HARD_SKILLS: f64 = 0.40;
pub const WEIGHT_SOFT_SKILLS: f64 = 0.15;
pub const WEIGHT_EXPERIENCE: f64 = 0.25;
pub const WEIGHT_ROLE_TITLE: f64 = 0.10;
pub const WEIGHT_LOCATION: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitComponents {
    pub hard_skills: f64,
    pub soft_skills: f64,
    pub experience_level: f64,
    pub role_title: f64,
    pub location_logistics: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitScoreResult {
    pub total: i64,
    pub components: FitComponents,
}

/// Weighted fit total from the five component scores (each 0–100).
pub fn calculate_fit_score(
    hard_skills: f64,
    soft_skills: f64,
    experience_level: f64,
    role_title: f64,
    location_logistics: f64,
) -> FitScoreResult {
    let total = hard_skills * WEIGHT_HARD_SKILLS
        + soft_skills * WEIGHT_SOFT_SKILLS
        + experience_level * WEIGHT_EXPERIENCE
        + role_title * WEIGHT_ROLE_TITLE
        + location_logistics * WEIGHT_LOCATION;
    FitScoreResult {
        total: (total.round() as i64).clamp(0, 100),
        components: FitComponents {
            hard_skills,
            soft_skills,
            experience_level,
            role_title,
            location_logistics,
        },
    }
}

// Work model alignment matrix: (persona preference, job work model) → score.
// "No Preference" always scores 100.
const WORK_MODEL_SCORES: [((&str, &str), f64); 9] = [
    (("Remote Only", "Remote"), 100.0),
    (("Remote Only", "Hybrid"), 30.0),
    (("Remote Only", "Onsite"), 0.0),
    (("Hybrid OK", "Remote"), 90.0),
    (("Hybrid OK", "Hybrid"), 100.0),
    (("Hybrid OK", "Onsite"), 40.0),
    (("Onsite OK", "Remote"), 80.0),
    (("Onsite OK", "Hybrid"), 90.0),
    (("Onsite OK", "Onsite"), 100.0),
];

/// True when any persona skill name appears in the job text
/// (case-insensitive substring match). Cheap gate before real scoring.
pub fn keyword_pre_screen(job_title: &str, job_description: &str, skill_names: &[String]) -> bool {
    if skill_names.is_empty() {
        return false;
    }
    let job_text = format!("{job_title} {job_description}").to_lowercase();
    skill_names
        .iter()
        .any(|skill| job_text.contains(&skill.to_lowercase()))
}

/// Experience alignment: within range = 100; below min loses 20 points per
/// missing year; above max loses 5 per extra year; missing data is neutral.
pub fn score_experience_alignment(
    persona_years: Option<i64>,
    job_years_min: Option<i64>,
    job_years_max: Option<i64>,
) -> f64 {
    let Some(years) = persona_years else {
        return FIT_NEUTRAL_SCORE;
    };
    if job_years_min.is_none() && job_years_max.is_none() {
        return FIT_NEUTRAL_SCORE;
    }

    if let Some(min) = job_years_min {
        if years < min {
            let gap = (min - years) as f64;
            return (100.0 - gap * 20.0).max(0.0);
        }
    }
    if let Some(max) = job_years_max {
        if years > max {
            let gap = (years - max) as f64;
            return (100.0 - gap * 5.0).max(0.0);
        }
    }
    100.0
}

pub fn score_work_model_alignment(
    persona_preference: Option<&str>,
    job_work_model: Option<&str>,
) -> f64 {
    let Some(preference) = persona_preference else {
        return 100.0;
    };
    if preference == "No Preference" {
        return 100.0;
    }
    let Some(work_model) = job_work_model else {
        return FIT_NEUTRAL_SCORE;
    };
    WORK_MODEL_SCORES
        .iter()
        .find(|((p, w), _)| *p == preference && *w == work_model)
        .map(|(_, score)| *score)
        .unwrap_or(FIT_NEUTRAL_SCORE)
}

/// Hard-skill keyword overlap: share of skills found in the job text,
/// scaled so 30%+ overlap saturates at 100.
pub fn score_keyword_overlap(
    job_title: &str,
    job_description: &str,
    skill_names: &[String],
) -> f64 {
    if skill_names.is_empty() {
        return FIT_NEUTRAL_SCORE;
    }
    let job_text = format!("{job_title} {job_description}").to_lowercase();
    let matches = skill_names
        .iter()
        .filter(|skill| job_text.contains(&skill.to_lowercase()))
        .count();
    let proportion = matches as f64 / skill_names.len() as f64;
    if proportion >= 0.3 {
        return 100.0;
    }
    (proportion / 0.3 * 1000.0).round() / 10.0
}

/// Lightweight fit without LLM or embedding calls: keyword overlap stands
/// in for hard skills; soft skills and role title take the neutral score.
pub fn calculate_lightweight_fit(
    job: &JobPosting,
    persona: &Persona,
    persona_skills: &[Skill],
) -> FitScoreResult {
    let hard_skill_names: Vec<String> = persona_skills
        .iter()
        .filter(|s| s.skill_type == "Hard")
        .map(|s| s.skill_name.clone())
        .collect();

    let hard_skills = score_keyword_overlap(&job.job_title, &job.description, &hard_skill_names);
    let experience_level = score_experience_alignment(
        persona.years_experience,
        job.years_experience_min,
        job.years_experience_max,
    );
    let location_logistics = score_work_model_alignment(
        Some(persona.remote_preference.as_str()),
        job.work_model.as_deref(),
    );

    calculate_fit_score(
        hard_skills,
        FIT_NEUTRAL_SCORE,
        experience_level,
        FIT_NEUTRAL_SCORE,
        location_logistics,
    )
}
