use serde::{Deserialize, Serialize};

/// A user's professional identity and matching preferences. One user may
/// own many personas; everything job-related that is user-specific hangs
/// off the persona, never off the shared pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub home_city: Option<String>,
    pub home_state: Option<String>,
    pub home_country: Option<String>,
    pub linkedin_url: Option<String>,
    pub portfolio_url: Option<String>,
    pub professional_summary: Option<String>,
    pub years_experience: Option<i64>,
    pub current_role: Option<String>,
    pub current_company: Option<String>,
    /// Free-form target role titles, JSON array of strings.
    pub target_roles: Vec<String>,
    pub target_skills: Vec<String>,
    pub commutable_cities: Vec<String>,
    pub industry_exclusions: Vec<String>,
    pub minimum_base_salary: Option<i64>,
    pub salary_currency: String,
    /// One of: Remote Only, Hybrid OK, Onsite OK, No Preference.
    pub remote_preference: String,
    pub visa_sponsorship_required: bool,
    pub stretch_appetite: String,
    pub minimum_fit_threshold: i64,
    pub auto_draft_threshold: i64,
    pub onboarding_complete: bool,
    /// One of: daily, twice_daily, weekly, manual_only.
    pub polling_frequency: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePersonaInput {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub years_experience: Option<i64>,
    pub target_roles: Option<Vec<String>>,
    pub target_skills: Option<Vec<String>>,
    pub commutable_cities: Option<Vec<String>>,
    pub industry_exclusions: Option<Vec<String>>,
    pub minimum_base_salary: Option<i64>,
    pub remote_preference: Option<String>,
    pub visa_sponsorship_required: Option<bool>,
    pub minimum_fit_threshold: Option<i64>,
    pub auto_draft_threshold: Option<i64>,
    pub onboarding_complete: Option<bool>,
    pub polling_frequency: Option<String>,
}

/// Skill owned by a persona; unique per (persona, skill_name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub persona_id: String,
    pub skill_name: String,
    /// "Hard" or "Soft".
    pub skill_type: String,
    pub years_used: Option<i64>,
    pub created_at: String,
}

/// One employment entry, with its bullets eagerly loaded in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkHistory {
    pub id: String,
    pub persona_id: String,
    pub company: String,
    pub title: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sort_order: i64,
    pub bullets: Vec<WorkHistoryBullet>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkHistoryBullet {
    pub id: String,
    pub work_history_id: String,
    pub text: String,
    pub sort_order: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Education {
    pub id: String,
    pub persona_id: String,
    pub institution: String,
    pub degree: Option<String>,
    pub field_of_study: Option<String>,
    pub graduation_year: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certification {
    pub id: String,
    pub persona_id: String,
    pub name: String,
    pub issuer: Option<String>,
    pub issued_year: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementStory {
    pub id: String,
    pub persona_id: String,
    pub title: String,
    pub situation: String,
    pub action: String,
    pub result: String,
    pub skills_demonstrated: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Writing-voice preferences used by cover-letter generation. At most one
/// per persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: String,
    pub persona_id: String,
    pub tone: String,
    pub formality: String,
    pub sample_text: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomNonNegotiable {
    pub id: String,
    pub persona_id: String,
    pub criterion: String,
    pub expected_answer: bool,
    pub created_at: String,
}

/// Dense vector attached to a persona. `vector` is a JSON array in the
/// database; the dimension must match the embedding model's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaEmbedding {
    pub id: String,
    pub persona_id: String,
    /// hard_skills | soft_skills | logistics
    pub embedding_type: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaChangeFlag {
    pub id: String,
    pub persona_id: String,
    pub field_name: String,
    pub resolved: bool,
    pub resolved_at: Option<String>,
    pub created_at: String,
}
