use serde::{Deserialize, Serialize};

/// The per-user link between a persona and a pool posting. All
/// user-specific state (status, favorite, scores) lives here; at most one
/// link per (persona, job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaJob {
    pub id: String,
    pub persona_id: String,
    pub job_posting_id: String,
    /// scouter | manual | pool
    pub discovery_method: String,
    pub discovered_at: String,
    /// Discovered | Dismissed | Applied | Expired
    pub status: String,
    pub is_favorite: bool,
    pub fit_score: Option<i64>,
    pub stretch_score: Option<i64>,
    pub failed_non_negotiables: Vec<String>,
    pub score_details: Option<serde_json::Value>,
    pub scored_at: Option<String>,
    pub dismissed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreatePersonaJob {
    pub persona_id: String,
    pub job_posting_id: String,
    pub discovery_method: String,
    pub status: Option<String>,
    pub is_favorite: Option<bool>,
    pub fit_score: Option<i64>,
    pub stretch_score: Option<i64>,
    pub failed_non_negotiables: Option<Vec<String>>,
    pub score_details: Option<serde_json::Value>,
    pub scored_at: Option<String>,
}

/// Whitelisted user-state updates. `persona_id` and `job_posting_id` are
/// immutable — they are not representable here.
#[derive(Debug, Clone, Default)]
pub struct UpdatePersonaJob {
    pub status: Option<String>,
    pub is_favorite: Option<bool>,
    pub fit_score: Option<Option<i64>>,
    pub stretch_score: Option<Option<i64>>,
    pub failed_non_negotiables: Option<Vec<String>>,
    pub score_details: Option<serde_json::Value>,
    pub scored_at: Option<String>,
    pub dismissed_at: Option<Option<String>>,
}

pub const STATUS_DISCOVERED: &str = "Discovered";
pub const STATUS_DISMISSED: &str = "Dismissed";
pub const STATUS_APPLIED: &str = "Applied";
pub const STATUS_EXPIRED: &str = "Expired";

pub const DISCOVERY_SCOUTER: &str = "scouter";
pub const DISCOVERY_MANUAL: &str = "manual";
pub const DISCOVERY_POOL: &str = "pool";
