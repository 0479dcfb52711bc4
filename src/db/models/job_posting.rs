use serde::{Deserialize, Serialize};

// ============================================================================
// AlsoFoundOn — typed envelope for the also_found_on JSON column
// ============================================================================

/// One source entry in a posting's cross-source tracking blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlsoFoundOnSource {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub found_at: String,
}

/// Structured envelope for the `also_found_on` JSON column. The dedup
/// pipeline always writes a rebuilt value rather than mutating in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlsoFoundOn {
    #[serde(default)]
    pub sources: Vec<AlsoFoundOnSource>,
}

impl AlsoFoundOn {
    /// Parse from the raw column value; NULL or garbage yields the empty
    /// envelope rather than an error.
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"sources":[]}"#.to_string())
    }
}

// ============================================================================
// Ghost signals
// ============================================================================

/// Structured signals backing a ghost-likelihood score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GhostSignals {
    pub ghost_score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_since_posted: Option<i64>,
    pub repost_count: i64,
    pub missing_posted_date: bool,
}

// ============================================================================
// JobPosting
// ============================================================================

/// A single canonical posting in the shared pool (Tier 0). Carries no
/// per-user state; that lives on persona_jobs links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: String,
    pub source_id: String,
    /// Source-unique when present.
    pub external_id: Option<String>,
    pub also_found_on: AlsoFoundOn,
    pub job_title: String,
    pub company_name: String,
    pub company_url: Option<String>,
    pub source_url: Option<String>,
    pub apply_url: Option<String>,
    pub location: Option<String>,
    /// Remote | Hybrid | Onsite
    pub work_model: Option<String>,
    /// Entry | Mid | Senior | Lead | Executive
    pub seniority_level: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub description: String,
    /// SHA-256 hex digest of the description; unique across the pool.
    pub description_hash: String,
    pub culture_text: Option<String>,
    /// Required skills from extraction, comma-joined.
    pub requirements: Option<String>,
    /// Nice-to-have skills from extraction, comma-joined.
    pub preferred_skills: Option<String>,
    pub raw_text: Option<String>,
    pub years_experience_min: Option<i64>,
    pub years_experience_max: Option<i64>,
    pub posted_date: Option<String>,
    pub application_deadline: Option<String>,
    pub first_seen_date: String,
    pub is_active: bool,
    /// Invisible to the surfacing worker while set.
    pub is_quarantined: bool,
    pub quarantined_until: Option<String>,
    pub ghost_score: i64,
    pub ghost_signals: Option<GhostSignals>,
    pub repost_count: i64,
    /// Repost chain, newest predecessor first.
    pub previous_posting_ids: Vec<String>,
    pub last_verified_at: Option<String>,
    pub expired_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Required + optional fields accepted by pool create.
#[derive(Debug, Clone, Default)]
pub struct CreateJobPosting {
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
    pub culture_text: Option<String>,
    pub requirements: Option<String>,
    pub preferred_skills: Option<String>,
    pub raw_text: Option<String>,
    pub years_experience_min: Option<i64>,
    pub years_experience_max: Option<i64>,
}

/// The whitelisted mutable field set for pool updates. `id`, `source_id`
/// and `created_at` are immutable — this struct simply has no such fields,
/// so passing them is a compile error rather than a runtime one.
#[derive(Debug, Clone, Default)]
pub struct UpdateJobPosting {
    pub external_id: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub company_url: Option<String>,
    pub source_url: Option<String>,
    pub apply_url: Option<String>,
    pub location: Option<String>,
    pub work_model: Option<String>,
    pub seniority_level: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub description: Option<String>,
    pub description_hash: Option<String>,
    pub culture_text: Option<String>,
    pub requirements: Option<String>,
    pub preferred_skills: Option<String>,
    pub raw_text: Option<String>,
    pub years_experience_min: Option<i64>,
    pub years_experience_max: Option<i64>,
    pub posted_date: Option<String>,
    pub application_deadline: Option<String>,
    pub first_seen_date: Option<String>,
    pub last_verified_at: Option<String>,
    pub expired_at: Option<String>,
    pub ghost_score: Option<i64>,
    pub ghost_signals: Option<GhostSignals>,
    pub repost_count: Option<i64>,
    pub previous_posting_ids: Option<Vec<String>>,
    pub also_found_on: Option<AlsoFoundOn>,
    pub is_active: Option<bool>,
    pub is_quarantined: Option<bool>,
    pub quarantined_until: Option<Option<String>>,
}

/// A job source row (Adzuna, RemoteOK, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSource {
    pub id: String,
    pub source_name: String,
    pub source_type: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_also_found_on_parse_handles_garbage() {
        assert_eq!(AlsoFoundOn::parse(None).sources.len(), 0);
        assert_eq!(AlsoFoundOn::parse(Some("not json")).sources.len(), 0);

        let parsed = AlsoFoundOn::parse(Some(
            r#"{"sources":[{"source_id":"s1","found_at":"2026-01-01T00:00:00Z"}]}"#,
        ));
        assert_eq!(parsed.sources.len(), 1);
        assert_eq!(parsed.sources[0].source_id, "s1");
    }

    #[test]
    fn test_also_found_on_roundtrip() {
        let envelope = AlsoFoundOn {
            sources: vec![AlsoFoundOnSource {
                source_id: "s1".into(),
                external_id: Some("E-1".into()),
                source_url: None,
                found_at: "2026-01-01T00:00:00Z".into(),
            }],
        };
        let parsed = AlsoFoundOn::parse(Some(&envelope.to_json_string()));
        assert_eq!(parsed, envelope);
    }
}
