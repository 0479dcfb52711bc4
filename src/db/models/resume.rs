use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResume {
    pub id: String,
    pub persona_id: String,
    pub title: String,
    pub summary: String,
    pub is_primary: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A job-tailored resume variant. Snapshot fields stay NULL until the user
/// approves the draft; `job_bullet_order` is always populated at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVariant {
    pub id: String,
    pub base_resume_id: String,
    pub persona_id: String,
    pub job_posting_id: String,
    /// Draft | Approved | Archived
    pub status: String,
    pub modified_summary: Option<String>,
    pub job_bullet_order: Vec<String>,
    pub summary_snapshot: Option<String>,
    pub bullets_snapshot: Option<serde_json::Value>,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverLetter {
    pub id: String,
    pub persona_id: String,
    pub job_posting_id: String,
    pub job_variant_id: Option<String>,
    pub content: String,
    pub word_count: i64,
    /// Draft | Approved | Archived
    pub status: String,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One application per (persona, job). Snapshots the job description at
/// application time; the snapshot is immutable history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub persona_id: String,
    pub job_posting_id: String,
    pub persona_job_id: Option<String>,
    /// Applied | Interviewing | Offer | Accepted | Rejected | Withdrawn
    pub status: String,
    pub is_pinned: bool,
    pub archived_at: Option<String>,
    pub description_snapshot: String,
    /// Nullable side of the Application ↔ SubmittedPdf cycle.
    pub submitted_resume_pdf_id: Option<String>,
    pub applied_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable PDF blob attached to an application.
#[derive(Debug, Clone)]
pub struct SubmittedPdf {
    pub id: String,
    pub application_id: Option<String>,
    /// resume | cover_letter
    pub kind: String,
    pub content: Vec<u8>,
    pub generated_at: String,
}
