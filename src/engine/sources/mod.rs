//! External job-board source adapters.
//!
//! Each adapter fetches raw postings from one provider and returns a
//! canonical [`RawJob`] sequence. Fetching is side-effect-free with respect
//! to the shared pool; failures surface as a typed [`SourceError`] whose
//! retryability flag drives logging severity and backoff decisions upstream.

pub mod adzuna;
pub mod remoteok;
pub mod themuse;
pub mod usajobs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Canonical raw posting shape shared by all adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJob {
    pub external_id: Option<String>,
    pub title: String,
    pub company: String,
    pub description: String,
    pub source_url: Option<String>,
    pub location: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    /// YYYY-MM-DD when the source provides one.
    pub posted_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub keywords: Vec<String>,
    pub remote_only: bool,
    pub results_per_page: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            keywords: vec!["software".into(), "engineer".into()],
            remote_only: false,
            results_per_page: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceErrorKind {
    ApiDown,
    RateLimited,
    Auth,
    Parse,
    Timeout,
}

/// Typed adapter failure. `retryable` tells callers whether a backoff makes
/// sense; either way the orchestrator records the source and moves on.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            SourceErrorKind::ApiDown | SourceErrorKind::RateLimited | SourceErrorKind::Timeout
        );
        SourceError {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Map an HTTP transport/status failure to the adapter taxonomy.
    pub fn from_http(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return SourceError::new(SourceErrorKind::Timeout, err.to_string());
        }
        if let Some(status) = err.status() {
            return SourceError::from_status(status, err.to_string());
        }
        SourceError::new(SourceErrorKind::ApiDown, err.to_string())
    }

    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => SourceErrorKind::Auth,
            429 => SourceErrorKind::RateLimited,
            500..=599 => SourceErrorKind::ApiDown,
            _ => SourceErrorKind::Parse,
        };
        SourceError::new(kind, message)
    }
}

/// One external job-board provider.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Canonical source name (matches the allow-list and job_sources rows).
    fn name(&self) -> &'static str;

    async fn fetch_jobs(&self, params: &SearchParams) -> Result<Vec<RawJob>, SourceError>;
}

/// Resolve an adapter for a source name. The set of known names is closed;
/// unknown names yield None (caller logs a warning and skips).
pub fn resolve_adapter(name: &str, settings: &Settings) -> Option<Box<dyn SourceAdapter>> {
    match name {
        "Adzuna" => Some(Box::new(adzuna::AdzunaAdapter::new(
            settings.adzuna_app_id.clone(),
            settings.adzuna_app_key.clone(),
        ))),
        "RemoteOK" => Some(Box::new(remoteok::RemoteOkAdapter::new())),
        "TheMuse" => Some(Box::new(themuse::TheMuseAdapter::new())),
        "USAJobs" => Some(Box::new(usajobs::UsaJobsAdapter::new(
            settings.usajobs_api_key.clone(),
        ))),
        _ => None,
    }
}

/// Shared HTTP client builder for adapters: per-request timeout so a dead
/// source cannot stall the whole poll cycle.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent("Jobscout-Poller/1.0")
        .build()
        .unwrap_or_default()
}
