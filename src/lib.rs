//! Jobscout: a multi-tenant job-discovery platform.
//!
//! External job boards are polled per persona; postings land in a shared
//! global pool behind a 4-step dedup pipeline, per-persona links carry all
//! user state, a background worker surfaces fresh pool jobs to matching
//! personas, and LLM-backed scoring and content generation run through a
//! metered provider proxy with per-call billing.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;

use std::sync::Arc;

use crate::config::Settings;
use crate::engine::provider::{claude::ClaudeProvider, gemini::GeminiProvider, openai::OpenAiProvider, LlmProvider};
use crate::error::AppError;

/// Build the configured LLM provider for the process. Preference order:
/// Claude, OpenAI, Gemini — whichever has a key.
pub fn resolve_llm_provider(settings: &Settings) -> Result<Arc<dyn LlmProvider>, AppError> {
    if let Some(ref key) = settings.anthropic_api_key {
        return Ok(Arc::new(ClaudeProvider::new(key.clone())));
    }
    if let Some(ref key) = settings.openai_api_key {
        return Ok(Arc::new(OpenAiProvider::new(key.clone())));
    }
    if let Some(ref key) = settings.gemini_api_key {
        return Ok(Arc::new(GeminiProvider::new(key.clone())));
    }
    Err(AppError::Validation(
        "No LLM provider API key configured (ANTHROPIC_API_KEY, OPENAI_API_KEY, or GEMINI_API_KEY)"
            .into(),
    ))
}
