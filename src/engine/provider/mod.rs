//! LLM and embedding provider abstraction.
//!
//! Multiple providers (Claude-like, OpenAI-like, Gemini-like) share one
//! interface; the metered proxy wraps any concrete adapter uniformly.

pub mod claude;
pub mod gemini;
pub mod metered;
#[cfg(test)]
pub mod mock;
pub mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

// =============================================================================
// Task types
// =============================================================================

/// What the model call is for. Routing maps each task to a model per
/// provider; cost-sensitive tasks route to cheaper models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    SkillExtraction,
    ScoreRationale,
    CoverLetter,
    Tailoring,
    Chat,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SkillExtraction => "skill_extraction",
            TaskType::ScoreRationale => "score_rationale",
            TaskType::CoverLetter => "cover_letter",
            TaskType::Tailoring => "tailoring",
            TaskType::Chat => "chat",
        }
    }
}

// =============================================================================
// Messages and tools
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    /// Set on Tool-role messages to attach the result to its call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        LlmMessage { role: LlmRole::System, content: content.into(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        LlmMessage { role: LlmRole::User, content: content.into(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        LlmMessage { role: LlmRole::Assistant, content: content.into(), tool_call_id: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema parameters blob.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub json_mode: bool,
    pub model_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub finish_reason: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited: {0}")]
    RateLimit(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Context length exceeded: {0}")]
    ContextLength(String),
    #[error("Content filtered: {0}")]
    ContentFilter(String),
    #[error("Transient provider error: {0}")]
    Transient(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

impl ProviderError {
    /// RateLimit and Transient may be retried; the rest are fatal for the
    /// attempted call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimit(_) | ProviderError::Transient(_))
    }

    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::Auth(body),
            429 => ProviderError::RateLimit(body),
            500..=599 => ProviderError::Transient(body),
            _ => ProviderError::Provider(body),
        }
    }

    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ProviderError::Transient(err.to_string());
        }
        if let Some(status) = err.status() {
            return ProviderError::from_status(status, err.to_string());
        }
        ProviderError::Transient(err.to_string())
    }
}

// =============================================================================
// Provider traits
// =============================================================================

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider identifier used by routing and pricing rows
    /// ("claude", "openai", "gemini").
    fn provider_name(&self) -> &'static str;

    async fn complete(
        &self,
        messages: &[LlmMessage],
        task: TaskType,
        options: &CompleteOptions,
    ) -> Result<LlmResponse, ProviderError>;

    /// Stream content chunks. Adapters that cannot stream fall back to a
    /// single chunk from complete().
    async fn stream(
        &self,
        messages: &[LlmMessage],
        task: TaskType,
        options: &CompleteOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        let response = self.complete(messages, task, options).await?;
        let chunks = response.content.into_iter().map(Ok);
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    /// The adapter's built-in routing: which model serves this task when no
    /// override is supplied.
    fn get_model_for_task(&self, task: TaskType) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
    /// −1 signals a chunked batch where the per-chunk counts were not
    /// aggregated; the metered proxy estimates instead.
    pub total_tokens: i64,
}

/// Inputs beyond this ceiling are transparently chunked by adapters; in
/// that case total_tokens is reported as the −1 sentinel.
pub const EMBED_BATCH_CEILING: usize = 2048;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult, ProviderError>;
}

/// Shared HTTP client for provider adapters.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ProviderError::RateLimit("429".into()).is_retryable());
        assert!(ProviderError::Transient("503".into()).is_retryable());
        assert!(!ProviderError::Auth("401".into()).is_retryable());
        assert!(!ProviderError::ContextLength("too long".into()).is_retryable());
        assert!(!ProviderError::ContentFilter("blocked".into()).is_retryable());
    }

    #[test]
    fn test_task_type_strings() {
        assert_eq!(TaskType::SkillExtraction.as_str(), "skill_extraction");
        assert_eq!(TaskType::ScoreRationale.as_str(), "score_rationale");
        assert_eq!(TaskType::CoverLetter.as_str(), "cover_letter");
    }

    #[tokio::test]
    async fn test_default_stream_falls_back_to_complete() {
        use futures_util::StreamExt;

        let provider = mock::MockLlmProvider::with_responses(vec!["hello world".into()]);
        let mut stream = provider
            .stream(&[LlmMessage::user("hi")], TaskType::Chat, &CompleteOptions::default())
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "hello world");
        assert!(stream.next().await.is_none());
    }
}
