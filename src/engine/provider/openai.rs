//! OpenAI-style chat-completions and embeddings adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    http_client, CompleteOptions, EmbeddingProvider, EmbeddingResult, LlmMessage, LlmProvider,
    LlmResponse, LlmRole, ProviderError, TaskType, ToolCall, EMBED_BATCH_CEILING,
};

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const EMBEDDING_DIMENSIONS: usize = 1536;

pub struct OpenAiProvider {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        OpenAiProvider { api_key, client: http_client() }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        task: TaskType,
        options: &CompleteOptions,
    ) -> Result<LlmResponse, ProviderError> {
        let model = options
            .model_override
            .clone()
            .unwrap_or_else(|| self.get_model_for_task(task));

        let request = ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        LlmRole::System => "system",
                        LlmRole::User => "user",
                        LlmRole::Assistant => "assistant",
                        LlmRole::Tool => "tool",
                    },
                    content: m.content.clone(),
                    tool_call_id: m.tool_call_id.clone(),
                })
                .collect(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop: options.stop_sequences.clone(),
            response_format: options
                .json_mode
                .then(|| serde_json::json!({"type": "json_object"})),
            tools: options.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect()
            }),
        };

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 400 && body.contains("maximum context length") {
                return Err(ProviderError::ContextLength(body));
            }
            return Err(ProviderError::from_status(status, body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Provider(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Provider("empty choices".into()))?;
        let finish_reason = choice.finish_reason.unwrap_or_else(|| "unknown".into());
        if finish_reason == "content_filter" {
            return Err(ProviderError::ContentFilter("response filtered".into()));
        }

        Ok(LlmResponse {
            content: choice.message.content,
            model: body.model,
            input_tokens: body.usage.prompt_tokens,
            output_tokens: body.usage.completion_tokens,
            finish_reason,
            latency_ms: started.elapsed().as_millis() as u64,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: serde_json::from_str(&tc.function.arguments)
                        .unwrap_or(serde_json::Value::Null),
                })
                .collect(),
        })
    }

    fn get_model_for_task(&self, task: TaskType) -> String {
        match task {
            TaskType::SkillExtraction | TaskType::ScoreRationale => "gpt-4o-mini",
            TaskType::CoverLetter | TaskType::Tailoring | TaskType::Chat => "gpt-4o",
        }
        .to_string()
    }
}

// =============================================================================
// Embeddings
// =============================================================================

pub struct OpenAiEmbeddingProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
    model: String,
    usage: EmbedUsage,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedUsage {
    prompt_tokens: i64,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: String) -> Self {
        OpenAiEmbeddingProvider {
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            client: http_client(),
        }
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        let response = self
            .client
            .post(EMBED_URL)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(ProviderError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Provider(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult, ProviderError> {
        if texts.len() <= EMBED_BATCH_CEILING {
            let body = self.embed_chunk(texts).await?;
            return Ok(EmbeddingResult {
                vectors: body.data.into_iter().map(|d| d.embedding).collect(),
                model: body.model,
                dimensions: EMBEDDING_DIMENSIONS,
                total_tokens: body.usage.prompt_tokens,
            });
        }

        // Transparent chunking: token totals are not aggregated across
        // chunks, so callers get the −1 sentinel and estimate instead.
        let mut vectors = Vec::with_capacity(texts.len());
        let mut model = self.model.clone();
        for chunk in texts.chunks(EMBED_BATCH_CEILING) {
            let body = self.embed_chunk(chunk).await?;
            model = body.model;
            vectors.extend(body.data.into_iter().map(|d| d.embedding));
        }
        Ok(EmbeddingResult {
            vectors,
            model,
            dimensions: EMBEDDING_DIMENSIONS,
            total_tokens: -1,
        })
    }
}
