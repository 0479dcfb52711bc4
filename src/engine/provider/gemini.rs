//! Gemini-style generateContent adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    http_client, CompleteOptions, LlmMessage, LlmProvider, LlmResponse, LlmRole, ProviderError,
    TaskType,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "stopSequences", skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: i64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: i64,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        GeminiProvider { api_key, client: http_client() }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_name(&self) -> &'static str {
        "gemini"
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

        let system: Vec<Part> = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| Part { text: m.content.clone() })
            .collect();
        let contents: Vec<Content> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| Content {
                // Gemini names the assistant role "model".
                role: Some(match m.role {
                    LlmRole::Assistant => "model",
                    _ => "user",
                }),
                parts: vec![Part { text: m.content.clone() }],
            })
            .collect();

        let request = GenerateRequest {
            contents,
            system_instruction: (!system.is_empty()).then_some(Content { role: None, parts: system }),
            generation_config: GenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
                stop_sequences: options.stop_sequences.clone(),
                response_mime_type: options.json_mode.then_some("application/json"),
            },
        };

        let url = format!("{API_BASE}/{model}:generateContent?key={}", self.api_key);
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Provider(e.to_string()))?;

        let candidate = body
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::ContentFilter("no candidates returned".into()))?;
        let finish_reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".into());
        if finish_reason == "SAFETY" {
            return Err(ProviderError::ContentFilter("response blocked by safety".into()));
        }

        let content = candidate
            .content
            .and_then(|c| c.parts)
            .map(|parts| parts.into_iter().map(|p| p.text).collect::<String>());

        let usage = body.usage_metadata.unwrap_or(UsageMetadata {
            prompt_token_count: 0,
            candidates_token_count: 0,
        });

        Ok(LlmResponse {
            content,
            model,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            finish_reason,
            latency_ms: started.elapsed().as_millis() as u64,
            tool_calls: vec![],
        })
    }

    fn get_model_for_task(&self, task: TaskType) -> String {
        match task {
            TaskType::SkillExtraction | TaskType::ScoreRationale => "gemini-1.5-flash",
            TaskType::CoverLetter | TaskType::Tailoring | TaskType::Chat => "gemini-1.5-pro",
        }
        .to_string()
    }
}
