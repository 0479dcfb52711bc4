//! Anthropic-style messages API adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    http_client, CompleteOptions, LlmMessage, LlmProvider, LlmResponse, LlmRole, ProviderError,
    TaskType, ToolCall,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}

impl ClaudeProvider {
    pub fn new(api_key: String) -> Self {
        ClaudeProvider { api_key, client: http_client() }
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn provider_name(&self) -> &'static str {
        "claude"
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

        // System messages travel in the dedicated system field; tool results
        // are folded into user turns.
        let system = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let mut wire: Vec<WireMessage> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| WireMessage {
                role: match m.role {
                    LlmRole::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect();
        if options.json_mode {
            if let Some(last) = wire.last_mut() {
                last.content.push_str("\n\nRespond with valid JSON only.");
            }
        }

        let request = MessagesRequest {
            model,
            max_tokens: options.max_tokens.unwrap_or(1024),
            messages: wire,
            system: (!system.is_empty()).then_some(system),
            temperature: options.temperature,
            stop_sequences: options.stop_sequences.clone(),
            tools: options.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| WireTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.parameters.clone(),
                    })
                    .collect()
            }),
        };

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 400 && body.contains("prompt is too long") {
                return Err(ProviderError::ContextLength(body));
            }
            return Err(ProviderError::from_status(status, body));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Provider(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in body.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, arguments: input })
                }
            }
        }

        Ok(LlmResponse {
            content: (!content.is_empty()).then_some(content),
            model: body.model,
            input_tokens: body.usage.input_tokens,
            output_tokens: body.usage.output_tokens,
            finish_reason: body.stop_reason.unwrap_or_else(|| "unknown".into()),
            latency_ms: started.elapsed().as_millis() as u64,
            tool_calls,
        })
    }

    fn get_model_for_task(&self, task: TaskType) -> String {
        // Built-in routing, overridden by admin task routing when present.
        match task {
            TaskType::SkillExtraction => "claude-3-5-haiku-20241022",
            TaskType::ScoreRationale => "claude-3-5-haiku-20241022",
            TaskType::CoverLetter => "claude-sonnet-4-20250514",
            TaskType::Tailoring => "claude-sonnet-4-20250514",
            TaskType::Chat => "claude-sonnet-4-20250514",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_optimised_routing_for_extraction() {
        let provider = ClaudeProvider::new("test-key".into());
        assert!(provider.get_model_for_task(TaskType::SkillExtraction).contains("haiku"));
        assert!(provider.get_model_for_task(TaskType::CoverLetter).contains("sonnet"));
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(ClaudeProvider::new("k".into()).provider_name(), "claude");
    }
}
