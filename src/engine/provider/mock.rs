//! Deterministic in-memory providers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CompleteOptions, EmbeddingProvider, EmbeddingResult, LlmMessage, LlmProvider, LlmResponse,
    ProviderError, TaskType,
};

/// Scripted LLM: pops queued responses in order, then repeats the last one.
/// Set `fail_with` to make every call error instead.
pub struct MockLlmProvider {
    responses: Mutex<Vec<String>>,
    pub fail_with: Option<ProviderError>,
    calls: AtomicUsize,
    last_model_override: Mutex<Option<String>>,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl MockLlmProvider {
    pub fn with_responses(mut responses: Vec<String>) -> Self {
        responses.reverse();
        MockLlmProvider {
            responses: Mutex::new(responses),
            fail_with: None,
            calls: AtomicUsize::new(0),
            last_model_override: Mutex::new(None),
            input_tokens: 1000,
            output_tokens: 500,
        }
    }

    pub fn failing(err: ProviderError) -> Self {
        let mut mock = Self::with_responses(vec![]);
        mock.fail_with = Some(err);
        mock
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn last_model_override(&self) -> Option<String> {
        self.last_model_override.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn provider_name(&self) -> &'static str {
        "claude"
    }

    async fn complete(
        &self,
        _messages: &[LlmMessage],
        task: TaskType,
        options: &CompleteOptions,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_model_override.lock().unwrap() = options.model_override.clone();

        if let Some(ref err) = self.fail_with {
            return Err(err.clone());
        }

        let content = {
            let mut queue = self.responses.lock().unwrap();
            match queue.len() {
                0 => "{}".to_string(),
                1 => queue[0].clone(),
                _ => queue.pop().unwrap(),
            }
        };

        Ok(LlmResponse {
            content: Some(content),
            model: options
                .model_override
                .clone()
                .unwrap_or_else(|| self.get_model_for_task(task)),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            finish_reason: "stop".into(),
            latency_ms: 5,
            tool_calls: vec![],
        })
    }

    fn get_model_for_task(&self, _task: TaskType) -> String {
        "mock-model".into()
    }
}

/// Embeddings derived from text bytes: deterministic, normalized, and
/// distinct for distinct inputs.
pub struct MockEmbeddingProvider {
    pub dimensions: usize,
    /// Reported total_tokens; use −1 to exercise the chunked-batch path.
    pub total_tokens: i64,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        MockEmbeddingProvider { dimensions: 8, total_tokens: 100, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                text.bytes()
                    .enumerate()
                    .filter(|(j, _)| j % self.dimensions == i)
                    .map(|(_, b)| b as f32)
                    .sum::<f32>()
                    + 1.0
            })
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(EmbeddingResult {
            vectors: texts.iter().map(|t| self.vector_for(t)).collect(),
            model: "mock-embed".into(),
            dimensions: self.dimensions,
            total_tokens: self.total_tokens,
        })
    }
}
