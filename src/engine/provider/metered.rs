//! Metered provider proxies.
//!
//! Wrap a real LLM/embedding adapter, resolve routing from the admin
//! registry, and record usage + debit the user's balance after each
//! successful call. Metering failures are logged but never convert a
//! successful provider call into a failure — the user already received
//! the value.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::{
    CompleteOptions, EmbeddingProvider, EmbeddingResult, LlmMessage, LlmProvider, LlmResponse,
    ProviderError, TaskType,
};
use crate::db::models::{apply_margin, token_cost_micros};
use crate::db::repos::{admin_config, metering};
use crate::db::{today_ymd, DbPool};
use crate::error::AppError;

pub struct MeteredLlmProvider {
    inner: Arc<dyn LlmProvider>,
    pool: DbPool,
    user_id: String,
}

impl MeteredLlmProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, pool: DbPool, user_id: impl Into<String>) -> Self {
        MeteredLlmProvider { inner, pool, user_id: user_id.into() }
    }

    /// Resolve the admin-configured model for this (provider, task).
    /// Fail-closed: lookup errors propagate and block the call. A missing
    /// routing row is not an error — the inner adapter's own routing
    /// applies.
    fn resolve_model(&self, task: TaskType) -> Result<Option<String>, ProviderError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| ProviderError::Provider(format!("routing lookup failed: {e}")))?;
        admin_config::get_model_for_task(&conn, self.inner.provider_name(), task.as_str())
            .map_err(|e| ProviderError::Provider(format!("routing lookup failed: {e}")))
    }

    fn record_and_debit(
        &self,
        task_type: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<(), AppError> {
        let mut conn = self.pool.get()?;
        let today = today_ymd();
        let pricing = admin_config::current_pricing(&conn, self.inner.provider_name(), model, &today)?
            .ok_or_else(|| {
                AppError::conflict(
                    "NO_PRICING_CONFIG",
                    format!(
                        "no current pricing for {}/{model}; usage not billed",
                        self.inner.provider_name()
                    ),
                )
            })?;

        let raw = token_cost_micros(input_tokens, pricing.input_cost_per_1k_micros)
            + token_cost_micros(output_tokens, pricing.output_cost_per_1k_micros);
        let billed = apply_margin(raw, pricing.margin_multiplier);

        metering::record_usage_and_debit(
            &mut conn,
            &self.user_id,
            self.inner.provider_name(),
            model,
            task_type,
            input_tokens,
            output_tokens,
            raw,
            billed,
            pricing.margin_multiplier,
        )?;
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for MeteredLlmProvider {
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        task: TaskType,
        options: &CompleteOptions,
    ) -> Result<LlmResponse, ProviderError> {
        // Routing from the registry wins over any caller-supplied override.
        let resolved = self.resolve_model(task)?;
        let mut effective = options.clone();
        if resolved.is_some() {
            effective.model_override = resolved;
        }

        let response = self.inner.complete(messages, task, &effective).await?;

        if let Err(e) = self.record_and_debit(
            task.as_str(),
            &response.model,
            response.input_tokens.max(0),
            response.output_tokens.max(0),
        ) {
            tracing::error!(
                user_id = %self.user_id,
                provider = self.inner.provider_name(),
                model = %response.model,
                error = %e,
                "Failed to record metered usage"
            );
        }

        Ok(response)
    }

    /// Streaming passes through unmetered; stream-mode metering is deferred
    /// until stream() is used outside development.
    async fn stream(
        &self,
        messages: &[LlmMessage],
        task: TaskType,
        options: &CompleteOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        self.inner.stream(messages, task, options).await
    }

    fn get_model_for_task(&self, task: TaskType) -> String {
        self.inner.get_model_for_task(task)
    }
}

pub struct MeteredEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    pool: DbPool,
    user_id: String,
}

impl MeteredEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, pool: DbPool, user_id: impl Into<String>) -> Self {
        MeteredEmbeddingProvider { inner, pool, user_id: user_id.into() }
    }
}

#[async_trait]
impl EmbeddingProvider for MeteredEmbeddingProvider {
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    /// The embedding model is fixed by configuration, so the route table is
    /// bypassed; only pricing lookup and the debit apply.
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult, ProviderError> {
        let result = self.inner.embed(texts).await?;

        let mut input_tokens = result.total_tokens;
        if input_tokens < 0 {
            // Chunked batch sentinel: estimate tokens from text length.
            input_tokens = texts.iter().map(|t| t.len() as i64).sum::<i64>() / 4;
            tracing::warn!(
                estimated = input_tokens,
                reported = result.total_tokens,
                "Estimated embedding tokens for chunked batch"
            );
        }

        let outcome = (|| -> Result<(), AppError> {
            let mut conn = self.pool.get()?;
            let today = today_ymd();
            let pricing = admin_config::current_pricing(
                &conn,
                self.inner.provider_name(),
                &result.model,
                &today,
            )?
            .ok_or_else(|| {
                AppError::conflict(
                    "NO_PRICING_CONFIG",
                    format!(
                        "no current pricing for {}/{}; usage not billed",
                        self.inner.provider_name(),
                        result.model
                    ),
                )
            })?;
            let raw = token_cost_micros(input_tokens, pricing.input_cost_per_1k_micros);
            let billed = apply_margin(raw, pricing.margin_multiplier);
            metering::record_usage_and_debit(
                &mut conn,
                &self.user_id,
                self.inner.provider_name(),
                &result.model,
                "embedding",
                input_tokens,
                0,
                raw,
                billed,
                pricing.margin_multiplier,
            )?;
            Ok(())
        })();

        if let Err(e) = outcome {
            tracing::error!(
                user_id = %self.user_id,
                error = %e,
                "Failed to record metered embedding usage"
            );
        }

        Ok(result)
    }
}
