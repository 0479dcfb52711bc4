use serde::{Deserialize, Serialize};

/// Canonical list of available LLM and embedding models. Calls to models
/// not in this table (or inactive) are blocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRegistryEntry {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub display_name: String,
    /// llm | embedding
    pub model_type: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-model pricing with individual margins and effective dates. The
/// "current" row for a (provider, model) is the one with the greatest
/// effective_date ≤ today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub input_cost_per_1k_micros: i64,
    pub output_cost_per_1k_micros: i64,
    pub margin_multiplier: f64,
    pub effective_date: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Pricing row plus the computed (never stored) is_current flag exposed to
/// admin reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfigView {
    #[serde(flatten)]
    pub pricing: PricingConfig,
    pub is_current: bool,
}

/// Maps task types to models per provider. Lookup falls back from
/// (provider, task_type) to (provider, "_default").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRoutingConfig {
    pub id: String,
    pub provider: String,
    pub task_type: String,
    pub model: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Routing row joined with the target model's display name for admin reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRoutingView {
    #[serde(flatten)]
    pub routing: TaskRoutingConfig,
    pub model_display_name: Option<String>,
}

/// Key-value store for global settings; the application layer parses values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfigEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Fallback task_type used when no exact routing row exists.
pub const ROUTING_DEFAULT_TASK: &str = "_default";
