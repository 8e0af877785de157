//! # Pressroom Models
//!
//! LLM provider and model selection. Every reasoning call names a
//! [`ReasoningPurpose`]; [`ModelSettings`] resolves the provider and model
//! for it from per-purpose overrides, then the global choice, then the
//! provider default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Supported LLM providers
///
/// API keys come from the environment:
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Anthropic,
            LlmProvider::OpenAI,
            LlmProvider::Gemini,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Base URL of the provider's HTTP API. Everything except Anthropic
    /// speaks the OpenAI chat-completions dialect.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1",
            LlmProvider::Grok => "https://api.x.ai/v1",
            LlmProvider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }
}

/// Why a reasoning call is made. Used for model routing and logging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPurpose {
    Classify,
    Plan,
    Evaluate,
    WorkerSynthesis,
    Synthesis,
    FollowUp,
    Outline,
    Draft,
    AnalyzeFeedback,
    Revise,
}

impl ReasoningPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Plan => "plan",
            Self::Evaluate => "evaluate",
            Self::WorkerSynthesis => "worker_synthesis",
            Self::Synthesis => "synthesis",
            Self::FollowUp => "follow_up",
            Self::Outline => "outline",
            Self::Draft => "draft",
            Self::AnalyzeFeedback => "analyze_feedback",
            Self::Revise => "revise",
        }
    }

    /// Output budget for the call
    pub fn max_tokens(&self) -> u32 {
        match self {
            Self::Classify => 16,
            Self::Evaluate => 64,
            Self::Plan | Self::FollowUp | Self::AnalyzeFeedback => 1024,
            Self::WorkerSynthesis | Self::Outline => 1024,
            Self::Synthesis => 2048,
            Self::Draft | Self::Revise => 8192,
        }
    }
}

impl fmt::Display for ReasoningPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for LLM model selection
///
/// ## Example
/// ```rust,ignore
/// use pressroom_core::models::{ModelConfig, LlmProvider};
///
/// // Default Anthropic
/// let config = ModelConfig::default();
///
/// // Specific provider and model
/// let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Anthropic, LlmProvider::Anthropic.default_model())
    }
}

impl ModelConfig {
    /// Create a new model config with default provider (Anthropic)
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_provider(LlmProvider::Anthropic, model)
    }

    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            temperature: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Effective API base URL, without a trailing slash
    pub fn endpoint(&self) -> String {
        self.base_url
            .as_deref()
            .filter(|_| self.provider.supports_base_url())
            .unwrap_or(self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Read the provider API key from the environment
    pub fn api_key(&self) -> anyhow::Result<String> {
        let var = self.provider.api_key_env();
        std::env::var(var).map_err(|_| anyhow::anyhow!("{} is not set", var))
    }
}

/// Model routing for every reasoning purpose
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelSettings {
    /// Global provider for all purposes
    #[serde(default)]
    pub global_provider: LlmProvider,
    /// Global model; provider default when unset
    #[serde(default)]
    pub global_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub per_purpose_providers: HashMap<ReasoningPurpose, LlmProvider>,
    /// Per-purpose model overrides, e.g. a cheap model for `classify`
    #[serde(default)]
    pub per_purpose_models: HashMap<ReasoningPurpose, String>,
}

impl ModelSettings {
    pub fn with_global(mut self, provider: LlmProvider, model: impl Into<String>) -> Self {
        self.global_provider = provider;
        self.global_model = Some(model.into());
        self
    }

    pub fn with_purpose_model(mut self, purpose: ReasoningPurpose, model: impl Into<String>) -> Self {
        self.per_purpose_models.insert(purpose, model.into());
        self
    }

    /// Model config for one purpose
    pub fn for_purpose(&self, purpose: ReasoningPurpose) -> ModelConfig {
        // Provider: per-purpose override -> global
        let provider = self
            .per_purpose_providers
            .get(&purpose)
            .copied()
            .unwrap_or(self.global_provider);

        // Model: per-purpose override -> global (same provider only) -> provider default
        let model = self
            .per_purpose_models
            .get(&purpose)
            .cloned()
            .or_else(|| {
                self.global_model
                    .clone()
                    .filter(|_| provider == self.global_provider)
            })
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
            temperature: None,
        }
    }
}
