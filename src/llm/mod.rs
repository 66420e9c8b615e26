//! LLM integration for market analysis.
//!
//! Defines the `TextGenerator` trait and provides Anthropic and
//! OpenRouter transports. Prompt construction and response parsing
//! live in the analysis pipeline; this module only moves text and
//! tracks spend.

pub mod anthropic;
pub mod openrouter;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::LlmConfig;
use crate::types::TraderError;

/// One completed generation.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub tokens_used: u32,
    /// Estimated cost of this call in USD.
    pub cost: f64,
}

/// Abstraction over chat-completion providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run one system + user exchange and return the assistant text.
    async fn generate(&self, system: &str, user: &str) -> Result<GeneratedText>;

    /// Model identifier string.
    fn model_name(&self) -> &str;

    /// Total cumulative cost across all calls in USD.
    fn cumulative_cost(&self) -> f64;
}

/// Build the configured provider.
pub fn build_generator(
    config: &LlmConfig,
    api_key: SecretString,
) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(anthropic::AnthropicClient::new(
            api_key.expose_secret().to_string(),
            config.model.clone(),
            config.max_tokens,
        )?)),
        "openrouter" => Ok(Arc::new(openrouter::OpenRouterClient::new(
            api_key.expose_secret().to_string(),
            config.model.clone(),
            config.fallback_model.clone(),
            config.max_tokens,
        )?)),
        other => Err(TraderError::InsufficientSettings(format!(
            "unknown llm.provider '{other}' (expected 'anthropic' or 'openrouter')"
        ))
        .into()),
    }
}
