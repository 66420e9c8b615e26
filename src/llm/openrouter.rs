//! OpenRouter transport.
//!
//! OpenAI-compatible chat completions against the OpenRouter gateway.
//! Supports an optional fallback model that is tried once when the
//! primary model exhausts its retries.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{GeneratedText, TextGenerator};
use crate::types::TraderError;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;

/// Blended cost estimate per 1K tokens. OpenRouter routes across
/// providers with varying prices; this keeps spend tracking in the
/// right order of magnitude.
const BLENDED_COST_PER_1K: f64 = 0.006;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: String,
    model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    total_cost: AtomicU64, // stored as cost * 1_000_000
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    pub fn new(
        api_key: String,
        model: String,
        fallback_model: Option<String>,
        max_tokens: u32,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model,
            fallback_model,
            max_tokens,
            total_cost: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Send a chat request for one named model with retry + backoff.
    async fn call_model(
        &self,
        model: &str,
        system: &str,
        user_message: &str,
    ) -> Result<GeneratedText> {
        let request = ChatRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model, "Retrying OpenRouter API call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(OPENROUTER_API_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenRouter response")?;

                        let text = body
                            .choices
                            .first()
                            .map(|c| c.message.content.clone())
                            .unwrap_or_default();

                        let tokens_used =
                            body.usage.map(|u| u.total_tokens).unwrap_or(0);
                        let cost =
                            (tokens_used as f64 / 1000.0) * BLENDED_COST_PER_1K;

                        let cost_micro = (cost * 1_000_000.0) as u64;
                        self.total_cost.fetch_add(cost_micro, Ordering::Relaxed);
                        self.total_calls.fetch_add(1, Ordering::Relaxed);

                        return Ok(GeneratedText {
                            text,
                            tokens_used,
                            cost,
                        });
                    }

                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, error = %error_text, "Retryable OpenRouter API error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    return Err(TraderError::UpstreamUnavailable {
                        service: "openrouter".to_string(),
                        message: format!("HTTP {status}: {error_text}"),
                    }
                    .into());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        Err(TraderError::UpstreamUnavailable {
            service: "openrouter".to_string(),
            message: format!(
                "model {model} failed after {} retries: {}",
                MAX_RETRIES,
                last_error.unwrap_or_default()
            ),
        }
        .into())
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    async fn generate(&self, system: &str, user: &str) -> Result<GeneratedText> {
        match self.call_model(&self.model, system, user).await {
            Ok(out) => Ok(out),
            Err(primary_err) => {
                let Some(fallback) = self.fallback_model.as_deref() else {
                    return Err(primary_err);
                };
                info!(
                    primary = %self.model,
                    fallback,
                    error = %primary_err,
                    "Primary model exhausted retries, trying fallback"
                );
                self.call_model(fallback, system, user).await
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn cumulative_cost(&self) -> f64 {
        self.total_cost.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = OpenRouterClient::new(
            "test-key".to_string(),
            "anthropic/claude-sonnet-4".to_string(),
            Some("openai/gpt-4o-mini".to_string()),
            1024,
        )
        .unwrap();
        assert_eq!(client.model_name(), "anthropic/claude-sonnet-4");
        assert_eq!(client.cumulative_cost(), 0.0);
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "the answer"}}],
            "usage": {"total_tokens": 250}
        }"#;
        let body: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.choices[0].message.content, "the answer");
        assert_eq!(body.usage.unwrap().total_tokens, 250);
    }

    #[test]
    fn test_empty_choices_yield_empty_text() {
        let json = r#"{"choices": [], "usage": null}"#;
        let body: ChatResponse = serde_json::from_str(json).unwrap();
        let text = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        assert!(text.is_empty());
    }
}
