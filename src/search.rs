//! Web search provider for the validation stage.
//!
//! Wraps the Tavily search API. The validation pass feeds fresh search
//! context to the model so the second opinion is grounded in current
//! events rather than the model's training cutoff. Search failures are
//! survivable: callers degrade to validating without external context.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::TraderError;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Cap on how much of each result body we quote into a prompt.
const SNIPPET_MAX_CHARS: usize = 400;

#[derive(Debug, Serialize)]
struct SearchRequest {
    api_key: String,
    query: String,
    max_results: u32,
    include_answer: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// One completed search, ready to render into a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchDigest {
    /// Tavily's own synthesized answer, when it produced one.
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

impl SearchDigest {
    /// Render the digest as prompt context. Empty string when the
    /// search returned nothing usable.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if let Some(answer) = &self.answer {
            out.push_str("SEARCH SUMMARY: ");
            out.push_str(answer);
            out.push('\n');
        }
        for (i, result) in self.results.iter().enumerate() {
            let snippet: String = result.content.chars().take(SNIPPET_MAX_CHARS).collect();
            out.push_str(&format!("[{}] {} — {}\n", i + 1, result.title, snippet));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_none() && self.results.is_empty()
    }
}

/// Abstraction over the web search service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchDigest>;
}

pub struct TavilyClient {
    http: Client,
    api_key: SecretString,
    max_results: u32,
}

impl TavilyClient {
    pub fn new(api_key: SecretString, max_results: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build Tavily HTTP client")?;
        Ok(Self {
            http,
            api_key,
            max_results,
        })
    }
}

#[async_trait]
impl WebSearch for TavilyClient {
    async fn search(&self, query: &str) -> Result<SearchDigest> {
        let request = SearchRequest {
            api_key: self.api_key.expose_secret().to_string(),
            query: query.to_string(),
            max_results: self.max_results,
            include_answer: true,
        };

        let response = self
            .http
            .post(TAVILY_API_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| TraderError::UpstreamUnavailable {
                service: "tavily".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TraderError::UpstreamUnavailable {
                service: "tavily".to_string(),
                message: format!("HTTP {status}: {error_text}"),
            }
            .into());
        }

        let digest: SearchDigest = response
            .json()
            .await
            .map_err(|e| TraderError::UpstreamUnavailable {
                service: "tavily".to_string(),
                message: format!("invalid response body: {e}"),
            })?;

        debug!(query, results = digest.results.len(), "Search complete");
        Ok(digest)
    }
}
