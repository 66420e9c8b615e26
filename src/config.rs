//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (signer key, API keys) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`. Startup
//! validation collects every missing required setting and fails with
//! the full list — the engine must not start half-configured.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::types::TraderError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub subgraph: SubgraphConfig,
    pub chain: ChainConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub twitter: TwitterConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub trading_enabled: bool,
    #[serde(default = "default_trading_interval_ms")]
    pub trading_interval_ms: u64,
    #[serde(default = "default_min_usd_volume")]
    pub min_usd_volume: f64,
    #[serde(default = "default_slippage_tolerance_pct")]
    pub slippage_tolerance_pct: f64,
    /// Market creator address the candidate query filters on.
    pub market_creator: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubgraphConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Gnosis Safe address holding the trading funds.
    pub safe_address: String,
    /// Env-var name holding the signer private key.
    pub signer_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// "anthropic" | "openrouter"
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Fallback model for OpenRouter (used when the primary fails).
    #[serde(default)]
    pub fallback_model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub api_key_env: String,
    #[serde(default = "default_search_results")]
    pub max_results: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwitterConfig {
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub bearer_token_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_trading_interval_ms() -> u64 {
    3_600_000
}

fn default_min_usd_volume() -> f64 {
    15.0
}

fn default_slippage_tolerance_pct() -> f64 {
    5.0
}

fn default_database_url() -> String {
    "sqlite://presagio.db".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_search_results() -> u32 {
    5
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Validate that every setting the engine cannot run without is
    /// present. Collects all problems into one fatal error so the
    /// operator sees the full list at once.
    pub fn validate(&self) -> Result<(), TraderError> {
        let mut missing = Vec::new();

        if self.subgraph.url.is_empty() {
            missing.push("subgraph.url (market indexing endpoint)".to_string());
        }
        if self.chain.rpc_url.is_empty() {
            missing.push("chain.rpc_url (Gnosis RPC endpoint)".to_string());
        }
        if self.chain.safe_address.is_empty() {
            missing.push("chain.safe_address (custodial Safe)".to_string());
        }
        if std::env::var(&self.chain.signer_key_env).is_err() {
            missing.push(format!("${} (signer private key)", self.chain.signer_key_env));
        }
        if std::env::var(&self.llm.api_key_env).is_err() {
            missing.push(format!("${} (LLM API key)", self.llm.api_key_env));
        }
        if self.agent.market_creator.is_empty() {
            missing.push("agent.market_creator (candidate filter address)".to_string());
        }
        if self.twitter.enabled && self.twitter.username.is_empty() {
            missing.push("twitter.username (required when twitter.enabled)".to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TraderError::InsufficientSettings(missing.join(", ")))
        }
    }

    /// Resolve the signer private key from its configured env var.
    pub fn signer_key(&self) -> Result<SecretString> {
        let key = std::env::var(&self.chain.signer_key_env).with_context(|| {
            format!("Environment variable not set: {}", self.chain.signer_key_env)
        })?;
        Ok(SecretString::new(key))
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
