//! Trade announcements.
//!
//! Posts entry, skip and result notices to X/Twitter. Announcements
//! are best-effort: a failed post is logged by the caller and never
//! blocks or unwinds the trade that triggered it. Each notice kind has
//! an hourly post cap, and composed text is cut to the platform limit.
//! `dry_run` keeps the full composition path live while only logging
//! the would-be post.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::types::{Outcome, TraderError};

const TWEET_API_URL: &str = "https://api.twitter.com/2/tweets";
const TWEET_MAX_CHARS: usize = 280;
const MAX_POSTS_PER_HOUR: u32 = 10;

/// A committed position worth announcing.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    pub market_title: String,
    pub outcome: Outcome,
    pub confidence: f64,
    pub stake: Decimal,
}

/// An analysis that completed but did not commit.
#[derive(Debug, Clone)]
pub struct SkipEvent {
    pub market_title: String,
    pub outcome: Outcome,
    pub confidence: f64,
    pub reason: String,
}

/// A settled position worth announcing.
#[derive(Debug, Clone)]
pub struct ResultEvent {
    pub market_title: String,
    pub outcome: Outcome,
    pub result: Outcome,
    pub profit: Option<Decimal>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce_entry(&self, event: &EntryEvent) -> Result<()>;
    async fn announce_skip(&self, event: &SkipEvent) -> Result<()>;
    async fn announce_result(&self, event: &ResultEvent) -> Result<()>;
}

/// No-op notifier for when announcements are disabled.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn announce_entry(&self, _event: &EntryEvent) -> Result<()> {
        Ok(())
    }
    async fn announce_skip(&self, _event: &SkipEvent) -> Result<()> {
        Ok(())
    }
    async fn announce_result(&self, _event: &ResultEvent) -> Result<()> {
        Ok(())
    }
}

/// Cuts a composed post down to the platform limit, ending on a char
/// boundary with an ellipsis when anything was dropped.
pub fn truncate_post(text: &str) -> String {
    if text.chars().count() <= TWEET_MAX_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(TWEET_MAX_CHARS - 1).collect();
    cut.push('…');
    cut
}

pub fn compose_entry(event: &EntryEvent) -> String {
    format!(
        "📈 New position: \"{}\" — buying {} at {:.0}% confidence ({} wxDAI).",
        event.market_title, event.outcome, event.confidence, event.stake
    )
}

pub fn compose_skip(event: &SkipEvent) -> String {
    format!(
        "⏭️ Passing on \"{}\": {} ({} at {:.0}% confidence).",
        event.market_title, event.reason, event.outcome, event.confidence
    )
}

pub fn compose_result(event: &ResultEvent) -> String {
    let won = event.outcome == event.result;
    let mut text = if won {
        format!(
            "✅ Resolved: \"{}\" settled {} — position won.",
            event.market_title, event.result
        )
    } else {
        format!(
            "❌ Resolved: \"{}\" settled {} — position lost.",
            event.market_title, event.result
        )
    };
    if let Some(profit) = event.profit {
        text.push_str(&format!(" P&L: {profit} wxDAI."));
    }
    text
}

pub struct TwitterNotifier {
    http: Client,
    bearer_token: Option<SecretString>,
    username: String,
    dry_run: bool,
    post_counts: Mutex<HashMap<String, u32>>,
}

impl TwitterNotifier {
    pub fn new(username: String, bearer_token: Option<SecretString>, dry_run: bool) -> Self {
        Self {
            http: Client::new(),
            bearer_token,
            username,
            dry_run,
            post_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Per-kind hourly limit. Buckets by wall-clock hour, so stale
    /// entries from previous hours simply stop matching.
    fn within_rate_limit(&self, kind: &str) -> bool {
        let hour = Utc::now().timestamp() / 3600;
        let key = format!("{kind}_{hour}");
        let mut counts = match self.post_counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = counts.entry(key).or_insert(0);
        if *count >= MAX_POSTS_PER_HOUR {
            return false;
        }
        *count += 1;
        true
    }

    async fn post(&self, kind: &str, text: &str) -> Result<()> {
        if !self.within_rate_limit(kind) {
            warn!(kind, "Post rate limit reached, dropping announcement");
            return Ok(());
        }
        let text = truncate_post(text);
        let text = text.as_str();
        if self.dry_run {
            info!(user = %self.username, text, "Dry-run tweet");
            return Ok(());
        }
        let Some(token) = &self.bearer_token else {
            return Err(TraderError::InsufficientSettings(
                "twitter enabled without a bearer token".to_string(),
            )
            .into());
        };

        let response = self
            .http
            .post(TWEET_API_URL)
            .bearer_auth(token.expose_secret())
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| TraderError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraderError::Notification(format!("HTTP {status}: {body}")).into());
        }

        debug!(user = %self.username, "Tweet posted");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TwitterNotifier {
    async fn announce_entry(&self, event: &EntryEvent) -> Result<()> {
        self.post("entry", &compose_entry(event)).await
    }

    async fn announce_skip(&self, event: &SkipEvent) -> Result<()> {
        self.post("skip", &compose_skip(event)).await
    }

    async fn announce_result(&self, event: &ResultEvent) -> Result<()> {
        self.post("result", &compose_result(event)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_compose_entry() {
        let text = compose_entry(&EntryEvent {
            market_title: "Will it happen?".to_string(),
            outcome: Outcome::Yes,
            confidence: 72.0,
            stake: dec!(0.012),
        });
        assert!(text.contains("Will it happen?"));
        assert!(text.contains("buying Yes"));
        assert!(text.contains("72%"));
        assert!(text.contains("0.012 wxDAI"));
    }

    #[test]
    fn test_compose_skip() {
        let text = compose_skip(&SkipEvent {
            market_title: "Will it happen?".to_string(),
            outcome: Outcome::No,
            confidence: 48.0,
            reason: "final confidence at or below threshold".to_string(),
        });
        assert!(text.contains("Passing on"));
        assert!(text.contains("below threshold"));
        assert!(text.contains("48%"));
    }

    #[test]
    fn test_compose_result_win_and_loss() {
        let win = compose_result(&ResultEvent {
            market_title: "M".to_string(),
            outcome: Outcome::Yes,
            result: Outcome::Yes,
            profit: Some(dec!(0.008)),
        });
        assert!(win.contains("won"));
        assert!(win.contains("0.008"));

        let loss = compose_result(&ResultEvent {
            market_title: "M".to_string(),
            outcome: Outcome::Yes,
            result: Outcome::No,
            profit: Some(dec!(-0.012)),
        });
        assert!(loss.contains("lost"));
        assert!(loss.contains("-0.012"));
    }

    #[test]
    fn test_truncate_post_leaves_short_text_alone() {
        assert_eq!(truncate_post("short"), "short");
    }

    #[test]
    fn test_truncate_post_cuts_to_limit_with_ellipsis() {
        let long = "x".repeat(400);
        let cut = truncate_post(&long);
        assert_eq!(cut.chars().count(), TWEET_MAX_CHARS);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_rate_limit_caps_per_kind_per_hour() {
        let notifier = TwitterNotifier::new("trader".to_string(), None, true);
        for _ in 0..MAX_POSTS_PER_HOUR {
            assert!(notifier.within_rate_limit("entry"));
        }
        assert!(!notifier.within_rate_limit("entry"));
        // Other kinds keep their own budget.
        assert!(notifier.within_rate_limit("result"));
    }

    #[tokio::test]
    async fn test_dry_run_never_sends() {
        let notifier = TwitterNotifier::new("trader".to_string(), None, true);
        notifier
            .announce_entry(&EntryEvent {
                market_title: "M".to_string(),
                outcome: Outcome::No,
                confidence: 60.0,
                stake: dec!(0.01),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_live_post_without_token_is_config_error() {
        let notifier = TwitterNotifier::new("trader".to_string(), None, false);
        let err = notifier
            .announce_result(&ResultEvent {
                market_title: "M".to_string(),
                outcome: Outcome::Yes,
                result: Outcome::No,
                profit: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraderError>(),
            Some(TraderError::InsufficientSettings(_))
        ));
    }
}
