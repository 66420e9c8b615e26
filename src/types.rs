//! Shared types for the Presagio trader.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that subgraph, analysis, ledger,
//! chain, and monitor modules can depend on them without circular
//! references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A fixed-product market maker snapshot from the subgraph.
///
/// Immutable per loop iteration — never mutated locally. Numeric fields
/// arrive as strings on the wire and are parsed at the DTO boundary in
/// `subgraph`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Market maker contract address (also the market id).
    pub id: String,
    pub title: String,
    /// Outcome labels, e.g. ["Yes", "No"].
    pub outcomes: Vec<String>,
    /// Per-outcome marginal price (probability proxy, 0.0–1.0).
    pub outcome_marginal_prices: Vec<f64>,
    /// Collateral token contract address (wxDAI on Presagio).
    pub collateral_token: String,
    pub collateral_volume: f64,
    pub usd_volume: f64,
    pub category: String,
    pub creation_timestamp: DateTime<Utc>,
    /// When the underlying question opens for answers — used as the
    /// expected resolution time of trades on this market.
    pub opening_timestamp: DateTime<Utc>,
    pub resolution_timestamp: Option<DateTime<Utc>>,
    /// Current oracle answer as a 32-byte hex string, if any.
    pub current_answer: Option<String>,
    /// When the oracle answer finalized, if it has.
    pub answer_finalized_timestamp: Option<DateTime<Utc>>,
    pub condition: Condition,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" (vol: ${:.0} | {})",
            &self.id[..self.id.len().min(10)],
            self.title,
            self.usd_volume,
            self.category,
        )
    }
}

impl Market {
    /// Whether the oracle answer has already finalized for this
    /// market: a finalization timestamp exists, is non-zero, and is
    /// strictly in the past.
    pub fn has_finalized_answer(&self) -> bool {
        match self.answer_finalized_timestamp {
            Some(ts) => ts.timestamp() > 0 && ts < Utc::now(),
            None => false,
        }
    }

    /// Helper to build a test/sample market with sensible defaults.
    #[cfg(test)]
    pub fn sample(id: &str) -> Self {
        Market {
            id: id.to_string(),
            title: "Will GNO trade above $400 by March 2026?".to_string(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_marginal_prices: vec![0.42, 0.58],
            collateral_token: "0xe91d153e0b41518a2ce8dd3d7944fa863463a97d".to_string(),
            collateral_volume: 120.0,
            usd_volume: 20.0,
            category: "cryptocurrency".to_string(),
            creation_timestamp: Utc::now() - chrono::Duration::days(7),
            opening_timestamp: Utc::now() + chrono::Duration::days(30),
            resolution_timestamp: None,
            current_answer: None,
            answer_finalized_timestamp: None,
            condition: Condition {
                id: "0xc0ffee0000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
                payouts: None,
                oracle: "0xab16d643ba051c11962656e45d4114b8f5f31f85".to_string(),
            },
        }
    }
}

/// The oracle-tracked condition underlying a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    /// Payout numerators per outcome, set once the condition resolves.
    pub payouts: Option<Vec<String>>,
    pub oracle: String,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Closed outcome label set for binary Presagio markets.
///
/// `Abstain` is the reserved no-trade sentinel: the validator may emit
/// it when it cannot commit to either side, and the pipeline never
/// executes a trade for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
    Abstain,
}

impl Outcome {
    /// On-chain outcome index for tradeable outcomes (Yes=0, No=1).
    pub fn index(&self) -> Option<usize> {
        match self {
            Outcome::Yes => Some(0),
            Outcome::No => Some(1),
            Outcome::Abstain => None,
        }
    }

    /// The outcome that a winning on-chain index maps to.
    /// Binary markets only: index 0 → Yes, anything else → No.
    pub fn from_winning_index(index: usize) -> Self {
        if index == 0 {
            Outcome::Yes
        } else {
            Outcome::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "Yes",
            Outcome::No => "No",
            Outcome::Abstain => "Abstain",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Yes" => Ok(Outcome::Yes),
            "No" => Ok(Outcome::No),
            "Abstain" => Ok(Outcome::Abstain),
            _ => Err(anyhow::anyhow!("Unknown outcome label: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// Stage-one output: the initial recommendation from the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialAnalysis {
    pub recommended_outcome: Outcome,
    /// 0–100.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
}

/// Stage-two output: independent re-validation against fresh evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_consistent: bool,
    pub final_recommendation: FinalRecommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalRecommendation {
    pub recommended_outcome: Outcome,
    /// 0–100.
    pub confidence: f64,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Ledger records
// ---------------------------------------------------------------------------

/// A validated analysis persisted by the ledger. One-to-many with
/// Market; the latest record per market is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedTrade {
    pub id: String,
    pub market_id: String,
    pub market_title: String,
    pub recommended_outcome: Outcome,
    pub confidence: f64,
    pub reasoning: String,
    pub risks: Vec<String>,
    pub opportunities: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Attached after resolution; None while the market is open.
    pub result: Option<Outcome>,
}

/// An executed buy, created exactly once per successful on-chain trade.
/// `is_resolved` flips false→true exactly once; claiming is tracked
/// separately so a failed claim can be retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyTrade {
    pub id: String,
    pub market_id: String,
    pub outcome: Outcome,
    /// Stake in collateral units (xDAI).
    pub stake: Decimal,
    pub created_at: DateTime<Utc>,
    pub resolution_timestamp: DateTime<Utc>,
    pub is_resolved: bool,
    pub result_outcome: Option<Outcome>,
    pub claim_tx: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl BuyTrade {
    /// Whether the trade's predicted outcome matched the resolved result.
    pub fn won(&self) -> bool {
        self.result_outcome.map(|r| r == self.outcome).unwrap_or(false)
    }
}

/// Append-only canonical resolution record per market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResolution {
    pub id: String,
    pub market_id: String,
    pub result: Outcome,
    pub created_at: DateTime<Utc>,
}

/// A realized position outcome: a loss at resolution, or a win at claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedOutcome {
    pub id: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub stake: Decimal,
    pub result: Outcome,
    /// Redeemed collateral minus stake for wins, negative stake for losses.
    pub profit: Decimal,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// Summary of a single orchestrator tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub markets_fetched: usize,
    pub candidates: usize,
    pub attempts: usize,
    pub entered: usize,
    pub skipped: usize,
    pub trades_resolved: usize,
    pub claims_submitted: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} candidates={} attempts={} entered={} skipped={} resolved={} claimed={}",
            self.markets_fetched,
            self.candidates,
            self.attempts,
            self.entered,
            self.skipped,
            self.trades_resolved,
            self.claims_submitted,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    /// Indexing service, RPC, or search endpoint unreachable. Logged,
    /// tick ends early; retry happens on the next scheduled tick.
    #[error("Upstream unavailable ({service}): {message}")]
    UpstreamUnavailable { service: String, message: String },

    /// The generator returned empty or unusable output for stage one.
    #[error("No analysis generated for market {0}")]
    NoAnalysisGenerated(String),

    /// Stage-two output violated the strict validation contract.
    #[error("Validation parse error: {0}")]
    ValidationParse(String),

    /// On-chain submission failure or revert. Nothing is ledgered;
    /// the market becomes eligible again once its cache entry expires.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Required configuration missing at startup — fatal.
    #[error("Missing required settings: {0}")]
    InsufficientSettings(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
