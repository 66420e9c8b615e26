//! Market data source — the Omen/Presagio subgraph client.
//!
//! Fetches candidate market snapshots by creator and per-market
//! resolution answers over GraphQL-on-HTTP. All numeric fields arrive
//! as strings on the wire; DTOs here parse them into the typed
//! `Market` model. Network and indexing failures surface as
//! `TraderError::UpstreamUnavailable` and are never retried here —
//! retry is the orchestrator's job via the next tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{Condition, Market, TraderError};

/// The canonical 32-byte answer encoding that maps to outcome index 1.
/// Any other finalized answer maps to index 0. Binary markets only —
/// this mapping is not generalised to markets with more than two
/// outcomes.
const ANSWER_INDEX_ONE: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";

const MARKETS_QUERY: &str = r#"
query MarketsByCreator($creator: String!) {
  fixedProductMarketMakers(
    first: 20
    orderBy: creationTimestamp
    orderDirection: desc
    where: { creator: $creator }
  ) {
    id
    collateralToken
    collateralVolume
    outcomeTokenMarginalPrices
    condition { id payouts oracle }
    title
    outcomes
    category
    creationTimestamp
    openingTimestamp
    resolutionTimestamp
    currentAnswer
    answerFinalizedTimestamp
    usdVolume
  }
}
"#;

const ANSWER_QUERY: &str = r#"
query MarketAnswer($marketId: ID!) {
  fixedProductMarketMaker(id: $marketId) {
    id
    collateralToken
    currentAnswer
    answerFinalizedTimestamp
    condition { id payouts oracle }
  }
}
"#;

// ---------------------------------------------------------------------------
// Market source trait
// ---------------------------------------------------------------------------

/// Abstraction over the market indexing service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Fetch candidate market snapshots created by `creator`.
    async fn markets_by_creator(&self, creator: &str) -> Result<Vec<Market>>;

    /// Fetch the oracle answer state for a single market, if the
    /// market exists.
    async fn market_answer(&self, market_id: &str) -> Result<Option<MarketAnswer>>;
}

// ---------------------------------------------------------------------------
// Market answer
// ---------------------------------------------------------------------------

/// Oracle answer state for one market.
#[derive(Debug, Clone)]
pub struct MarketAnswer {
    pub market_id: String,
    pub collateral_token: String,
    /// 32-byte hex answer, if the oracle has any answer yet.
    pub current_answer: Option<String>,
    pub answer_finalized_timestamp: Option<DateTime<Utc>>,
    pub condition: Condition,
}

impl MarketAnswer {
    /// A market is finalized iff its finalized timestamp is present,
    /// non-zero, and strictly in the past.
    pub fn is_finalized(&self) -> bool {
        match self.answer_finalized_timestamp {
            Some(ts) => ts.timestamp() > 0 && ts < Utc::now(),
            None => false,
        }
    }

    /// The winning outcome index, if finalized. The reserved
    /// all-zero-except-final-bit answer maps to index 1; any other
    /// finalized answer maps to index 0.
    pub fn winning_outcome_index(&self) -> Option<usize> {
        if !self.is_finalized() {
            return None;
        }
        match self.current_answer.as_deref() {
            Some(answer) if answer.eq_ignore_ascii_case(ANSWER_INDEX_ONE) => Some(1),
            Some(_) => Some(0),
            None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MarketsData {
    #[serde(rename = "fixedProductMarketMakers")]
    markets: Vec<MarketDto>,
}

#[derive(Debug, Deserialize)]
struct AnswerData {
    #[serde(rename = "fixedProductMarketMaker")]
    market: Option<AnswerDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketDto {
    id: String,
    title: Option<String>,
    outcomes: Option<Vec<String>>,
    outcome_token_marginal_prices: Option<Vec<String>>,
    collateral_token: String,
    collateral_volume: Option<String>,
    usd_volume: Option<String>,
    category: Option<String>,
    creation_timestamp: Option<String>,
    opening_timestamp: Option<String>,
    resolution_timestamp: Option<String>,
    current_answer: Option<String>,
    answer_finalized_timestamp: Option<String>,
    condition: Option<ConditionDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerDto {
    id: String,
    collateral_token: String,
    current_answer: Option<String>,
    answer_finalized_timestamp: Option<String>,
    condition: Option<ConditionDto>,
}

#[derive(Debug, Deserialize)]
struct ConditionDto {
    id: String,
    payouts: Option<Vec<String>>,
    oracle: String,
}

impl From<ConditionDto> for Condition {
    fn from(dto: ConditionDto) -> Self {
        Condition {
            id: dto.id,
            payouts: dto.payouts,
            oracle: dto.oracle,
        }
    }
}

/// Parse a unix-seconds string into a timestamp. Zero and garbage map
/// to None so downstream code treats them as "not set".
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let secs: i64 = value?.parse().ok()?;
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

fn parse_f64(value: Option<&str>) -> f64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

impl MarketDto {
    /// Convert into the typed model. Returns None (and the caller logs)
    /// when required fields are missing — the subgraph occasionally
    /// indexes half-initialised markets.
    fn into_market(self) -> Option<Market> {
        let title = self.title?;
        let condition = self.condition?;
        let outcomes = self.outcomes.unwrap_or_default();
        if outcomes.is_empty() {
            return None;
        }
        let prices = self
            .outcome_token_marginal_prices
            .unwrap_or_default()
            .iter()
            .map(|p| p.parse().unwrap_or(0.0))
            .collect();

        Some(Market {
            id: self.id,
            title,
            outcomes,
            outcome_marginal_prices: prices,
            collateral_token: self.collateral_token,
            collateral_volume: parse_f64(self.collateral_volume.as_deref()),
            usd_volume: parse_f64(self.usd_volume.as_deref()),
            category: self.category.unwrap_or_default(),
            creation_timestamp: parse_timestamp(self.creation_timestamp.as_deref())
                .unwrap_or_else(Utc::now),
            opening_timestamp: parse_timestamp(self.opening_timestamp.as_deref())
                .unwrap_or_else(Utc::now),
            resolution_timestamp: parse_timestamp(self.resolution_timestamp.as_deref()),
            current_answer: self.current_answer,
            answer_finalized_timestamp: parse_timestamp(
                self.answer_finalized_timestamp.as_deref(),
            ),
            condition: condition.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// GraphQL client for the Omen subgraph.
pub struct SubgraphClient {
    http: Client,
    url: String,
}

impl SubgraphClient {
    pub fn new(url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build subgraph HTTP client")?;
        Ok(Self { http, url })
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({ "query": query, "variables": variables });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TraderError::UpstreamUnavailable {
                service: "subgraph".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TraderError::UpstreamUnavailable {
                service: "subgraph".to_string(),
                message: format!("HTTP {status}"),
            }
            .into());
        }

        let parsed: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| TraderError::UpstreamUnavailable {
                service: "subgraph".to_string(),
                message: format!("invalid response body: {e}"),
            })?;

        if let Some(err) = parsed.errors.first() {
            return Err(TraderError::UpstreamUnavailable {
                service: "subgraph".to_string(),
                message: err.message.clone(),
            }
            .into());
        }

        parsed.data.ok_or_else(|| {
            TraderError::UpstreamUnavailable {
                service: "subgraph".to_string(),
                message: "response missing data".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl MarketSource for SubgraphClient {
    async fn markets_by_creator(&self, creator: &str) -> Result<Vec<Market>> {
        let variables = serde_json::json!({ "creator": creator.to_lowercase() });
        let data: MarketsData = self.query(MARKETS_QUERY, variables).await?;

        let total = data.markets.len();
        let markets: Vec<Market> = data
            .markets
            .into_iter()
            .filter_map(|dto| {
                let id = dto.id.clone();
                let market = dto.into_market();
                if market.is_none() {
                    warn!(market_id = %id, "Skipping half-indexed market snapshot");
                }
                market
            })
            .collect();

        debug!(total, usable = markets.len(), "Fetched markets from subgraph");
        Ok(markets)
    }

    async fn market_answer(&self, market_id: &str) -> Result<Option<MarketAnswer>> {
        let variables = serde_json::json!({ "marketId": market_id.to_lowercase() });
        let data: AnswerData = self.query(ANSWER_QUERY, variables).await?;

        let Some(dto) = data.market else {
            debug!(market_id, "No market found for answer lookup");
            return Ok(None);
        };
        let Some(condition) = dto.condition else {
            return Ok(None);
        };

        Ok(Some(MarketAnswer {
            market_id: dto.id,
            collateral_token: dto.collateral_token,
            current_answer: dto.current_answer,
            answer_finalized_timestamp: parse_timestamp(
                dto.answer_finalized_timestamp.as_deref(),
            ),
            condition: condition.into(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn answer(current: Option<&str>, finalized: Option<DateTime<Utc>>) -> MarketAnswer {
        MarketAnswer {
            market_id: "0xmarket1".to_string(),
            collateral_token: "0xtoken".to_string(),
            current_answer: current.map(String::from),
            answer_finalized_timestamp: finalized,
            condition: Condition {
                id: "0xcond".to_string(),
                payouts: None,
                oracle: "0xoracle".to_string(),
            },
        }
    }

    // -- Finalization tests --

    #[test]
    fn test_not_finalized_without_timestamp() {
        assert!(!answer(Some(ANSWER_INDEX_ONE), None).is_finalized());
    }

    #[test]
    fn test_not_finalized_when_timestamp_in_future() {
        let future = Utc::now() + Duration::hours(1);
        assert!(!answer(Some(ANSWER_INDEX_ONE), Some(future)).is_finalized());
    }

    #[test]
    fn test_finalized_when_timestamp_in_past() {
        let past = Utc::now() - Duration::hours(1);
        assert!(answer(Some(ANSWER_INDEX_ONE), Some(past)).is_finalized());
    }

    // -- Winning index mapping tests --

    #[test]
    fn test_canonical_answer_maps_to_index_one() {
        let past = Utc::now() - Duration::hours(1);
        let a = answer(Some(ANSWER_INDEX_ONE), Some(past));
        assert_eq!(a.winning_outcome_index(), Some(1));
    }

    #[test]
    fn test_any_other_answer_maps_to_index_zero() {
        let past = Utc::now() - Duration::hours(1);
        let zero = "0x0000000000000000000000000000000000000000000000000000000000000000";
        assert_eq!(answer(Some(zero), Some(past)).winning_outcome_index(), Some(0));

        let other = "0x00000000000000000000000000000000000000000000000000000000000000ff";
        assert_eq!(answer(Some(other), Some(past)).winning_outcome_index(), Some(0));
    }

    #[test]
    fn test_winning_index_none_before_finalization() {
        let a = answer(Some(ANSWER_INDEX_ONE), None);
        assert_eq!(a.winning_outcome_index(), None);
    }

    #[test]
    fn test_winning_index_case_insensitive_hex() {
        let past = Utc::now() - Duration::hours(1);
        let upper = "0X0000000000000000000000000000000000000000000000000000000000000001";
        assert_eq!(answer(Some(upper), Some(past)).winning_outcome_index(), Some(1));
    }

    // -- Timestamp parsing tests --

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp(None).is_none());
        assert!(parse_timestamp(Some("0")).is_none());
        assert!(parse_timestamp(Some("not-a-number")).is_none());
        let ts = parse_timestamp(Some("1700000000")).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    // -- DTO conversion tests --

    #[test]
    fn test_market_dto_conversion() {
        let json = r#"{
            "id": "0xmarket1",
            "title": "Will it happen?",
            "outcomes": ["Yes", "No"],
            "outcomeTokenMarginalPrices": ["0.42", "0.58"],
            "collateralToken": "0xtoken",
            "collateralVolume": "120.5",
            "usdVolume": "20.25",
            "category": "politics",
            "creationTimestamp": "1700000000",
            "openingTimestamp": "1710000000",
            "resolutionTimestamp": null,
            "currentAnswer": null,
            "answerFinalizedTimestamp": null,
            "condition": { "id": "0xcond", "payouts": null, "oracle": "0xoracle" }
        }"#;
        let dto: MarketDto = serde_json::from_str(json).unwrap();
        let market = dto.into_market().unwrap();
        assert_eq!(market.id, "0xmarket1");
        assert!((market.usd_volume - 20.25).abs() < 1e-10);
        assert!((market.outcome_marginal_prices[0] - 0.42).abs() < 1e-10);
        assert!(market.answer_finalized_timestamp.is_none());
        assert_eq!(market.condition.id, "0xcond");
    }

    #[test]
    fn test_market_dto_missing_title_rejected() {
        let json = r#"{
            "id": "0xmarket1",
            "title": null,
            "outcomes": ["Yes", "No"],
            "collateralToken": "0xtoken",
            "condition": { "id": "0xcond", "payouts": null, "oracle": "0xoracle" }
        }"#;
        let dto: MarketDto = serde_json::from_str(json).unwrap();
        assert!(dto.into_market().is_none());
    }

    #[test]
    fn test_graphql_error_surface() {
        let json = r#"{"data": null, "errors": [{"message": "rate limited"}]}"#;
        let parsed: GraphQlResponse<MarketsData> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.errors[0].message, "rate limited");
        assert!(parsed.data.is_none());
    }
}
