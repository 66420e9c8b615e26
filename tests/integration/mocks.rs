//! Deterministic in-memory collaborators for integration tests.
//!
//! All state is controllable from test code: markets and oracle
//! answers for the source, scripted responses for the generator,
//! recorded calls for the engine and notifier.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use ethers::types::U256;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use presagio::chain::{ClaimReceipt, ExecutionEngine, PositionRef, TradeExecution};
use presagio::llm::{GeneratedText, TextGenerator};
use presagio::notify::{EntryEvent, Notifier, ResultEvent, SkipEvent};
use presagio::subgraph::{MarketAnswer, MarketSource};
use presagio::types::{Condition, Market};

/// A binary market with enough volume to be a candidate.
pub fn market(id: &str, usd_volume: f64) -> Market {
    Market {
        id: id.to_string(),
        title: format!("Will market {id} resolve Yes?"),
        outcomes: vec!["Yes".to_string(), "No".to_string()],
        outcome_marginal_prices: vec![0.42, 0.58],
        collateral_token: "0xe91d153e0b41518a2ce8dd3d7944fa863463a97d".to_string(),
        collateral_volume: usd_volume,
        usd_volume,
        category: "test".to_string(),
        creation_timestamp: Utc::now() - Duration::days(7),
        opening_timestamp: Utc::now() + Duration::days(30),
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

/// A finalized oracle answer for a market.
pub fn finalized_answer(market_id: &str, raw_answer: &str) -> MarketAnswer {
    MarketAnswer {
        market_id: market_id.to_string(),
        collateral_token: "0xe91d153e0b41518a2ce8dd3d7944fa863463a97d".to_string(),
        current_answer: Some(raw_answer.to_string()),
        answer_finalized_timestamp: Some(Utc::now() - Duration::hours(2)),
        condition: Condition {
            id: "0xc0ffee0000000000000000000000000000000000000000000000000000000001"
                .to_string(),
            payouts: Some(vec!["1".to_string(), "0".to_string()]),
            oracle: "0xab16d643ba051c11962656e45d4114b8f5f31f85".to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Market source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockSource {
    pub markets: Vec<Market>,
    pub answers: HashMap<String, MarketAnswer>,
    pub fetch_calls: Arc<Mutex<usize>>,
    pub answer_calls: Arc<Mutex<usize>>,
}

impl MockSource {
    pub fn with_markets(markets: Vec<Market>) -> Self {
        Self {
            markets,
            ..Default::default()
        }
    }

    pub fn set_answer(&mut self, answer: MarketAnswer) {
        self.answers.insert(answer.market_id.clone(), answer);
    }
}

#[async_trait]
impl MarketSource for MockSource {
    async fn markets_by_creator(&self, _creator: &str) -> Result<Vec<Market>> {
        *self.fetch_calls.lock().unwrap() += 1;
        Ok(self.markets.clone())
    }

    async fn market_answer(&self, market_id: &str) -> Result<Option<MarketAnswer>> {
        *self.answer_calls.lock().unwrap() += 1;
        Ok(self.answers.get(market_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Text generator
// ---------------------------------------------------------------------------

/// Replays scripted responses in order; errors once the script is
/// exhausted so an unexpected extra call fails loudly.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    pub calls: Arc<Mutex<usize>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _system: &str, _user: &str) -> Result<GeneratedText> {
        *self.calls.lock().unwrap() += 1;
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("generator script exhausted"))?;
        Ok(GeneratedText {
            text,
            tokens_used: 100,
            cost: 0.001,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cumulative_cost(&self) -> f64 {
        0.0
    }
}

/// Canned stage-one response committing to a side.
pub fn stage_one(outcome: &str, confidence: f64) -> String {
    format!(
        r#"{{"recommendedOutcome": "{outcome}", "confidence": {confidence},
            "reasoning": "scripted", "risks": [], "opportunities": []}}"#
    )
}

/// Canned stage-two response.
pub fn stage_two(consistent: bool, outcome: &str, confidence: f64) -> String {
    format!(
        r#"{{"isConsistent": {consistent}, "finalRecommendation":
            {{"recommendedOutcome": "{outcome}", "confidence": {confidence}, "reasoning": "scripted"}}}}"#
    )
}

// ---------------------------------------------------------------------------
// Execution engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedBuy {
    pub market_id: String,
    pub outcome_index: usize,
    pub stake: Decimal,
}

pub struct MockEngine {
    pub buys: Arc<Mutex<Vec<RecordedBuy>>>,
    pub claims: Arc<Mutex<Vec<PositionRef>>>,
    pub winner: Arc<Mutex<bool>>,
    pub redeemed: Decimal,
    pub fail_buys: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            buys: Arc::new(Mutex::new(Vec::new())),
            claims: Arc::new(Mutex::new(Vec::new())),
            winner: Arc::new(Mutex::new(false)),
            redeemed: dec!(0.02),
            fail_buys: false,
        }
    }

    pub fn set_winner(&self, winner: bool) {
        *self.winner.lock().unwrap() = winner;
    }
}

#[async_trait]
impl ExecutionEngine for MockEngine {
    async fn execute_buy(
        &self,
        market: &Market,
        outcome_index: usize,
        stake: Decimal,
    ) -> Result<TradeExecution> {
        if self.fail_buys {
            return Err(anyhow!("buy rejected"));
        }
        self.buys.lock().unwrap().push(RecordedBuy {
            market_id: market.id.clone(),
            outcome_index,
            stake,
        });
        Ok(TradeExecution {
            tx_hash: "0xbuy".to_string(),
            min_outcome_tokens: U256::from(1u64),
        })
    }

    async fn is_winner(&self, _position: &PositionRef) -> Result<bool> {
        Ok(*self.winner.lock().unwrap())
    }

    async fn claim_winnings(&self, position: &PositionRef) -> Result<ClaimReceipt> {
        self.claims.lock().unwrap().push(position.clone());
        Ok(ClaimReceipt {
            tx_hash: "0xclaim".to_string(),
            redeemed: self.redeemed,
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub entries: Arc<Mutex<Vec<EntryEvent>>>,
    pub skips: Arc<Mutex<Vec<SkipEvent>>>,
    pub results: Arc<Mutex<Vec<ResultEvent>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn announce_entry(&self, event: &EntryEvent) -> Result<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn announce_skip(&self, event: &SkipEvent) -> Result<()> {
        self.skips.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn announce_result(&self, event: &ResultEvent) -> Result<()> {
        self.results.lock().unwrap().push(event.clone());
        Ok(())
    }
}
