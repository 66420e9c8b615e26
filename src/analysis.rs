//! Two-stage analysis pipeline.
//!
//! Stage one asks the model for an initial recommendation on a market.
//! Stage two re-validates that recommendation against fresh web search
//! context with a deliberately skeptical prompt. A trade is committed
//! only when the validator agrees with itself (`is_consistent`), the
//! final confidence clears the threshold, and the recommendation is an
//! actual side rather than an abstention.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::llm::TextGenerator;
use crate::search::WebSearch;
use crate::types::{InitialAnalysis, Market, Outcome, TraderError, Validation};

/// Strict lower bound on final confidence (0–100 scale) for a commit.
pub const MIN_COMMIT_CONFIDENCE: f64 = 50.0;

/// Minimum stake in collateral units.
const BASE_STAKE: Decimal = dec!(0.01);
/// Confidence pivot: stake starts growing above this confidence.
const CONFIDENCE_PIVOT: Decimal = dec!(60);
/// Stake grows by 1/SCALE collateral units per confidence point.
const CONFIDENCE_SCALE: Decimal = dec!(6000);

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of running the pipeline for one market.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Both stages passed; the trade should be executed at `stake`.
    Committed {
        analysis: InitialAnalysis,
        validation: Validation,
        stake: Decimal,
    },
    /// Analysis completed but did not clear the commit rule.
    Skipped {
        analysis: InitialAnalysis,
        validation: Validation,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inconsistent,
    LowConfidence,
    Abstained,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Inconsistent => write!(f, "validation disagreed with stage one"),
            SkipReason::LowConfidence => write!(f, "final confidence at or below threshold"),
            SkipReason::Abstained => write!(f, "validator abstained from both sides"),
        }
    }
}

// ---------------------------------------------------------------------------
// Position sizing
// ---------------------------------------------------------------------------

/// Stake for a committed trade, in collateral units.
///
/// Flat `BASE_STAKE` up to the pivot, then linear growth of one
/// `1/CONFIDENCE_SCALE` unit per confidence point above it. Confidence
/// below the pivot never shrinks the stake below the base.
pub fn stake_for_confidence(confidence: f64) -> Decimal {
    // Confidence arrives on a 0-100 scale; hundredths are plenty of
    // resolution and keep the arithmetic in exact decimals.
    let hundredths = (confidence * 100.0).round() as i64;
    let conf = Decimal::new(hundredths, 2);
    let over = (conf - CONFIDENCE_PIVOT).max(Decimal::ZERO);
    BASE_STAKE + over / CONFIDENCE_SCALE
}

/// Apply the commit rule to a completed validation.
pub fn commit_decision(validation: &Validation) -> Result<Decimal, SkipReason> {
    let rec = &validation.final_recommendation;
    if !validation.is_consistent {
        return Err(SkipReason::Inconsistent);
    }
    if rec.recommended_outcome == Outcome::Abstain {
        return Err(SkipReason::Abstained);
    }
    if rec.confidence <= MIN_COMMIT_CONFIDENCE {
        return Err(SkipReason::LowConfidence);
    }
    Ok(stake_for_confidence(rec.confidence))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct AnalysisPipeline {
    generator: Arc<dyn TextGenerator>,
    searcher: Option<Arc<dyn WebSearch>>,
}

impl AnalysisPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        searcher: Option<Arc<dyn WebSearch>>,
    ) -> Self {
        Self { generator, searcher }
    }

    /// Run both stages for one market and apply the commit rule.
    pub async fn run(&self, market: &Market) -> Result<Verdict> {
        let analysis = self.analyze(market).await?;
        debug!(
            market_id = %market.id,
            outcome = %analysis.recommended_outcome,
            confidence = analysis.confidence,
            "Stage one complete"
        );

        let validation = self.validate(market, &analysis).await?;
        let rec = &validation.final_recommendation;

        match commit_decision(&validation) {
            Ok(stake) => {
                info!(
                    market_id = %market.id,
                    outcome = %rec.recommended_outcome,
                    confidence = rec.confidence,
                    stake = %stake,
                    "Trade committed"
                );
                Ok(Verdict::Committed {
                    analysis,
                    validation,
                    stake,
                })
            }
            Err(reason) => {
                info!(
                    market_id = %market.id,
                    confidence = rec.confidence,
                    consistent = validation.is_consistent,
                    %reason,
                    "Trade skipped"
                );
                Ok(Verdict::Skipped {
                    analysis,
                    validation,
                    reason,
                })
            }
        }
    }

    /// Stage one: initial recommendation from market data alone.
    async fn analyze(&self, market: &Market) -> Result<InitialAnalysis> {
        let user = build_analysis_prompt(market);
        let generated = self.generator.generate(ANALYSIS_SYSTEM, &user).await?;

        parse_initial_analysis(&generated.text, market).map_err(|e| {
            TraderError::NoAnalysisGenerated(format!("market {}: {e}", market.id)).into()
        })
    }

    /// Stage two: re-validate against fresh search context.
    async fn validate(
        &self,
        market: &Market,
        initial: &InitialAnalysis,
    ) -> Result<Validation> {
        let search_context = match &self.searcher {
            Some(searcher) => match searcher.search(&market.title).await {
                Ok(digest) => digest.summary(),
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "Search failed, validating without context");
                    String::new()
                }
            },
            None => String::new(),
        };

        let user = build_validation_prompt(market, initial, &search_context);
        let generated = self.generator.generate(VALIDATION_SYSTEM, &user).await?;

        parse_validation(&generated.text).map_err(|e| {
            TraderError::ValidationParse(format!("market {}: {e}", market.id)).into()
        })
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const ANALYSIS_SYSTEM: &str = "You are a prediction market analyst. You evaluate a single binary \
     market and recommend which outcome to buy, if any.\n\n\
     RULES:\n\
     1. Reason about base rates, the current prices, and what the market may already price in.\n\
     2. Confidence is on a 0-100 scale and must be genuinely calibrated.\n\
     3. Respond with ONLY a JSON object, no prose around it, shaped exactly as:\n\
     {\"recommendedOutcome\": \"Yes\"|\"No\", \"confidence\": 0-100, \
     \"reasoning\": \"...\", \"risks\": [\"...\"], \"opportunities\": [\"...\"]}";

const VALIDATION_SYSTEM: &str = "You are a skeptical second reviewer for prediction market trades. \
     You receive an analyst's recommendation plus fresh web search context, \
     and you decide whether the recommendation survives scrutiny.\n\n\
     RULES:\n\
     1. Actively look for reasons the analyst is wrong or stale.\n\
     2. isConsistent is true only when your own conclusion matches the analyst's side.\n\
     3. If neither side is defensible, recommend \"Abstain\".\n\
     4. Respond with ONLY a JSON object, no prose around it, shaped exactly as:\n\
     {\"isConsistent\": true|false, \"finalRecommendation\": \
     {\"recommendedOutcome\": \"Yes\"|\"No\"|\"Abstain\", \"confidence\": 0-100, \"reasoning\": \"...\"}}";

fn build_analysis_prompt(market: &Market) -> String {
    let mut prompt = String::with_capacity(1000);
    prompt.push_str(&format!("MARKET: \"{}\"\n", market.title));
    prompt.push_str(&format!("CATEGORY: {}\n", market.category));
    for (i, outcome) in market.outcomes.iter().enumerate() {
        let price = market
            .outcome_marginal_prices
            .get(i)
            .copied()
            .unwrap_or(0.0);
        prompt.push_str(&format!("OUTCOME {outcome}: current price {price:.4}\n"));
    }
    prompt.push_str(&format!("USD VOLUME: {:.2}\n", market.usd_volume));
    prompt.push_str(&format!(
        "CLOSES: {}\n",
        market.opening_timestamp.format("%Y-%m-%d %H:%M UTC")
    ));
    prompt.push_str("\nAnalyze this market and respond with the JSON object.\n");
    prompt
}

fn build_validation_prompt(
    market: &Market,
    initial: &InitialAnalysis,
    search_context: &str,
) -> String {
    let mut prompt = String::with_capacity(2000);
    prompt.push_str(&format!("MARKET: \"{}\"\n\n", market.title));
    prompt.push_str("ANALYST RECOMMENDATION:\n");
    prompt.push_str(&format!("  SIDE: {}\n", initial.recommended_outcome));
    prompt.push_str(&format!("  CONFIDENCE: {:.0}\n", initial.confidence));
    prompt.push_str(&format!("  REASONING: {}\n", initial.reasoning));
    if !initial.risks.is_empty() {
        prompt.push_str(&format!("  RISKS: {}\n", initial.risks.join("; ")));
    }

    if search_context.is_empty() {
        prompt.push_str("\nWEB SEARCH CONTEXT: (unavailable)\n");
    } else {
        prompt.push_str("\nWEB SEARCH CONTEXT:\n");
        prompt.push_str(search_context);
    }

    prompt.push_str("\nReview the recommendation and respond with the JSON object.\n");
    prompt
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Pull the outermost JSON object out of a model response, tolerating
/// markdown code fences and surrounding prose.
fn extract_json(text: &str) -> Result<&str, String> {
    let start = text.find('{').ok_or("no JSON object in response")?;
    let end = text.rfind('}').ok_or("unterminated JSON object in response")?;
    if end < start {
        return Err("malformed JSON object in response".to_string());
    }
    Ok(&text[start..=end])
}

fn parse_initial_analysis(text: &str, market: &Market) -> Result<InitialAnalysis, String> {
    let json = extract_json(text)?;
    let analysis: InitialAnalysis =
        serde_json::from_str(json).map_err(|e| format!("invalid analysis JSON: {e}"))?;

    if analysis.recommended_outcome == Outcome::Abstain {
        // Stage one must pick a side; abstaining is the validator's call.
        return Err("stage one recommended Abstain".to_string());
    }
    if !market
        .outcomes
        .iter()
        .any(|o| o == analysis.recommended_outcome.as_str())
    {
        return Err(format!(
            "recommended outcome '{}' not offered by market",
            analysis.recommended_outcome
        ));
    }
    if !(0.0..=100.0).contains(&analysis.confidence) {
        return Err(format!("confidence {} out of range", analysis.confidence));
    }
    Ok(analysis)
}

fn parse_validation(text: &str) -> Result<Validation, String> {
    let json = extract_json(text)?;
    let validation: Validation =
        serde_json::from_str(json).map_err(|e| format!("invalid validation JSON: {e}"))?;

    let conf = validation.final_recommendation.confidence;
    if !(0.0..=100.0).contains(&conf) {
        return Err(format!("confidence {conf} out of range"));
    }
    Ok(validation)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
