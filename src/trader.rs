//! Trading loop orchestrator.
//!
//! One tick settles the existing book via the resolution monitor, then
//! hunts for at most one new entry: fetch the creator's markets,
//! filter to tradeable candidates, and draw candidates at random
//! without replacement until a trade is entered or the pool runs dry.
//! Markets with a ledgered analysis (an executed position) are passed
//! over permanently; markets analysed within the cache TTL — skipped
//! or failed — are passed over without touching any collaborator and
//! become eligible again once the entry expires.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisPipeline, Verdict};
use crate::cache::AnalysisCache;
use crate::chain::ExecutionEngine;
use crate::ledger::Ledger;
use crate::monitor::ResolutionMonitor;
use crate::notify::{EntryEvent, Notifier, SkipEvent};
use crate::subgraph::MarketSource;
use crate::types::{AnalyzedTrade, BuyTrade, InitialAnalysis, Market, TickReport, Validation};

pub struct TraderSettings {
    pub trading_enabled: bool,
    pub market_creator: String,
    pub min_usd_volume: f64,
}

pub struct Trader {
    settings: TraderSettings,
    source: Arc<dyn MarketSource>,
    cache: AnalysisCache,
    pipeline: AnalysisPipeline,
    ledger: Arc<Ledger>,
    engine: Arc<dyn ExecutionEngine>,
    notifier: Arc<dyn Notifier>,
    monitor: ResolutionMonitor,
}

/// A market is worth analysing when it still has an open question and
/// enough real volume to be worth the spend.
pub fn is_candidate(market: &Market, min_usd_volume: f64) -> bool {
    !market.has_finalized_answer() && market.usd_volume >= min_usd_volume
}

impl Trader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: TraderSettings,
        source: Arc<dyn MarketSource>,
        cache: AnalysisCache,
        pipeline: AnalysisPipeline,
        ledger: Arc<Ledger>,
        engine: Arc<dyn ExecutionEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let monitor = ResolutionMonitor::new(
            source.clone(),
            ledger.clone(),
            engine.clone(),
            notifier.clone(),
        );
        Self {
            settings,
            source,
            cache,
            pipeline,
            ledger,
            engine,
            notifier,
            monitor,
        }
    }

    /// One full cycle: settle the book, then look for a new entry.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        // Settle first so resolutions land before fresh capital goes out.
        match self.monitor.run().await {
            Ok(monitor_report) => {
                report.trades_resolved = monitor_report.trades_resolved;
                report.claims_submitted = monitor_report.claims_submitted;
            }
            Err(e) => warn!(error = %e, "Resolution monitor failed this tick"),
        }

        if !self.settings.trading_enabled {
            debug!("Trading disabled, tick limited to settlement");
            return Ok(report);
        }

        let markets = self
            .source
            .markets_by_creator(&self.settings.market_creator)
            .await?;
        report.markets_fetched = markets.len();

        let mut pool: Vec<Market> = markets
            .into_iter()
            .filter(|m| is_candidate(m, self.settings.min_usd_volume))
            .collect();
        report.candidates = pool.len();

        let mut rng = rand::thread_rng();
        while !pool.is_empty() {
            let market = pool.swap_remove(rng.gen_range(0..pool.len()));

            // Fresh cache entry: this market was analysed minutes ago.
            if self.cache.contains_fresh(&market.id) {
                debug!(market_id = %market.id, "Analysis still fresh, passing over");
                continue;
            }

            // A ledgered analysis means a position was taken here;
            // this market is done for good.
            if self
                .ledger
                .analyzed_trade_for_market(&market.id)
                .await?
                .is_some()
            {
                debug!(market_id = %market.id, "Market already traded, passing over");
                continue;
            }

            report.attempts += 1;
            match self.pipeline.run(&market).await {
                Ok(Verdict::Committed {
                    analysis,
                    validation,
                    stake,
                }) => {
                    self.cache
                        .insert(&market.id, validation.final_recommendation.clone());

                    // Nothing is ledgered until the buy confirms: a
                    // failed execution leaves the market eligible for
                    // re-selection once the cache entry expires.
                    match self
                        .enter_position(&market, &analysis, &validation, stake)
                        .await
                    {
                        Ok(()) => {
                            report.entered += 1;
                            break;
                        }
                        Err(e) => {
                            warn!(market_id = %market.id, error = %e, "Trade execution failed");
                            report.skipped += 1;
                        }
                    }
                }
                Ok(Verdict::Skipped {
                    validation, reason, ..
                }) => {
                    self.cache
                        .insert(&market.id, validation.final_recommendation.clone());

                    let rec = &validation.final_recommendation;
                    let event = SkipEvent {
                        market_title: market.title.clone(),
                        outcome: rec.recommended_outcome,
                        confidence: rec.confidence,
                        reason: reason.to_string(),
                    };
                    if let Err(e) = self.notifier.announce_skip(&event).await {
                        warn!(market_id = %market.id, error = %e, "Skip announcement failed");
                    }
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "Analysis failed");
                    report.skipped += 1;
                }
            }
        }

        info!(%report, "Tick complete");
        Ok(report)
    }

    async fn enter_position(
        &self,
        market: &Market,
        analysis: &InitialAnalysis,
        validation: &Validation,
        stake: rust_decimal::Decimal,
    ) -> Result<()> {
        let rec = &validation.final_recommendation;
        let Some(outcome_index) = rec.recommended_outcome.index() else {
            // Committed verdicts never carry Abstain; belt and braces.
            anyhow::bail!("committed verdict without a tradeable outcome");
        };

        let execution = self
            .engine
            .execute_buy(market, outcome_index, stake)
            .await?;

        let analyzed = analyzed_row(market, analysis, validation);
        self.ledger.insert_analyzed_trade(&analyzed).await?;

        let trade = BuyTrade {
            id: Uuid::new_v4().to_string(),
            market_id: market.id.clone(),
            outcome: rec.recommended_outcome,
            stake,
            created_at: Utc::now(),
            // The market's close is when we expect to revisit it.
            resolution_timestamp: market.opening_timestamp,
            is_resolved: false,
            result_outcome: None,
            claim_tx: None,
            claimed_at: None,
        };
        self.ledger.insert_buy_trade(&trade).await?;

        let event = EntryEvent {
            market_title: market.title.clone(),
            outcome: rec.recommended_outcome,
            confidence: rec.confidence,
            stake,
        };
        if let Err(e) = self.notifier.announce_entry(&event).await {
            warn!(market_id = %market.id, error = %e, "Entry announcement failed");
        }

        info!(
            market_id = %market.id,
            outcome = %rec.recommended_outcome,
            stake = %stake,
            tx = %execution.tx_hash,
            "Position entered"
        );
        Ok(())
    }
}

fn analyzed_row(
    market: &Market,
    analysis: &InitialAnalysis,
    validation: &Validation,
) -> AnalyzedTrade {
    let rec = &validation.final_recommendation;
    AnalyzedTrade {
        id: Uuid::new_v4().to_string(),
        market_id: market.id.clone(),
        market_title: market.title.clone(),
        recommended_outcome: rec.recommended_outcome,
        confidence: rec.confidence,
        reasoning: rec.reasoning.clone(),
        risks: analysis.risks.clone(),
        opportunities: analysis.opportunities.clone(),
        created_at: Utc::now(),
        result: None,
    }
}
