//! Resolution monitor.
//!
//! Runs two passes over the ledger each tick. Pass one settles the
//! books: every open position whose market has a finalized oracle
//! answer is marked resolved (losses realize immediately). Pass two
//! chases money: winning positions that were never redeemed are
//! claimed once the conditional tokens contract actually reports
//! payouts. The two passes are deliberately decoupled so a failed or
//! not-yet-possible claim never blocks bookkeeping, and claims keep
//! being retried on later ticks.
//!
//! Per-position failures are logged and skipped; one broken market
//! must not stall the rest of the book.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::chain::{ExecutionEngine, PositionRef};
use crate::ledger::Ledger;
use crate::notify::{Notifier, ResultEvent};
use crate::subgraph::{MarketAnswer, MarketSource};
use crate::types::{BuyTrade, Outcome};

#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorReport {
    pub trades_resolved: usize,
    pub claims_submitted: usize,
}

pub struct ResolutionMonitor {
    source: Arc<dyn MarketSource>,
    ledger: Arc<Ledger>,
    engine: Arc<dyn ExecutionEngine>,
    notifier: Arc<dyn Notifier>,
}

impl ResolutionMonitor {
    pub fn new(
        source: Arc<dyn MarketSource>,
        ledger: Arc<Ledger>,
        engine: Arc<dyn ExecutionEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            ledger,
            engine,
            notifier,
        }
    }

    pub async fn run(&self) -> Result<MonitorReport> {
        let mut report = MonitorReport::default();
        report.trades_resolved = self.resolve_pass().await?;
        report.claims_submitted = self.claim_pass().await?;
        Ok(report)
    }

    /// Pass one: mark finalized positions resolved.
    async fn resolve_pass(&self) -> Result<usize> {
        let open = self.ledger.list_unresolved_trades().await?;
        if open.is_empty() {
            return Ok(0);
        }
        debug!(open = open.len(), "Checking open positions for resolution");

        let mut resolved = 0;
        for trade in &open {
            match self.resolve_one(trade).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(market_id = %trade.market_id, error = %e, "Resolution check failed")
                }
            }
        }
        Ok(resolved)
    }

    async fn resolve_one(&self, trade: &BuyTrade) -> Result<bool> {
        let Some(answer) = self.source.market_answer(&trade.market_id).await? else {
            warn!(market_id = %trade.market_id, "Open position on unknown market");
            return Ok(false);
        };
        let Some(winning_index) = answer.winning_outcome_index() else {
            return Ok(false);
        };

        let result = Outcome::from_winning_index(winning_index);
        self.ledger.record_resolution(trade, result).await?;

        let won = trade.outcome == result;
        let profit = if won { None } else { Some(-trade.stake) };
        let event = ResultEvent {
            market_title: self.market_title(&trade.market_id).await,
            outcome: trade.outcome,
            result,
            profit,
        };
        if let Err(e) = self.notifier.announce_result(&event).await {
            warn!(market_id = %trade.market_id, error = %e, "Result announcement failed");
        }

        info!(market_id = %trade.market_id, result = %result, won, "Position resolved");
        Ok(true)
    }

    /// Pass two: redeem winners whose payouts are reported on-chain.
    async fn claim_pass(&self) -> Result<usize> {
        let winners = self.ledger.list_won_unclaimed_trades().await?;
        if winners.is_empty() {
            return Ok(0);
        }
        debug!(winners = winners.len(), "Checking winning positions for redemption");

        let mut claimed = 0;
        for trade in &winners {
            match self.claim_one(trade).await {
                Ok(true) => claimed += 1,
                Ok(false) => {}
                Err(e) => warn!(market_id = %trade.market_id, error = %e, "Claim failed"),
            }
        }
        Ok(claimed)
    }

    async fn claim_one(&self, trade: &BuyTrade) -> Result<bool> {
        let Some(answer) = self.source.market_answer(&trade.market_id).await? else {
            return Ok(false);
        };
        let Some(position) = position_ref(trade, &answer) else {
            return Ok(false);
        };

        // Oracle finality and on-chain payout reporting are separate
        // steps; wait for the latter before spending gas.
        if !self.engine.is_winner(&position).await? {
            debug!(market_id = %trade.market_id, "Payouts not reported yet, retrying next tick");
            return Ok(false);
        }

        let receipt = self.engine.claim_winnings(&position).await?;
        self.ledger
            .record_claim(trade, &receipt.tx_hash, receipt.redeemed)
            .await?;
        Ok(true)
    }

    async fn market_title(&self, market_id: &str) -> String {
        match self.ledger.analyzed_trade_for_market(market_id).await {
            Ok(Some(analyzed)) => analyzed.market_title,
            _ => market_id.to_string(),
        }
    }
}

fn position_ref(trade: &BuyTrade, answer: &MarketAnswer) -> Option<PositionRef> {
    let outcome_index = trade.outcome.index()?;
    Some(PositionRef {
        market_id: trade.market_id.clone(),
        condition_id: answer.condition.id.clone(),
        collateral_token: answer.collateral_token.clone(),
        outcome_index,
    })
}
