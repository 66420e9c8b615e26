//! On-chain execution against Gnosis Chain.
//!
//! Trades settle through a Gnosis Safe: the agent's EOA signs Safe
//! transactions and submits them via `execTransaction`. The
//! `ExecutionEngine` trait is the seam the orchestrator and monitor
//! talk to; `SafeExecutionEngine` is the real implementation.

pub mod contracts;
pub mod engine;
pub mod safe;

pub use engine::SafeExecutionEngine;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::{Market, TraderError};

/// Collateral has 18 decimals on every market we trade (wxDAI).
const COLLATERAL_DECIMALS_SCALE: u64 = 1_000_000_000_000_000_000;

/// Everything needed to locate one outcome position on the
/// conditional tokens contract.
#[derive(Debug, Clone)]
pub struct PositionRef {
    pub market_id: String,
    pub condition_id: String,
    pub collateral_token: String,
    pub outcome_index: usize,
}

/// A submitted buy.
#[derive(Debug, Clone)]
pub struct TradeExecution {
    pub tx_hash: String,
    /// Outcome tokens we insisted on receiving at minimum.
    pub min_outcome_tokens: U256,
}

/// A completed redemption.
#[derive(Debug, Clone)]
pub struct ClaimReceipt {
    pub tx_hash: String,
    /// Collateral received, in whole-token units.
    pub redeemed: Decimal,
}

/// Abstraction over trade settlement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Spend `stake` collateral on one outcome of a market, bounding
    /// slippage. Ensures sufficient ERC-20 allowance first.
    async fn execute_buy(
        &self,
        market: &Market,
        outcome_index: usize,
        stake: Decimal,
    ) -> Result<TradeExecution>;

    /// Whether the Safe currently holds a winning position here.
    async fn is_winner(&self, position: &PositionRef) -> Result<bool>;

    /// Redeem a winning position for collateral.
    async fn claim_winnings(&self, position: &PositionRef) -> Result<ClaimReceipt>;
}

/// Whole-token decimal amount to 18-decimal wei.
pub fn to_wei(amount: Decimal) -> Result<U256, TraderError> {
    if amount.is_sign_negative() {
        return Err(TraderError::Execution(format!(
            "negative collateral amount {amount}"
        )));
    }
    let scaled = (amount * Decimal::from(COLLATERAL_DECIMALS_SCALE))
        .trunc()
        .normalize();
    U256::from_dec_str(&scaled.to_string())
        .map_err(|e| TraderError::Execution(format!("amount {amount} not representable: {e}")))
}

/// 18-decimal wei to a whole-token decimal amount.
pub fn from_wei(wei: U256) -> Result<Decimal, TraderError> {
    let raw = Decimal::from_str(&wei.to_string())
        .map_err(|e| TraderError::Execution(format!("wei amount {wei} too large: {e}")))?;
    Ok(raw / Decimal::from(COLLATERAL_DECIMALS_SCALE))
}

/// Slippage-bounded minimum: `expected * (1 - pct/100)`, computed in
/// integer basis points so nothing rounds in the caller's favour.
pub fn min_after_slippage(expected: U256, slippage_pct: f64) -> U256 {
    let bps = (slippage_pct * 100.0).round() as u64;
    let bps = bps.min(10_000);
    expected * U256::from(10_000 - bps) / U256::from(10_000)
}
