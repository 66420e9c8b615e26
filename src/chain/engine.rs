//! Settlement engine over the Safe wallet.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use secrecy::SecretString;
use tracing::{debug, info};

use super::contracts::{ConditionalTokens, Erc20, FixedProductMarketMaker};
use super::safe::{SafeClient, SafeWallet};
use super::{
    from_wei, min_after_slippage, to_wei, ClaimReceipt, ExecutionEngine, PositionRef,
    TradeExecution,
};
use crate::config::ChainConfig;
use crate::types::{Market, TraderError};

/// Gnosis Chain conditional tokens deployment.
const CONDITIONAL_TOKENS_ADDRESS: &str = "0xCeAfDD6bc0bEF976fdCd1112955828E00543c0Ce";

fn exec_err(e: impl std::fmt::Display) -> TraderError {
    TraderError::Execution(e.to_string())
}

fn parse_address(s: &str) -> Result<Address, TraderError> {
    s.parse()
        .map_err(|_| exec_err(format!("bad address '{s}'")))
}

fn parse_bytes32(s: &str) -> Result<[u8; 32], TraderError> {
    let raw = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| exec_err(format!("bad bytes32 '{s}': {e}")))?;
    raw.try_into()
        .map_err(|_| exec_err(format!("bytes32 '{s}' has wrong length")))
}

/// A position is redeemable only when tokens are actually held and
/// the oracle has reported a payout for that outcome.
fn redeemable(balance: U256, payout_numerator: U256) -> bool {
    !balance.is_zero() && !payout_numerator.is_zero()
}

pub struct SafeExecutionEngine {
    safe: SafeWallet,
    client: Arc<SafeClient>,
    conditional_tokens: Address,
    slippage_pct: f64,
}

impl SafeExecutionEngine {
    pub async fn connect(
        chain: &ChainConfig,
        signer_key: &SecretString,
        slippage_pct: f64,
    ) -> Result<Self> {
        let safe = SafeWallet::connect(&chain.rpc_url, &chain.safe_address, signer_key).await?;

        if !safe.is_deployed().await? {
            return Err(TraderError::InsufficientSettings(format!(
                "no Safe deployed at {}",
                chain.safe_address
            ))
            .into());
        }
        let owners = safe.owners().await?;
        if !owners.contains(&safe.signer_address()) {
            return Err(TraderError::InsufficientSettings(format!(
                "signer {:?} is not an owner of Safe {}",
                safe.signer_address(),
                chain.safe_address
            ))
            .into());
        }

        let client = safe.client();
        Ok(Self {
            safe,
            client,
            conditional_tokens: parse_address(CONDITIONAL_TOKENS_ADDRESS)?,
            slippage_pct,
        })
    }

    /// Approve the market maker to pull collateral if the current
    /// allowance cannot cover the buy. Approves unlimited so each
    /// market pays the approval gas at most once.
    async fn ensure_allowance(
        &self,
        collateral_addr: Address,
        spender: Address,
        needed: U256,
    ) -> Result<()> {
        let collateral = Erc20::new(collateral_addr, self.client.clone());
        let allowance = collateral
            .allowance(self.safe.address(), spender)
            .call()
            .await
            .map_err(exec_err)?;

        if allowance >= needed {
            debug!(spender = %spender, "Allowance already sufficient");
            return Ok(());
        }

        let data = collateral
            .approve(spender, U256::MAX)
            .calldata()
            .ok_or_else(|| exec_err("failed to encode approve calldata"))?;
        let tx_hash = self.safe.exec(collateral_addr, data).await?;
        info!(spender = %spender, tx = ?tx_hash, "Collateral approved");
        Ok(())
    }
}

#[async_trait]
impl ExecutionEngine for SafeExecutionEngine {
    async fn execute_buy(
        &self,
        market: &Market,
        outcome_index: usize,
        stake: Decimal,
    ) -> Result<TradeExecution> {
        if outcome_index >= market.outcomes.len() {
            return Err(exec_err(format!(
                "outcome index {outcome_index} out of range for market {}",
                market.id
            ))
            .into());
        }

        let fpmm_addr = parse_address(&market.id)?;
        let fpmm = FixedProductMarketMaker::new(fpmm_addr, self.client.clone());
        let investment = to_wei(stake)?;

        let collateral_addr = fpmm.collateral_token().call().await.map_err(exec_err)?;
        self.ensure_allowance(collateral_addr, fpmm_addr, investment)
            .await?;

        let expected = fpmm
            .calc_buy_amount(investment, U256::from(outcome_index))
            .call()
            .await
            .map_err(exec_err)?;
        let min_outcome_tokens = min_after_slippage(expected, self.slippage_pct);

        debug!(
            market_id = %market.id,
            outcome_index,
            investment = %investment,
            expected = %expected,
            min = %min_outcome_tokens,
            "Submitting buy"
        );

        let data = fpmm
            .buy(investment, U256::from(outcome_index), min_outcome_tokens)
            .calldata()
            .ok_or_else(|| exec_err("failed to encode buy calldata"))?;
        let tx_hash = self.safe.exec(fpmm_addr, data).await?;

        info!(
            market_id = %market.id,
            outcome_index,
            stake = %stake,
            tx = ?tx_hash,
            "Buy executed"
        );
        Ok(TradeExecution {
            tx_hash: format!("{tx_hash:#x}"),
            min_outcome_tokens,
        })
    }

    async fn is_winner(&self, position: &PositionRef) -> Result<bool> {
        // Binary markets: index sets are single bits.
        if position.outcome_index >= 2 {
            return Err(exec_err(format!(
                "outcome index {} not binary",
                position.outcome_index
            ))
            .into());
        }

        let condition_id = parse_bytes32(&position.condition_id)?;
        let collateral = parse_address(&position.collateral_token)?;
        let ct = ConditionalTokens::new(self.conditional_tokens, self.client.clone());

        let index_set = U256::from(1u64 << position.outcome_index);
        let collection = ct
            .get_collection_id([0u8; 32], condition_id, index_set)
            .call()
            .await
            .map_err(exec_err)?;
        let position_id = ct
            .get_position_id(collateral, collection)
            .call()
            .await
            .map_err(exec_err)?;

        let balance = ct
            .balance_of(self.safe.address(), position_id)
            .call()
            .await
            .map_err(exec_err)?;
        let payout = ct
            .payout_numerators(condition_id, U256::from(position.outcome_index))
            .call()
            .await
            .map_err(exec_err)?;

        Ok(redeemable(balance, payout))
    }

    async fn claim_winnings(&self, position: &PositionRef) -> Result<ClaimReceipt> {
        let condition_id = parse_bytes32(&position.condition_id)?;
        let collateral_addr = parse_address(&position.collateral_token)?;
        let ct = ConditionalTokens::new(self.conditional_tokens, self.client.clone());
        let collateral = Erc20::new(collateral_addr, self.client.clone());

        let before = collateral
            .balance_of(self.safe.address())
            .call()
            .await
            .map_err(exec_err)?;

        // Redeem both index sets; losing positions are worth zero and
        // redeeming them is a no-op.
        let data = ct
            .redeem_positions(
                collateral_addr,
                [0u8; 32],
                condition_id,
                vec![U256::from(1u64), U256::from(2u64)],
            )
            .calldata()
            .ok_or_else(|| exec_err("failed to encode redeemPositions calldata"))?;
        let tx_hash = self.safe.exec(self.conditional_tokens, data).await?;

        let after = collateral
            .balance_of(self.safe.address())
            .call()
            .await
            .map_err(exec_err)?;
        let redeemed = from_wei(after.saturating_sub(before))?;

        info!(
            market_id = %position.market_id,
            tx = ?tx_hash,
            redeemed = %redeemed,
            "Position redeemed"
        );
        Ok(ClaimReceipt {
            tx_hash: format!("{tx_hash:#x}"),
            redeemed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bytes32() {
        let hex32 = "0x00000000000000000000000000000000000000000000000000000000000000ff";
        let parsed = parse_bytes32(hex32).unwrap();
        assert_eq!(parsed[31], 0xff);
        assert!(parse_bytes32("0x1234").is_err());
        assert!(parse_bytes32("not hex").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address("0xCeAfDD6bc0bEF976fdCd1112955828E00543c0Ce").is_ok());
        assert!(parse_address("0x123").is_err());
    }

    #[test]
    fn test_zero_balance_never_redeemable() {
        assert!(!redeemable(U256::zero(), U256::from(1)));
        assert!(!redeemable(U256::from(5), U256::zero()));
        assert!(redeemable(U256::from(5), U256::from(1)));
    }
}
