//! Durable trade ledger on SQLite.
//!
//! Four tables: `analyzed_trades` (every validated analysis, committed
//! or not), `buy_trades` (executed positions and their lifecycle),
//! `trade_resolutions` (append-only oracle results), and
//! `realized_outcomes` (per-position P&L rows). Related writes that
//! must land together — resolving a position, claiming winnings — run
//! inside one transaction.
//!
//! Timestamps are stored as RFC 3339 text and stakes as decimal text,
//! so rows stay readable in any SQLite shell and money never rounds.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{
    AnalyzedTrade, BuyTrade, Outcome, RealizedOutcome, TradeResolution, TraderError,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS analyzed_trades (
    id TEXT PRIMARY KEY,
    market_id TEXT NOT NULL,
    market_title TEXT NOT NULL,
    recommended_outcome TEXT NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL,
    risks TEXT NOT NULL,
    opportunities TEXT NOT NULL,
    created_at TEXT NOT NULL,
    result TEXT
);
CREATE INDEX IF NOT EXISTS idx_analyzed_market ON analyzed_trades(market_id);

CREATE TABLE IF NOT EXISTS buy_trades (
    id TEXT PRIMARY KEY,
    market_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    stake TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolution_timestamp TEXT NOT NULL,
    is_resolved INTEGER NOT NULL DEFAULT 0,
    result_outcome TEXT,
    claim_tx TEXT,
    claimed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_buy_market ON buy_trades(market_id);
CREATE INDEX IF NOT EXISTS idx_buy_unresolved ON buy_trades(is_resolved);

CREATE TABLE IF NOT EXISTS trade_resolutions (
    id TEXT PRIMARY KEY,
    market_id TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_resolution_market ON trade_resolutions(market_id);

CREATE TABLE IF NOT EXISTS realized_outcomes (
    id TEXT PRIMARY KEY,
    market_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    stake TEXT NOT NULL,
    result TEXT NOT NULL,
    profit TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub struct Ledger {
    pool: SqlitePool,
}

fn storage_err(e: impl std::fmt::Display) -> TraderError {
    TraderError::Storage(e.to_string())
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, TraderError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| storage_err(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>, TraderError> {
    s.as_deref().map(parse_dt).transpose()
}

fn parse_outcome(s: &str) -> Result<Outcome, TraderError> {
    Outcome::from_str(s).map_err(storage_err)
}

fn parse_opt_outcome(s: Option<String>) -> Result<Option<Outcome>, TraderError> {
    s.as_deref().map(parse_outcome).transpose()
}

fn parse_stake(s: &str) -> Result<Decimal, TraderError> {
    Decimal::from_str(s).map_err(|e| storage_err(format!("bad decimal '{s}': {e}")))
}

fn analyzed_from_row(row: &SqliteRow) -> Result<AnalyzedTrade, TraderError> {
    let risks: String = row.try_get("risks").map_err(storage_err)?;
    let opportunities: String = row.try_get("opportunities").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;
    let outcome: String = row.try_get("recommended_outcome").map_err(storage_err)?;
    let result: Option<String> = row.try_get("result").map_err(storage_err)?;

    Ok(AnalyzedTrade {
        id: row.try_get("id").map_err(storage_err)?,
        market_id: row.try_get("market_id").map_err(storage_err)?,
        market_title: row.try_get("market_title").map_err(storage_err)?,
        recommended_outcome: parse_outcome(&outcome)?,
        confidence: row.try_get("confidence").map_err(storage_err)?,
        reasoning: row.try_get("reasoning").map_err(storage_err)?,
        risks: serde_json::from_str(&risks).map_err(storage_err)?,
        opportunities: serde_json::from_str(&opportunities).map_err(storage_err)?,
        created_at: parse_dt(&created_at)?,
        result: parse_opt_outcome(result)?,
    })
}

fn buy_from_row(row: &SqliteRow) -> Result<BuyTrade, TraderError> {
    let stake: String = row.try_get("stake").map_err(storage_err)?;
    let outcome: String = row.try_get("outcome").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;
    let resolution_ts: String = row.try_get("resolution_timestamp").map_err(storage_err)?;
    let result_outcome: Option<String> = row.try_get("result_outcome").map_err(storage_err)?;
    let claimed_at: Option<String> = row.try_get("claimed_at").map_err(storage_err)?;

    Ok(BuyTrade {
        id: row.try_get("id").map_err(storage_err)?,
        market_id: row.try_get("market_id").map_err(storage_err)?,
        outcome: parse_outcome(&outcome)?,
        stake: parse_stake(&stake)?,
        created_at: parse_dt(&created_at)?,
        resolution_timestamp: parse_dt(&resolution_ts)?,
        is_resolved: row.try_get("is_resolved").map_err(storage_err)?,
        result_outcome: parse_opt_outcome(result_outcome)?,
        claim_tx: row.try_get("claim_tx").map_err(storage_err)?,
        claimed_at: parse_opt_dt(claimed_at)?,
    })
}

impl Ledger {
    /// Open (or create) the database and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(storage_err)?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(storage_err)?;

        info!(database_url, "Ledger ready");
        Ok(Self { pool })
    }

    // -- analyzed_trades ----------------------------------------------------

    pub async fn insert_analyzed_trade(&self, trade: &AnalyzedTrade) -> Result<()> {
        sqlx::query(
            "INSERT INTO analyzed_trades \
             (id, market_id, market_title, recommended_outcome, confidence, \
              reasoning, risks, opportunities, created_at, result) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.id)
        .bind(&trade.market_id)
        .bind(&trade.market_title)
        .bind(trade.recommended_outcome.as_str())
        .bind(trade.confidence)
        .bind(&trade.reasoning)
        .bind(serde_json::to_string(&trade.risks).map_err(storage_err)?)
        .bind(serde_json::to_string(&trade.opportunities).map_err(storage_err)?)
        .bind(trade.created_at.to_rfc3339())
        .bind(trade.result.map(|o| o.as_str()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(trade_id = %trade.id, market_id = %trade.market_id, "Analyzed trade recorded");
        Ok(())
    }

    /// Latest analysis for a market, if any. The presence of a row is
    /// what makes the orchestrator pass over a market permanently.
    pub async fn analyzed_trade_for_market(
        &self,
        market_id: &str,
    ) -> Result<Option<AnalyzedTrade>> {
        let row = sqlx::query(
            "SELECT * FROM analyzed_trades WHERE market_id = ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(analyzed_from_row).transpose().map_err(Into::into)
    }

    /// Backfill the oracle result onto every analysis row for a market
    /// once the market resolves.
    pub async fn attach_analysis_result(
        &self,
        market_id: &str,
        result: Outcome,
    ) -> Result<()> {
        sqlx::query("UPDATE analyzed_trades SET result = ? WHERE market_id = ?")
            .bind(result.as_str())
            .bind(market_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn list_analyzed_trades(&self) -> Result<Vec<AnalyzedTrade>> {
        let rows = sqlx::query("SELECT * FROM analyzed_trades ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|r| analyzed_from_row(r).map_err(Into::into))
            .collect()
    }

    // -- buy_trades ---------------------------------------------------------

    pub async fn insert_buy_trade(&self, trade: &BuyTrade) -> Result<()> {
        sqlx::query(
            "INSERT INTO buy_trades \
             (id, market_id, outcome, stake, created_at, resolution_timestamp, \
              is_resolved, result_outcome, claim_tx, claimed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.id)
        .bind(&trade.market_id)
        .bind(trade.outcome.as_str())
        .bind(trade.stake.to_string())
        .bind(trade.created_at.to_rfc3339())
        .bind(trade.resolution_timestamp.to_rfc3339())
        .bind(trade.is_resolved)
        .bind(trade.result_outcome.map(|o| o.as_str()))
        .bind(&trade.claim_tx)
        .bind(trade.claimed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        info!(
            trade_id = %trade.id,
            market_id = %trade.market_id,
            outcome = %trade.outcome,
            stake = %trade.stake,
            "Buy trade recorded"
        );
        Ok(())
    }

    pub async fn list_buy_trades(&self) -> Result<Vec<BuyTrade>> {
        let rows = sqlx::query("SELECT * FROM buy_trades ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|r| buy_from_row(r).map_err(Into::into))
            .collect()
    }

    /// Open positions due for a resolution check: still unresolved and
    /// past their expected resolution time.
    pub async fn list_unresolved_trades(&self) -> Result<Vec<BuyTrade>> {
        let rows = sqlx::query(
            "SELECT * FROM buy_trades \
             WHERE is_resolved = 0 AND resolution_timestamp <= ? \
             ORDER BY created_at ASC",
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter()
            .map(|r| buy_from_row(r).map_err(Into::into))
            .collect()
    }

    /// Positions whose market resolved in their favour but whose
    /// winnings have not been redeemed yet.
    pub async fn list_won_unclaimed_trades(&self) -> Result<Vec<BuyTrade>> {
        let rows = sqlx::query(
            "SELECT * FROM buy_trades \
             WHERE is_resolved = 1 AND result_outcome = outcome AND claim_tx IS NULL \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter()
            .map(|r| buy_from_row(r).map_err(Into::into))
            .collect()
    }

    // -- resolution & claim (transactional) ---------------------------------

    /// Mark a position resolved and append the oracle result, in one
    /// transaction. A losing position also realizes its loss here; a
    /// winning one realizes profit later, at claim time.
    pub async fn record_resolution(
        &self,
        trade: &BuyTrade,
        result: Outcome,
    ) -> Result<TradeResolution> {
        let now = Utc::now();
        let resolution = TradeResolution {
            id: Uuid::new_v4().to_string(),
            market_id: trade.market_id.clone(),
            result,
            created_at: now,
        };

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("UPDATE buy_trades SET is_resolved = 1, result_outcome = ? WHERE id = ?")
            .bind(result.as_str())
            .bind(&trade.id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "INSERT INTO trade_resolutions (id, market_id, result, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&resolution.id)
        .bind(&resolution.market_id)
        .bind(resolution.result.as_str())
        .bind(resolution.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query("UPDATE analyzed_trades SET result = ? WHERE market_id = ?")
            .bind(result.as_str())
            .bind(&trade.market_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        if trade.outcome != result {
            // Lost: the stake is gone as of now.
            let realized = realized_row(trade, result, -trade.stake, now);
            insert_realized(&mut tx, &realized).await?;
        }

        tx.commit().await.map_err(storage_err)?;

        info!(
            trade_id = %trade.id,
            market_id = %trade.market_id,
            result = %result,
            won = trade.outcome == result,
            "Trade resolved"
        );
        Ok(resolution)
    }

    /// Record a successful redemption: stamp the claim on the position
    /// and realize the profit, in one transaction.
    pub async fn record_claim(
        &self,
        trade: &BuyTrade,
        claim_tx: &str,
        redeemed: Decimal,
    ) -> Result<RealizedOutcome> {
        let now = Utc::now();
        let result = trade.result_outcome.unwrap_or(trade.outcome);
        let realized = realized_row(trade, result, redeemed - trade.stake, now);

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("UPDATE buy_trades SET claim_tx = ?, claimed_at = ? WHERE id = ?")
            .bind(claim_tx)
            .bind(now.to_rfc3339())
            .bind(&trade.id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        insert_realized(&mut tx, &realized).await?;

        tx.commit().await.map_err(storage_err)?;

        info!(
            trade_id = %trade.id,
            market_id = %trade.market_id,
            claim_tx,
            profit = %realized.profit,
            "Winnings claimed"
        );
        Ok(realized)
    }

    // -- trade_resolutions & realized_outcomes ------------------------------

    pub async fn latest_resolution_for_market(
        &self,
        market_id: &str,
    ) -> Result<Option<TradeResolution>> {
        let row = sqlx::query(
            "SELECT * FROM trade_resolutions WHERE market_id = ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else { return Ok(None) };
        let result: String = row.try_get("result").map_err(storage_err)?;
        let created_at: String = row.try_get("created_at").map_err(storage_err)?;
        Ok(Some(TradeResolution {
            id: row.try_get("id").map_err(storage_err)?,
            market_id: row.try_get("market_id").map_err(storage_err)?,
            result: parse_outcome(&result)?,
            created_at: parse_dt(&created_at)?,
        }))
    }

    pub async fn list_realized_outcomes(&self) -> Result<Vec<RealizedOutcome>> {
        let rows = sqlx::query("SELECT * FROM realized_outcomes ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .map(|row| -> Result<RealizedOutcome> {
                let outcome: String = row.try_get("outcome").map_err(storage_err)?;
                let result: String = row.try_get("result").map_err(storage_err)?;
                let stake: String = row.try_get("stake").map_err(storage_err)?;
                let profit: String = row.try_get("profit").map_err(storage_err)?;
                let created_at: String = row.try_get("created_at").map_err(storage_err)?;
                Ok(RealizedOutcome {
                    id: row.try_get("id").map_err(storage_err)?,
                    market_id: row.try_get("market_id").map_err(storage_err)?,
                    outcome: parse_outcome(&outcome)?,
                    stake: parse_stake(&stake)?,
                    result: parse_outcome(&result)?,
                    profit: parse_stake(&profit)?,
                    created_at: parse_dt(&created_at)?,
                })
            })
            .collect()
    }
}

fn realized_row(
    trade: &BuyTrade,
    result: Outcome,
    profit: Decimal,
    now: DateTime<Utc>,
) -> RealizedOutcome {
    RealizedOutcome {
        id: Uuid::new_v4().to_string(),
        market_id: trade.market_id.clone(),
        outcome: trade.outcome,
        stake: trade.stake,
        result,
        profit,
        created_at: now,
    }
}

async fn insert_realized(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    realized: &RealizedOutcome,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO realized_outcomes \
         (id, market_id, outcome, stake, result, profit, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&realized.id)
    .bind(&realized.market_id)
    .bind(realized.outcome.as_str())
    .bind(realized.stake.to_string())
    .bind(realized.result.as_str())
    .bind(realized.profit.to_string())
    .bind(realized.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(storage_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
