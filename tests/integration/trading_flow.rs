//! End-to-end trading ticks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use presagio::analysis::AnalysisPipeline;
use presagio::cache::AnalysisCache;
use presagio::ledger::Ledger;
use presagio::notify::{EntryEvent, ResultEvent, SkipEvent};
use presagio::trader::{Trader, TraderSettings};
use presagio::types::{
    AnalyzedTrade, BuyTrade, FinalRecommendation, Market, Outcome,
};

use crate::mocks::{
    finalized_answer, market, stage_one, stage_two, MockEngine, MockSource,
    RecordedBuy, RecordingNotifier, ScriptedGenerator,
};

const ANSWER_YES_WINS: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";
const ANSWER_NO_WINS: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";

struct Harness {
    trader: Trader,
    ledger: Arc<Ledger>,
    cache: AnalysisCache,
    gen_calls: Arc<Mutex<usize>>,
    buys: Arc<Mutex<Vec<RecordedBuy>>>,
    claims_seen: Arc<Mutex<Vec<presagio::chain::PositionRef>>>,
    winner: Arc<Mutex<bool>>,
    entries: Arc<Mutex<Vec<EntryEvent>>>,
    skips: Arc<Mutex<Vec<SkipEvent>>>,
    results: Arc<Mutex<Vec<ResultEvent>>>,
}

async fn harness(
    source: MockSource,
    responses: Vec<&str>,
    trading_enabled: bool,
) -> Harness {
    let ledger = Arc::new(Ledger::connect("sqlite::memory:").await.unwrap());
    let generator = Arc::new(ScriptedGenerator::new(responses));
    let gen_calls = generator.calls.clone();
    let engine = Arc::new(MockEngine::new());
    let buys = engine.buys.clone();
    let claims_seen = engine.claims.clone();
    let winner = engine.winner.clone();
    let notifier = Arc::new(RecordingNotifier::default());
    let entries = notifier.entries.clone();
    let skips = notifier.skips.clone();
    let results = notifier.results.clone();
    let cache = AnalysisCache::new(Duration::from_secs(1200));

    let trader = Trader::new(
        TraderSettings {
            trading_enabled,
            market_creator: "0x89c5cc945dd550bcffb72fe42bff002429f46fec".to_string(),
            min_usd_volume: 15.0,
        },
        Arc::new(source),
        cache.clone(),
        AnalysisPipeline::new(generator, None),
        ledger.clone(),
        engine,
        notifier,
    );

    Harness {
        trader,
        ledger,
        cache,
        gen_calls,
        buys,
        claims_seen,
        winner,
        entries,
        skips,
        results,
    }
}

fn open_trade(market_id: &str, outcome: Outcome) -> BuyTrade {
    BuyTrade {
        id: Uuid::new_v4().to_string(),
        market_id: market_id.to_string(),
        outcome,
        stake: dec!(0.012),
        created_at: Utc::now(),
        resolution_timestamp: Utc::now(),
        is_resolved: false,
        result_outcome: None,
        claim_tx: None,
        claimed_at: None,
    }
}

fn ledgered_analysis(market: &Market) -> AnalyzedTrade {
    AnalyzedTrade {
        id: Uuid::new_v4().to_string(),
        market_id: market.id.clone(),
        market_title: market.title.clone(),
        recommended_outcome: Outcome::Yes,
        confidence: 72.0,
        reasoning: "previously traded".to_string(),
        risks: vec![],
        opportunities: vec![],
        created_at: Utc::now(),
        result: None,
    }
}

// ---------------------------------------------------------------------------
// Entry flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_committed_analysis_enters_exactly_one_trade() {
    let candidate = market("0xmarket1", 20.0);
    let opening = candidate.opening_timestamp;
    let source = MockSource::with_markets(vec![candidate]);
    let h = harness(
        source,
        vec![&stage_one("Yes", 70.0), &stage_two(true, "Yes", 72.0)],
        true,
    )
    .await;

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.entered, 1);
    assert_eq!(report.skipped, 0);

    // One analysis row carrying the validator's final word.
    let analyses = h.ledger.list_analyzed_trades().await.unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].recommended_outcome, Outcome::Yes);
    assert!((analyses[0].confidence - 72.0).abs() < 1e-10);

    // One position, sized off the final confidence, revisited at close.
    let trades = h.ledger.list_buy_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].stake, dec!(0.012));
    assert_eq!(trades[0].resolution_timestamp, opening);
    assert!(!trades[0].is_resolved);

    // The buy went to outcome index 0 (Yes).
    let buys = h.buys.lock().unwrap();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].outcome_index, 0);
    assert_eq!(buys[0].stake, dec!(0.012));

    // And it was announced.
    assert_eq!(h.entries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ledgered_market_is_never_reanalyzed() {
    let candidate = market("0xmarket1", 20.0);
    let analysis = ledgered_analysis(&candidate);
    let source = MockSource::with_markets(vec![candidate]);
    let h = harness(source, vec![], true).await;
    h.ledger.insert_analyzed_trade(&analysis).await.unwrap();

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.attempts, 0);
    assert_eq!(report.entered, 0);
    assert_eq!(*h.gen_calls.lock().unwrap(), 0);
    assert!(h.buys.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fresh_cache_skips_without_collaborator_calls() {
    let candidate = market("0xmarket1", 20.0);
    let market_id = candidate.id.clone();
    let source = MockSource::with_markets(vec![candidate]);
    let h = harness(source, vec![], true).await;

    h.cache.insert(
        &market_id,
        FinalRecommendation {
            recommended_outcome: Outcome::No,
            confidence: 48.0,
            reasoning: "cached".to_string(),
        },
    );

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.attempts, 0);
    assert_eq!(*h.gen_calls.lock().unwrap(), 0);
    assert!(h.ledger.list_analyzed_trades().await.unwrap().is_empty());
    assert!(h.buys.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_inconsistent_validation_skips_and_keeps_drawing() {
    let source = MockSource::with_markets(vec![
        market("0xmarket1", 20.0),
        market("0xmarket2", 30.0),
    ]);
    // Both draws: confident stage one, inconsistent stage two.
    let s1 = stage_one("Yes", 80.0);
    let s2 = stage_two(false, "No", 55.0);
    let h = harness(source, vec![&s1, &s2, &s1, &s2], true).await;

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.entered, 0);
    assert_eq!(report.skipped, 2);

    // Nothing ledgered, both skips announced, no positions opened.
    assert!(h.ledger.list_analyzed_trades().await.unwrap().is_empty());
    assert!(h.ledger.list_buy_trades().await.unwrap().is_empty());
    assert!(h.entries.lock().unwrap().is_empty());
    assert_eq!(h.skips.lock().unwrap().len(), 2);

    // Both markets sit in the cache now, so the next tick is quiet.
    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.attempts, 0);
}

#[tokio::test]
async fn test_low_volume_markets_are_not_candidates() {
    let source = MockSource::with_markets(vec![market("0xmarket1", 14.0)]);
    let h = harness(source, vec![], true).await;

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.markets_fetched, 1);
    assert_eq!(report.candidates, 0);
    assert_eq!(*h.gen_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_failed_execution_leaves_no_ledger_rows() {
    let candidate = market("0xmarket1", 20.0);
    let source = MockSource::with_markets(vec![candidate]);

    let ledger = Arc::new(Ledger::connect("sqlite::memory:").await.unwrap());
    let generator = Arc::new(ScriptedGenerator::new(vec![
        &stage_one("Yes", 70.0),
        &stage_two(true, "Yes", 72.0),
    ]));
    let mut engine = MockEngine::new();
    engine.fail_buys = true;
    let notifier = Arc::new(RecordingNotifier::default());
    let entries = notifier.entries.clone();
    let cache = AnalysisCache::new(Duration::from_secs(1200));

    let trader = Trader::new(
        TraderSettings {
            trading_enabled: true,
            market_creator: "0x89c5cc945dd550bcffb72fe42bff002429f46fec".to_string(),
            min_usd_volume: 15.0,
        },
        Arc::new(source),
        cache.clone(),
        AnalysisPipeline::new(generator, None),
        ledger.clone(),
        Arc::new(engine),
        notifier,
    );

    let report = trader.tick().await.unwrap();
    assert_eq!(report.entered, 0);
    assert_eq!(report.skipped, 1);

    // Nothing recorded and nothing announced; the cache entry is the
    // only trace, so the market comes back once it expires.
    assert!(ledger.list_analyzed_trades().await.unwrap().is_empty());
    assert!(ledger.list_buy_trades().await.unwrap().is_empty());
    assert!(entries.lock().unwrap().is_empty());
    assert!(cache.contains_fresh("0xmarket1"));
}

// ---------------------------------------------------------------------------
// Resolution flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_winning_position_resolves_then_claims_when_payouts_report() {
    let mut source = MockSource::with_markets(vec![]);
    source.set_answer(finalized_answer("0xmarket1", ANSWER_YES_WINS));
    let h = harness(source, vec![], false).await;

    let trade = open_trade("0xmarket1", Outcome::Yes);
    h.ledger.insert_buy_trade(&trade).await.unwrap();

    // Tick one: the answer is final, so the book settles, but the
    // conditional tokens contract has not reported payouts yet.
    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.trades_resolved, 1);
    assert_eq!(report.claims_submitted, 0);

    let resolved = &h.ledger.list_buy_trades().await.unwrap()[0];
    assert!(resolved.is_resolved);
    assert_eq!(resolved.result_outcome, Some(Outcome::Yes));
    assert!(resolved.won());
    assert!(resolved.claim_tx.is_none());

    let results = h.results.lock().unwrap().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, Outcome::Yes);
    assert!(results[0].profit.is_none());
    drop(results);

    // No P&L yet: a win realizes at claim time.
    assert!(h.ledger.list_realized_outcomes().await.unwrap().is_empty());

    // Tick two: payouts reported, the claim goes through.
    *h.winner.lock().unwrap() = true;
    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.trades_resolved, 0);
    assert_eq!(report.claims_submitted, 1);

    let claimed = &h.ledger.list_buy_trades().await.unwrap()[0];
    assert_eq!(claimed.claim_tx.as_deref(), Some("0xclaim"));

    let realized = h.ledger.list_realized_outcomes().await.unwrap();
    assert_eq!(realized.len(), 1);
    assert_eq!(realized[0].profit, dec!(0.008)); // 0.02 redeemed - 0.012 stake

    let claims = h.claims_seen.lock().unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].outcome_index, 0);

    // Tick three: nothing left to do.
    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.claims_submitted, 0);
}

#[tokio::test]
async fn test_losing_position_realizes_loss_immediately() {
    let mut source = MockSource::with_markets(vec![]);
    source.set_answer(finalized_answer("0xmarket1", ANSWER_NO_WINS));
    let h = harness(source, vec![], false).await;

    // We bought Yes; the oracle says index 1 (No) won.
    let trade = open_trade("0xmarket1", Outcome::Yes);
    h.ledger.insert_buy_trade(&trade).await.unwrap();

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.trades_resolved, 1);
    assert_eq!(report.claims_submitted, 0);

    let resolved = &h.ledger.list_buy_trades().await.unwrap()[0];
    assert_eq!(resolved.result_outcome, Some(Outcome::No));
    assert!(!resolved.won());

    let realized = h.ledger.list_realized_outcomes().await.unwrap();
    assert_eq!(realized.len(), 1);
    assert_eq!(realized[0].profit, dec!(-0.012));

    let results = h.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].profit, Some(dec!(-0.012)));
}

#[tokio::test]
async fn test_unfinalized_answer_leaves_position_open() {
    let mut source = MockSource::with_markets(vec![]);
    let mut answer = finalized_answer("0xmarket1", ANSWER_YES_WINS);
    answer.answer_finalized_timestamp = Some(Utc::now() + chrono::Duration::hours(6));
    source.set_answer(answer);
    let h = harness(source, vec![], false).await;

    h.ledger
        .insert_buy_trade(&open_trade("0xmarket1", Outcome::Yes))
        .await
        .unwrap();

    let report = h.trader.tick().await.unwrap();
    assert_eq!(report.trades_resolved, 0);
    assert!(!h.ledger.list_buy_trades().await.unwrap()[0].is_resolved);
    assert!(h.results.lock().unwrap().is_empty());
}
