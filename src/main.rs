//! PRESAGIO — autonomous prediction-market trading agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the subgraph, LLM, Safe, ledger, and notifier together, and
//! runs the trading tick loop with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use presagio::analysis::AnalysisPipeline;
use presagio::cache::{AnalysisCache, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use presagio::chain::SafeExecutionEngine;
use presagio::config::AppConfig;
use presagio::dashboard::{self, AppState};
use presagio::ledger::Ledger;
use presagio::llm;
use presagio::notify::{Notifier, NullNotifier, TwitterNotifier};
use presagio::search::{TavilyClient, WebSearch};
use presagio::subgraph::SubgraphClient;
use presagio::trader::{Trader, TraderSettings};

const BANNER: &str = r#"
 ____  ____  _____ ____    _    ____ ___ ___
|  _ \|  _ \| ____/ ___|  / \  / ___|_ _/ _ \
| |_) | |_) |  _| \___ \ / _ \| |  _ | | | | |
|  __/|  _ <| |___ ___) / ___ \ |_| || | |_| |
|_|   |_| \_\_____|____/_/   \_\____|___\___/

  Presagio market trading agent
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        trading_enabled = cfg.agent.trading_enabled,
        interval_ms = cfg.agent.trading_interval_ms,
        creator = %cfg.agent.market_creator,
        "Agent starting up"
    );

    cfg.validate()?;

    // -- Initialise components -------------------------------------------

    let ledger = Arc::new(Ledger::connect(&cfg.agent.database_url).await?);
    let source = Arc::new(SubgraphClient::new(cfg.subgraph.url.clone())?);

    let llm_api_key = SecretString::new(AppConfig::resolve_env(&cfg.llm.api_key_env)?);
    let generator = llm::build_generator(&cfg.llm, llm_api_key)?;
    info!(provider = %cfg.llm.provider, model = %cfg.llm.model, "LLM ready");

    let searcher: Option<Arc<dyn WebSearch>> =
        match AppConfig::resolve_env(&cfg.search.api_key_env) {
            Ok(key) => Some(Arc::new(TavilyClient::new(
                SecretString::new(key),
                cfg.search.max_results,
            )?)),
            Err(_) => {
                warn!(
                    env = %cfg.search.api_key_env,
                    "No search API key — validation runs without web context"
                );
                None
            }
        };

    let signer_key = cfg.signer_key()?;
    let engine = Arc::new(
        SafeExecutionEngine::connect(
            &cfg.chain,
            &signer_key,
            cfg.agent.slippage_tolerance_pct,
        )
        .await?,
    );

    let notifier: Arc<dyn Notifier> = if cfg.twitter.enabled {
        let bearer = cfg
            .twitter
            .bearer_token_env
            .as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .map(SecretString::new);
        Arc::new(TwitterNotifier::new(
            cfg.twitter.username.clone(),
            bearer,
            cfg.twitter.dry_run,
        ))
    } else {
        Arc::new(NullNotifier)
    };

    let cache = AnalysisCache::new(DEFAULT_TTL);
    cache.start_sweeper(DEFAULT_SWEEP_INTERVAL);

    let pipeline = AnalysisPipeline::new(generator.clone(), searcher);
    let trader = Trader::new(
        TraderSettings {
            trading_enabled: cfg.agent.trading_enabled,
            market_creator: cfg.agent.market_creator.clone(),
            min_usd_volume: cfg.agent.min_usd_volume,
        },
        source,
        cache,
        pipeline,
        ledger.clone(),
        engine,
        notifier,
    );

    // -- Dashboard ---------------------------------------------------------

    let last_tick = Arc::new(RwLock::new(None));
    if cfg.dashboard.enabled {
        let state = Arc::new(AppState {
            agent_name: cfg.agent.name.clone(),
            started_at: Utc::now(),
            ledger: ledger.clone(),
            generator: generator.clone(),
            last_tick: last_tick.clone(),
        });
        let port = cfg.dashboard.port;
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(state, port).await {
                error!(error = %e, "Dashboard exited");
            }
        });
    }

    // -- Main loop ---------------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_millis(cfg.agent.trading_interval_ms));
    // A slow tick must not cause a burst of catch-up ticks.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_ms = cfg.agent.trading_interval_ms,
        "Entering trading loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match trader.tick().await {
                    Ok(report) => {
                        *last_tick.write().await = Some(report);
                    }
                    Err(e) => {
                        error!(error = %e, "Tick failed — continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(
        llm_cost = format!("${:.4}", generator.cumulative_cost()),
        "Agent shut down cleanly."
    );
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("presagio=info"));

    let json_logging = std::env::var("PRESAGIO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
