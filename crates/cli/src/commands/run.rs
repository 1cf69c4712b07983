//! Runs the execution engine over an opportunity feed.
//!
//! Startup order matters: interrupted executions are recovered before the
//! engine accepts anything, so a half-finished trade is never doubled up.
//! The resolver and reconciler then run on their own timers alongside the
//! engine until Ctrl+C or the end of the feed.
//!
//! ## Example Usage
//!
//! ```bash
//! # Paper replay of a recorded feed
//! cargo run -p sportsarb-cli -- run --paper \
//!     --mappings config/mappings.json --feed data/opportunities.jsonl
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use sportsarb_core::{AppConfig, Opportunity};
use sportsarb_cross::{
    CircuitBreaker, ExecutionEngine, FeeCalculator, Reconciler, Recovery, Resolver, SessionStore,
    StaticMappingService,
};

use super::{open_ledger, PaperVenues, VenueArgs};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub venues: VenueArgs,

    /// JSON file of game/team to market mappings
    #[arg(long)]
    pub mappings: PathBuf,

    /// JSON Lines file of detected opportunities
    #[arg(long)]
    pub feed: PathBuf,

    /// Delay between opportunities in milliseconds
    #[arg(long, default_value = "0")]
    pub pace_ms: u64,
}

/// Parses one feed line.
///
/// Paper replays restamp the quotes as observed now, since a recorded feed is
/// always older than the staleness window.
fn parse_feed_line(line: &str, restamp: bool) -> Result<Option<Opportunity>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut opp: Opportunity = serde_json::from_str(line)?;
    if restamp {
        opp.quoted_at = Utc::now();
    }
    Ok(Some(opp))
}

async fn feed_opportunities(
    path: &Path,
    venues: &PaperVenues,
    tx: mpsc::Sender<Opportunity>,
    pace: Duration,
) -> Result<u64> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening feed {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut sent = 0u64;
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let opp = match parse_feed_line(&line, true) {
            Ok(Some(opp)) => opp,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping unparseable feed line");
                continue;
            }
        };

        venues
            .quotes
            .set(sportsarb_core::Venue::Polymarket, &opp.venue_a_market, opp.venue_a_quote());
        venues
            .quotes
            .set(sportsarb_core::Venue::Kalshi, &opp.venue_b_market, opp.venue_b_quote());

        if tx.send(opp).await.is_err() {
            break;
        }
        sent += 1;
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }
    Ok(sent)
}

/// Runs the executor command.
///
/// # Errors
///
/// Returns an error if:
/// - Live venues are requested
/// - The ledger, mappings, or feed cannot be read
/// - Recovery cannot write to the ledger
pub async fn run_executor(config: AppConfig, args: RunArgs) -> Result<()> {
    let venues = PaperVenues::from_args(&args.venues, &config)?;
    let ledger = open_ledger(&config)?;
    let mapping = Arc::new(StaticMappingService::from_json_file(&args.mappings)?);
    let store = Arc::new(SessionStore::new());
    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));

    tracing::info!("========================================");
    tracing::info!("  HEDGED ARBITRAGE EXECUTOR             ");
    tracing::info!("========================================");
    tracing::info!("Mode:                  paper");
    tracing::info!("Ledger:                {}", ledger.path().display());
    tracing::info!("Min Spread:            {}c", config.engine.min_spread_cents);
    tracing::info!("Phantom Spread:        {}c", config.engine.phantom_spread_cents);
    tracing::info!("Max Contracts:         {}", config.sizing.max_contracts_per_trade);
    tracing::info!("Max Cost:              ${}", config.sizing.max_cost_per_trade);
    tracing::info!("========================================");

    if !ledger.executing().is_empty() {
        tracing::warn!(
            trades = ledger.executing().len(),
            "Paper venues start empty; orders from an earlier paper session read as never placed"
        );
    }
    let recovered = Recovery::new(venues.pair(), ledger.clone(), store.clone())
        .run()
        .await?;
    if !recovered.unresolved.is_empty() {
        tracing::warn!(
            unresolved = recovered.unresolved.len(),
            "Executions left unresolved; their games stay blocked"
        );
    }

    let resolver = Arc::new(Resolver::new(
        venues.pair(),
        venues.quotes.clone(),
        ledger.clone(),
        breaker.clone(),
        store.clone(),
        FeeCalculator::with_config(config.fees.clone()),
        config.resolver.clone(),
    ));
    let engine = Arc::new(
        ExecutionEngine::new(
            venues.pair(),
            mapping,
            ledger.clone(),
            store.clone(),
            breaker.clone(),
            &config,
        )
        .with_quote_source(venues.quotes.clone())
        .with_resolver(resolver.clone()),
    );
    let reconciler = Arc::new(Reconciler::new(
        venues.pair(),
        ledger.clone(),
        config.reconciler.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, rx) = mpsc::channel(64);

    let engine_handle = tokio::spawn(engine.clone().run(rx, shutdown_rx.clone()));
    let resolver_handle = tokio::spawn(resolver.clone().run(shutdown_rx.clone()));
    let reconciler_handle = tokio::spawn(reconciler.clone().run(shutdown_rx));

    let pace = Duration::from_millis(args.pace_ms);
    let interrupted = tokio::select! {
        fed = feed_opportunities(&args.feed, &venues, tx, pace) => {
            let sent = fed?;
            tracing::info!(opportunities = sent, "Feed exhausted, waiting for the engine to drain");
            false
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            true
        }
    };

    // An in-flight execution always finishes; only queued opportunities are dropped.
    if interrupted {
        let _ = shutdown_tx.send(true);
    }
    if let Err(e) = engine_handle.await {
        tracing::error!(error = %e, "Engine task failed");
    }
    let _ = shutdown_tx.send(true);
    for handle in [resolver_handle, reconciler_handle] {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task failed");
        }
    }

    let report = reconciler.run_once().await?;
    let positions = ledger.positions();

    tracing::info!("========================================");
    tracing::info!("         SESSION SUMMARY                ");
    tracing::info!("========================================");
    tracing::info!("Trades in Ledger:      {}", ledger.len());
    let tally = breaker.tally();
    tracing::info!("Hedged Executions:     {}", tally.hedged);
    tracing::info!("Unhedged Executions:   {} ({} contracts)", tally.unhedged, tally.unhedged_contracts);
    tracing::info!("Unconfirmed Legs:      {}", tally.unconfirmed);
    tracing::info!("Open Positions:        {}", positions.len());
    tracing::info!("Settled This Pass:     {}", report.settled.len());
    tracing::info!("Flagged Trades:        {}", report.flagged.len());
    tracing::info!("Session P&L:           ${}", breaker.session_pnl());
    tracing::info!("Breaker State:         {:?}", breaker.state());
    tracing::info!("========================================");

    Ok(())
}
