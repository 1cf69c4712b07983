//! Resolves interrupted executions without starting the engine.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use sportsarb_core::AppConfig;
use sportsarb_cross::{Recovery, SessionStore};

use super::{open_ledger, PaperVenues, VenueArgs};

/// Arguments for the recover command.
#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub venues: VenueArgs,
}

/// Runs startup recovery once and prints what it resolved.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or refuses a write.
pub async fn run_recover(config: AppConfig, args: RecoverArgs) -> Result<()> {
    let venues = PaperVenues::from_args(&args.venues, &config)?;
    let ledger = open_ledger(&config)?;

    let executing = ledger.executing().len();
    if executing == 0 {
        println!("No interrupted executions.");
        return Ok(());
    }
    tracing::warn!(
        trades = executing,
        "Paper venues start empty; orders from an earlier paper session read as never placed"
    );

    let report = Recovery::new(venues.pair(), ledger, Arc::new(SessionStore::new()))
        .run()
        .await?;

    for (trade_id, status) in &report.resolved {
        println!("  resolved    {trade_id} -> {status}");
    }
    for (trade_id, error) in &report.unresolved {
        println!("  unresolved  {trade_id}: {error}");
    }
    Ok(())
}
