//! One-shot settlement reconciliation.
//!
//! Settles whatever can be settled, then verifies every settled trade against
//! venue fills. Drift is only written back with `--apply`.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use sportsarb_core::AppConfig;
use sportsarb_cross::{ReconcileReport, Reconciler};

use super::{open_ledger, PaperVenues, VenueArgs};

/// Arguments for the reconcile command.
#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub venues: VenueArgs,

    /// Write venue-derived P&L over drifted ledger values
    #[arg(long)]
    pub apply: bool,

    /// Reason recorded with applied corrections
    #[arg(long, default_value = "operator reconcile")]
    pub reason: String,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

fn print_report(title: &str, report: &ReconcileReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("== {title} ==");
    println!("  settled:  {}", report.settled.len());
    println!("  pending:  {}", report.pending);
    for issue in &report.flagged {
        println!("  FLAGGED   {} {:?}: {}", issue.trade_id, issue.kind, issue.detail);
    }
    for drift in &report.drifts {
        println!(
            "  DRIFT     {} ledger ${} venue ${} (diff ${})",
            drift.trade_id, drift.ledger_pnl, drift.venue_pnl, drift.difference
        );
    }
    if report.is_clean() {
        println!("  clean");
    }
    Ok(())
}

/// Runs the reconcile command.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or refuses a write.
pub async fn run_reconcile(config: AppConfig, args: ReconcileArgs) -> Result<()> {
    let venues = PaperVenues::from_args(&args.venues, &config)?;
    let ledger = open_ledger(&config)?;
    let reconciler = Reconciler::new(venues.pair(), Arc::clone(&ledger), config.reconciler.clone());

    let settled = reconciler.run_once().await?;
    print_report("settlement", &settled, args.json)?;

    let verified = reconciler.verify().await;
    print_report("verification", &verified, args.json)?;

    if verified.drifts.is_empty() {
        return Ok(());
    }
    if args.apply {
        let applied = reconciler.apply_corrections(&verified.drifts, &args.reason)?;
        tracing::info!(corrections = applied, reason = %args.reason, "Applied P&L corrections");
    } else {
        tracing::warn!(
            drifts = verified.drifts.len(),
            "Drift found; rerun with --apply to correct the ledger"
        );
    }
    Ok(())
}
