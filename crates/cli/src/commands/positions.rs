//! Snapshot of open exposure from the ledger.

use anyhow::Result;
use clap::Args;

use sportsarb_core::AppConfig;
use sportsarb_cross::{Phase, TradeStatus};

use super::open_ledger;

/// Arguments for the positions command.
#[derive(Args, Debug, Clone, Default)]
pub struct PositionsArgs {
    /// Print positions as JSON
    #[arg(long)]
    pub json: bool,
}

/// Prints net exposure per game and team, plus executions still in flight.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened.
pub fn run_positions(config: &AppConfig, args: &PositionsArgs) -> Result<()> {
    let ledger = open_ledger(config)?;
    let positions = ledger.positions();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&positions)?);
        return Ok(());
    }

    if positions.is_empty() {
        println!("No open positions.");
    } else {
        println!(
            "{:<28} {:<8} {:>10} {:>10}  trades",
            "game", "team", "venue A", "venue B"
        );
        for position in &positions {
            println!(
                "{:<28} {:<8} {:>10} {:>10}  {}",
                position.game_id,
                position.team,
                position.venue_a_contracts,
                position.venue_b_contracts,
                position.trade_ids.join(",")
            );
        }
    }

    let snapshot = ledger.snapshot();
    let executing: Vec<_> = snapshot
        .iter()
        .filter(|t| t.phase() == Phase::Executing)
        .collect();
    if !executing.is_empty() {
        println!();
        println!("{} execution(s) awaiting recovery:", executing.len());
        for trade in executing {
            println!("  {} {} {} {}", trade.trade_id, trade.game_id, trade.team, trade.status);
        }
    }

    let unhedged = snapshot
        .iter()
        .filter(|t| t.phase() == Phase::Open)
        .filter(|t| matches!(t.status, TradeStatus::PartialHedge | TradeStatus::Unhedged))
        .count();
    if unhedged > 0 {
        tracing::warn!(trades = unhedged, "Open trades carry unhedged exposure");
    }
    Ok(())
}
