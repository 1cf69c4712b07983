//! CLI commands for the hedged arbitrage executor.

pub mod compact;
pub mod positions;
pub mod reconcile;
pub mod recover;
pub mod run;

pub use compact::run_compact;
pub use positions::{run_positions, PositionsArgs};
pub use reconcile::{run_reconcile, ReconcileArgs};
pub use recover::{run_recover, RecoverArgs};
pub use run::{run_executor, RunArgs};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;

use sportsarb_core::{AppConfig, SettlementRecord, Venue};
use sportsarb_cross::{PaperQuoteBook, PaperVenue, TradeLedger, VenuePair};

/// Venue selection shared by every command that talks to venues.
#[derive(Args, Debug, Clone, Default)]
pub struct VenueArgs {
    /// Use in-memory paper venues instead of live adapters
    #[arg(long)]
    pub paper: bool,

    /// JSON file of settlement results to preload into paper venues
    ///
    /// Shape: `{"venue_a": [SettlementRecord...], "venue_b": [SettlementRecord...]}`
    #[arg(long)]
    pub settlements: Option<PathBuf>,
}

/// Settlement results preloaded into paper venues.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PaperSettlements {
    venue_a: Vec<SettlementRecord>,
    venue_b: Vec<SettlementRecord>,
}

/// Paper venues plus the quote book the resolver reads.
pub struct PaperVenues {
    pub venue_a: Arc<PaperVenue>,
    pub venue_b: Arc<PaperVenue>,
    pub quotes: Arc<PaperQuoteBook>,
}

impl PaperVenues {
    /// Builds paper venues with the configured fee schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if live venues were requested or the settlements file is unreadable.
    pub fn from_args(args: &VenueArgs, config: &AppConfig) -> Result<Self> {
        if !args.paper {
            bail!("No live venue adapters are built into this binary. Pass --paper.");
        }

        let venues = Self {
            venue_a: Arc::new(PaperVenue::new(Venue::Polymarket).with_fees(config.fees.clone())),
            venue_b: Arc::new(PaperVenue::new(Venue::Kalshi).with_fees(config.fees.clone())),
            quotes: Arc::new(PaperQuoteBook::new()),
        };

        if let Some(path) = &args.settlements {
            let settlements = load_settlements(path)?;
            tracing::info!(
                path = %path.display(),
                venue_a = settlements.venue_a.len(),
                venue_b = settlements.venue_b.len(),
                "Loaded paper settlements"
            );
            venues.venue_a.load_settlements(settlements.venue_a);
            venues.venue_b.load_settlements(settlements.venue_b);
        }

        Ok(venues)
    }

    #[must_use]
    pub fn pair(&self) -> VenuePair {
        VenuePair::new(self.venue_a.clone(), self.venue_b.clone())
    }
}

fn load_settlements(path: &Path) -> Result<PaperSettlements> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading settlements from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing settlements in {}", path.display()))
}

/// Opens the configured trade ledger.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or replayed.
pub fn open_ledger(config: &AppConfig) -> Result<Arc<TradeLedger>> {
    let ledger = TradeLedger::open(config.ledger.path.clone())
        .with_context(|| format!("opening ledger {}", config.ledger.path.display()))?;
    Ok(Arc::new(ledger))
}
