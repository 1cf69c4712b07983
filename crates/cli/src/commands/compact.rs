//! Ledger compaction.

use anyhow::Result;

use sportsarb_core::AppConfig;

use super::open_ledger;

/// Rewrites the ledger with only the latest version of each trade.
///
/// # Errors
///
/// Returns an error if the ledger cannot be opened or rewritten.
pub fn run_compact(config: &AppConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    let before = std::fs::metadata(ledger.path())?.len();
    let trades = ledger.compact()?;
    let after = std::fs::metadata(ledger.path())?.len();

    tracing::info!(
        trades = trades,
        bytes_before = before,
        bytes_after = after,
        "Ledger compacted"
    );
    Ok(())
}
