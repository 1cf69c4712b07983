//! Market settlement records reported by venues.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Outcome;

/// How a market resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketResult {
    /// YES token pays out.
    Yes,
    /// NO token pays out.
    No,
    /// Not yet resolved.
    Open,
}

impl MarketResult {
    /// Returns the winning token, if resolved.
    #[must_use]
    pub fn winning_outcome(self) -> Option<Outcome> {
        match self {
            Self::Yes => Some(Outcome::Yes),
            Self::No => Some(Outcome::No),
            Self::Open => None,
        }
    }

    /// Returns the result of the complementary market (the opponent's YES is this market's NO).
    #[must_use]
    pub fn inverted(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
            Self::Open => Self::Open,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Open => "open",
        }
    }
}

impl std::fmt::Display for MarketResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement report for one market on one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Venue market identifier.
    pub market: String,
    /// Resolution.
    pub result: MarketResult,
    /// Revenue credited for held contracts, in dollars.
    #[serde(default)]
    pub revenue: Decimal,
    /// Settlement fees, in dollars.
    #[serde(default)]
    pub fees: Decimal,
    /// When the venue settled the market.
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    /// Creates a settlement record with no revenue or fees.
    #[must_use]
    pub fn new(market: impl Into<String>, result: MarketResult) -> Self {
        Self {
            market: market.into(),
            result,
            revenue: Decimal::ZERO,
            fees: Decimal::ZERO,
            settled_at: Some(Utc::now()),
        }
    }
}

/// Outcome of asking a venue whether a market has settled.
///
/// Callers must treat [`SettlementLookup::LookupFailed`] as "unknown", never as
/// "not settled" or "no position".
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementLookup {
    /// The market has resolved.
    Settled(SettlementRecord),
    /// The venue answered and the market is still open.
    NotYetSettled,
    /// The venue could not be asked.
    LookupFailed(String),
}

impl SettlementLookup {
    /// Returns the resolved result, if settled.
    #[must_use]
    pub fn result(&self) -> Option<MarketResult> {
        match self {
            Self::Settled(record) if record.result != MarketResult::Open => Some(record.result),
            _ => None,
        }
    }
}
