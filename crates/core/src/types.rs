//! Shared domain types for dual-venue sports arbitrage.
//!
//! Prices are expressed in cents (0-100) as [`Decimal`], contract counts as
//! `u32`, and cash amounts (fees, balances) in dollars. Every quote is
//! expressed in terms of the YES token of the market it belongs to.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Payout of a winning contract, in cents.
pub const CONTRACT_PAYOUT_CENTS: Decimal = dec!(100);

// =============================================================================
// Venue Identifiers
// =============================================================================

/// Identifies which venue an order, quote, or position belongs to.
///
/// Venue A (Polymarket) is the unreliable fill-or-kill leg and is always placed
/// first. Venue B (Kalshi) is the reliable hedge leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Polymarket CLOB (venue A).
    Polymarket,
    /// Kalshi exchange (venue B).
    Kalshi,
}

impl Venue {
    /// Returns the display name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Polymarket => "polymarket",
            Self::Kalshi => "kalshi",
        }
    }

    /// Returns the short leg label used in client order ids ("A" or "B").
    #[must_use]
    pub fn leg_label(self) -> &'static str {
        match self {
            Self::Polymarket => "A",
            Self::Kalshi => "B",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Direction and Outcome
// =============================================================================

/// Which venue the team is bought on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Buy the team on Polymarket, sell it (buy the other side) on Kalshi.
    #[serde(rename = "BUY_PM_SELL_K")]
    BuyPmSellK,
    /// Buy the team on Kalshi, sell it (buy the other side) on Polymarket.
    #[serde(rename = "BUY_K_SELL_PM")]
    BuyKSellPm,
}

impl Direction {
    /// Returns true if the venue A leg is short the team (holds its NO token).
    #[must_use]
    pub fn venue_a_is_short(self) -> bool {
        matches!(self, Self::BuyKSellPm)
    }

    /// Returns the serialized name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuyPmSellK => "BUY_PM_SELL_K",
            Self::BuyKSellPm => "BUY_K_SELL_PM",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Pays out if the market resolves YES.
    Yes,
    /// Pays out if the market resolves NO.
    No,
}

impl Outcome {
    /// Returns the opposite token.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A specific token on a specific market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Venue market identifier (ticker or condition id).
    pub market: String,
    /// Token held.
    pub outcome: Outcome,
}

impl Instrument {
    /// Creates a new instrument.
    #[must_use]
    pub fn new(market: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            market: market.into(),
            outcome,
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.market, self.outcome)
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// A single level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price in cents.
    pub price_cents: Decimal,
    /// Contracts available at this price.
    pub contracts: u32,
}

impl PriceLevel {
    /// Creates a new price level.
    #[must_use]
    pub fn new(price_cents: Decimal, contracts: u32) -> Self {
        Self {
            price_cents,
            contracts,
        }
    }
}

/// Top-of-book quote for a market's YES token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Best bid in cents, if any.
    pub bid_cents: Option<Decimal>,
    /// Best ask in cents, if any.
    pub ask_cents: Option<Decimal>,
    /// When the quote was observed.
    pub as_of: DateTime<Utc>,
}

impl Quote {
    /// Creates a two-sided quote observed now.
    #[must_use]
    pub fn new(bid_cents: Decimal, ask_cents: Decimal) -> Self {
        Self {
            bid_cents: Some(bid_cents),
            ask_cents: Some(ask_cents),
            as_of: Utc::now(),
        }
    }

    /// Sets the observation time.
    #[must_use]
    pub fn at(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = as_of;
        self
    }

    /// Returns the age of the quote relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.as_of
    }

    /// Returns the price paid to buy `outcome` (YES at the ask, NO at 100 - bid).
    #[must_use]
    pub fn entry_price(&self, outcome: Outcome) -> Option<Decimal> {
        match outcome {
            Outcome::Yes => self.ask_cents,
            Outcome::No => self.bid_cents.map(|bid| CONTRACT_PAYOUT_CENTS - bid),
        }
    }

    /// Returns the value received to exit `outcome` (YES at the bid, NO at 100 - ask).
    #[must_use]
    pub fn exit_price(&self, outcome: Outcome) -> Option<Decimal> {
        match outcome {
            Outcome::Yes => self.bid_cents,
            Outcome::No => self.ask_cents.map(|ask| CONTRACT_PAYOUT_CENTS - ask),
        }
    }
}

// =============================================================================
// Opportunities and Mappings
// =============================================================================

/// A detected cross-venue price discrepancy for one team in one game.
///
/// Venue prices are in terms of each venue market's YES token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Sport key (e.g. "nba").
    pub sport: String,
    /// Game identifier shared across venues.
    pub game_id: String,
    /// Team the trade is about.
    pub team: String,
    /// Opposing team.
    pub opponent: String,
    /// Which venue buys the team.
    pub direction: Direction,
    /// Venue A best bid in cents.
    pub venue_a_bid: Decimal,
    /// Venue A best ask in cents.
    pub venue_a_ask: Decimal,
    /// Venue B best bid in cents.
    pub venue_b_bid: Decimal,
    /// Venue B best ask in cents.
    pub venue_b_ask: Decimal,
    /// Maximum contracts requested by the detector.
    pub max_size: u32,
    /// Venue A market for the team.
    pub venue_a_market: String,
    /// Venue B market the quotes refer to.
    pub venue_b_market: String,
    /// True if the venue B market is the opponent's market.
    #[serde(default)]
    pub venue_b_is_opponent: bool,
    /// When the quotes were observed.
    pub quoted_at: DateTime<Utc>,
    /// Book depth on the side venue A will take, priced as the cost of the token bought.
    #[serde(default)]
    pub venue_a_depth: Option<Vec<PriceLevel>>,
    /// Book depth on the side venue B will take, priced as the cost of the token bought.
    #[serde(default)]
    pub venue_b_depth: Option<Vec<PriceLevel>>,
}

impl Opportunity {
    /// Returns the venue A quote carried by the opportunity.
    #[must_use]
    pub fn venue_a_quote(&self) -> Quote {
        Quote::new(self.venue_a_bid, self.venue_a_ask).at(self.quoted_at)
    }

    /// Returns the venue B quote carried by the opportunity.
    #[must_use]
    pub fn venue_b_quote(&self) -> Quote {
        Quote::new(self.venue_b_bid, self.venue_b_ask).at(self.quoted_at)
    }
}

/// Authoritative game/team to market mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMapping {
    /// Sport key.
    pub sport: String,
    /// Game identifier.
    pub game_id: String,
    /// Team.
    pub team: String,
    /// Venue A market for the team.
    pub venue_a_market: String,
    /// Venue B market to hedge on.
    pub venue_b_market: String,
    /// True if the venue B market is the opponent's market.
    #[serde(default)]
    pub venue_b_is_opponent: bool,
}

// =============================================================================
// Orders and Fills
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy the instrument's token.
    Buy,
    /// Sell the instrument's token.
    Sell,
}

/// Time in force for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Fill completely or cancel.
    Fok,
    /// Fill what is available, cancel the rest.
    Ioc,
    /// Rest until cancelled.
    Gtc,
}

/// Request to place an order on a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotent client identifier, used to find the order after a timeout.
    pub client_order_id: String,
    /// Instrument traded.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: OrderSide,
    /// Limit price in cents.
    pub price_cents: Decimal,
    /// Contracts requested.
    pub contracts: u32,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// Creates a fill-or-kill buy.
    #[must_use]
    pub fn buy_fok(
        client_order_id: impl Into<String>,
        instrument: Instrument,
        price_cents: Decimal,
        contracts: u32,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            instrument,
            side: OrderSide::Buy,
            price_cents,
            contracts,
            time_in_force: TimeInForce::Fok,
        }
    }

    /// Creates an immediate-or-cancel buy.
    #[must_use]
    pub fn buy_ioc(
        client_order_id: impl Into<String>,
        instrument: Instrument,
        price_cents: Decimal,
        contracts: u32,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            instrument,
            side: OrderSide::Buy,
            price_cents,
            contracts,
            time_in_force: TimeInForce::Ioc,
        }
    }

    /// Creates an immediate-or-cancel sell.
    #[must_use]
    pub fn sell_ioc(
        client_order_id: impl Into<String>,
        instrument: Instrument,
        price_cents: Decimal,
        contracts: u32,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            instrument,
            side: OrderSide::Sell,
            price_cents,
            contracts,
            time_in_force: TimeInForce::Ioc,
        }
    }

    /// Returns the notional value in dollars.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price_cents * Decimal::from(self.contracts) / CONTRACT_PAYOUT_CENTS
    }
}

/// Lifecycle state of an order on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// Accepted, not yet matched.
    Pending,
    /// Resting on the book.
    Open,
    /// Completely filled.
    Filled,
    /// Cancelled, possibly after partial fills.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
}

impl OrderState {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// Venue view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    /// Venue order id.
    pub order_id: String,
    /// Client order id supplied at placement.
    pub client_order_id: String,
    /// Instrument traded.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: OrderSide,
    /// Current state.
    pub state: OrderState,
    /// Contracts requested.
    pub requested: u32,
    /// Contracts filled so far.
    pub filled: u32,
    /// Volume-weighted fill price in cents.
    pub avg_fill_price_cents: Option<Decimal>,
    /// Fees charged so far, in dollars.
    pub fees: Decimal,
}

impl OrderStatus {
    /// Returns true if any contracts filled.
    #[must_use]
    pub fn has_fills(&self) -> bool {
        self.filled > 0
    }
}

/// An execution reported by a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Venue fill id.
    pub fill_id: String,
    /// Venue order id.
    pub order_id: String,
    /// Instrument traded.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: OrderSide,
    /// Contracts filled.
    pub contracts: u32,
    /// Fill price in cents.
    pub price_cents: Decimal,
    /// Fee charged, in dollars.
    pub fee: Decimal,
    /// Execution time.
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// Returns the signed cash flow in dollars (sells positive, buys negative, net of fee).
    #[must_use]
    pub fn cash_flow(&self) -> Decimal {
        let notional = self.price_cents * Decimal::from(self.contracts) / CONTRACT_PAYOUT_CENTS;
        match self.side {
            OrderSide::Buy => -notional - self.fee,
            OrderSide::Sell => notional - self.fee,
        }
    }
}
