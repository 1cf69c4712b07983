//! The durable trade record and its invariants.
//!
//! A [`Trade`] is created `PENDING` when the engine acts on an opportunity and
//! is then mutated by exactly one writer per lifecycle phase:
//!
//! ```text
//! Executing (PENDING, PM_FILLED)      -> Engine / startup recovery
//! Open      (SUCCESS, PARTIAL_HEDGE,
//!            UNHEDGED, EXITED)        -> Resolver (unwinds), Reconciler (settlement)
//! Settled   (settlement_pnl set)      -> Reconciler corrections only
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use sportsarb_core::{
    Direction, Instrument, Opportunity, Outcome, Venue, CONTRACT_PAYOUT_CENTS,
};

use crate::types::HedgePlan;

/// Settlement source written for trades that never took on exposure.
pub const NO_EXPOSURE_SOURCE: &str = "NO_EXPOSURE";

// =============================================================================
// Status and Tier
// =============================================================================

/// Execution status. Serialized names are a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// Attempt recorded, venue A not yet confirmed.
    Pending,
    /// Aborted before any order was placed.
    Skipped,
    /// Venue A did not fill.
    #[serde(rename = "PM_NO_FILL")]
    NoFill,
    /// Venue A filled, venue B not yet confirmed.
    #[serde(rename = "PM_FILLED")]
    PmFilled,
    /// Both legs filled equally.
    Success,
    /// Venue B filled fewer contracts than venue A.
    PartialHedge,
    /// Venue B did not fill.
    Unhedged,
    /// Position closed before settlement.
    Exited,
}

impl TradeStatus {
    /// Returns true while the engine still owns the trade.
    #[must_use]
    pub fn is_executing(self) -> bool {
        matches!(self, Self::Pending | Self::PmFilled)
    }

    /// Returns true for outcomes that never took on exposure.
    #[must_use]
    pub fn is_abort_clean(self) -> bool {
        matches!(self, Self::Skipped | Self::NoFill)
    }

    /// Returns the serialized name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Skipped => "SKIPPED",
            Self::NoFill => "PM_NO_FILL",
            Self::PmFilled => "PM_FILLED",
            Self::Success => "SUCCESS",
            Self::PartialHedge => "PARTIAL_HEDGE",
            Self::Unhedged => "UNHEDGED",
            Self::Exited => "EXITED",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hedge quality / resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Fully hedged on the team's own market.
    #[serde(rename = "TIER1_HEDGE", alias = "HEDGED")]
    Tier1Hedge,
    /// Hedged position exited before settlement.
    #[serde(rename = "TIER2_EXIT")]
    Tier2Exit,
    /// Directional exposure unwound.
    #[serde(rename = "TIER3_UNWIND")]
    Tier3Unwind,
    /// Directional exposure held to settlement.
    #[serde(rename = "TIER3A_HOLD")]
    Tier3aHold,
    /// Hedged via the opponent's market.
    OppositeHedge,
}

impl Tier {
    /// Returns the serialized name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tier1Hedge => "TIER1_HEDGE",
            Self::Tier2Exit => "TIER2_EXIT",
            Self::Tier3Unwind => "TIER3_UNWIND",
            Self::Tier3aHold => "TIER3A_HOLD",
            Self::OppositeHedge => "OPPOSITE_HEDGE",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement formula implied by a status/tier pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaClass {
    /// `spread * q / 100 - fees`.
    LockedSpread,
    /// `(100 - combined_cost) * q / 100 - fees`, hedge on the opponent's market.
    OppositeHedge,
    /// Binary outcome of the held leg.
    Directional,
    /// Hedged part plus directional residual.
    PartialHedge,
    /// Realized exit P&L plus anything still held.
    Exit,
    /// Nothing was ever held.
    NoExposure,
}

/// Returns the settlement formula for a status/tier pair, or `None` if the pair is invalid.
#[must_use]
pub fn formula_for(status: TradeStatus, tier: Option<Tier>) -> Option<FormulaClass> {
    use TradeStatus as S;
    match (status, tier) {
        (S::Success, Some(Tier::Tier1Hedge)) => Some(FormulaClass::LockedSpread),
        (S::Success, Some(Tier::OppositeHedge)) => Some(FormulaClass::OppositeHedge),
        (S::Unhedged, Some(Tier::Tier3aHold)) => Some(FormulaClass::Directional),
        (S::PartialHedge, Some(Tier::Tier3aHold | Tier::Tier3Unwind)) => {
            Some(FormulaClass::PartialHedge)
        }
        (S::Exited, Some(Tier::Tier2Exit | Tier::Tier3Unwind)) => Some(FormulaClass::Exit),
        (S::NoFill | S::Skipped, None) => Some(FormulaClass::NoExposure),
        _ => None,
    }
}

/// Lifecycle phase, which decides who may write the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Owned by the engine (and startup recovery).
    Executing,
    /// Owned by the resolver (unwind fields) and reconciler (settlement fields).
    Open,
    /// Final P&L assigned; only audited corrections allowed.
    Settled,
}

/// Why an attempt was aborted before any order was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    CircuitBreaker,
    StaleQuote,
    PhantomSpread,
    Unfavorable,
    Duplicate,
    Blacklisted,
    MappingMismatch,
    MappingUnavailable,
    ZeroSize,
    HardLimit,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CircuitBreaker => "circuit breaker",
            Self::StaleQuote => "stale quote",
            Self::PhantomSpread => "phantom spread",
            Self::Unfavorable => "unfavorable spread",
            Self::Duplicate => "duplicate position",
            Self::Blacklisted => "game blacklisted",
            Self::MappingMismatch => "mapping mismatch",
            Self::MappingUnavailable => "mapping unavailable",
            Self::ZeroSize => "zero size",
            Self::HardLimit => "hard limit",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Supporting Records
// =============================================================================

/// Fees paid on entry, in dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFees {
    pub venue_a: Decimal,
    pub venue_b: Decimal,
}

impl LegFees {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.venue_a + self.venue_b
    }
}

/// Per-leg record of contracts closed before settlement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnwindRecord {
    /// Venue A contracts closed.
    pub venue_a_contracts: u32,
    /// Volume-weighted venue A exit price in cents.
    pub venue_a_exit_price: Option<Decimal>,
    /// Venue B contracts closed.
    pub venue_b_contracts: u32,
    /// Volume-weighted venue B exit price in cents.
    pub venue_b_exit_price: Option<Decimal>,
    /// Exit fees paid, in dollars.
    pub exit_fees: Decimal,
    /// Venue order ids of the closing orders.
    #[serde(default)]
    pub ticket_refs: Vec<String>,
    /// Time of the most recent close.
    pub unwound_at: Option<DateTime<Utc>>,
}

impl UnwindRecord {
    /// Folds a closing fill into the record, keeping exit prices volume-weighted.
    pub fn add_exit(&mut self, leg: LegId, contracts: u32, price_cents: Decimal, fee: Decimal) {
        if contracts == 0 {
            return;
        }
        let (count, price) = match leg {
            LegId::A => (&mut self.venue_a_contracts, &mut self.venue_a_exit_price),
            LegId::B => (&mut self.venue_b_contracts, &mut self.venue_b_exit_price),
        };
        let previous = Decimal::from(*count) * price.unwrap_or(Decimal::ZERO);
        *count += contracts;
        *price = Some((previous + Decimal::from(contracts) * price_cents) / Decimal::from(*count));
        self.exit_fees += fee;
        self.unwound_at = Some(Utc::now());
    }

    /// Returns contracts closed on a leg.
    #[must_use]
    pub fn contracts(&self, leg: LegId) -> u32 {
        match leg {
            LegId::A => self.venue_a_contracts,
            LegId::B => self.venue_b_contracts,
        }
    }
}

/// Audited change to an assigned settlement P&L.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub at: DateTime<Utc>,
    pub previous: Decimal,
    pub corrected: Decimal,
    pub reason: String,
}

/// Leg identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegId {
    A,
    B,
}

impl LegId {
    /// Venue the leg trades on.
    #[must_use]
    pub fn venue(self) -> Venue {
        match self {
            Self::A => Venue::Polymarket,
            Self::B => Venue::Kalshi,
        }
    }
}

// =============================================================================
// Trade
// =============================================================================

/// Durable record of one arbitrage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    pub sport: String,
    pub game_id: String,
    pub team: String,
    pub opponent: String,
    pub direction: Direction,
    /// True if leg A holds the team's NO token. Written explicitly, never inferred.
    pub venue_a_is_short: bool,
    /// True if leg B trades the opponent's market.
    #[serde(default)]
    pub venue_b_opposite_market: bool,
    pub venue_a_market: String,
    pub venue_b_market: String,
    /// Token bought on venue A.
    pub venue_a_outcome: Outcome,
    /// Token bought on venue B.
    pub venue_b_outcome: Outcome,

    pub contracts_intended: u32,
    /// Contracts filled on venue A.
    pub contracts_filled: u32,
    pub venue_b_contracts_filled: u32,
    pub venue_a_fill_price: Option<Decimal>,
    pub venue_b_fill_price: Option<Decimal>,
    pub venue_a_ticket_ref: Option<String>,
    pub venue_b_ticket_ref: Option<String>,

    pub status: TradeStatus,
    pub tier: Option<Tier>,
    /// Locked spread at the planned prices, in cents.
    pub spread_cents: Decimal,
    pub combined_cost_cents: Decimal,
    #[serde(default)]
    pub fees: LegFees,

    #[serde(default)]
    pub unwind: Option<UnwindRecord>,
    /// Signed realized P&L of closed contracts in cents, excluding entry fees.
    #[serde(default)]
    pub unwind_pnl_cents: Option<Decimal>,
    /// Unsigned loss written by older ledgers. Never written, only read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unwind_loss_cents: Option<Decimal>,

    /// Final P&L in dollars.
    #[serde(default)]
    pub settlement_pnl: Option<Decimal>,
    /// Provenance of `settlement_pnl`, strategy names joined with `+`.
    #[serde(default)]
    pub settlement_source: Option<String>,
    #[serde(default)]
    pub settlement_result: Option<String>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// Creates a `PENDING` attempt from an opportunity and its leg plan.
    #[must_use]
    pub fn pending(opp: &Opportunity, plan: &HedgePlan) -> Self {
        let now = Utc::now();
        Self {
            trade_id: Uuid::new_v4().to_string(),
            timestamp: now,
            sport: opp.sport.clone(),
            game_id: opp.game_id.clone(),
            team: opp.team.clone(),
            opponent: opp.opponent.clone(),
            direction: opp.direction,
            venue_a_is_short: opp.direction.venue_a_is_short(),
            venue_b_opposite_market: opp.venue_b_is_opponent,
            venue_a_market: plan.leg_a.instrument.market.clone(),
            venue_b_market: plan.leg_b.instrument.market.clone(),
            venue_a_outcome: plan.leg_a.instrument.outcome,
            venue_b_outcome: plan.leg_b.instrument.outcome,
            contracts_intended: opp.max_size,
            contracts_filled: 0,
            venue_b_contracts_filled: 0,
            venue_a_fill_price: None,
            venue_b_fill_price: None,
            venue_a_ticket_ref: None,
            venue_b_ticket_ref: None,
            status: TradeStatus::Pending,
            tier: None,
            spread_cents: plan.spread_cents(),
            combined_cost_cents: plan.combined_cost_cents(),
            fees: LegFees::default(),
            unwind: None,
            unwind_pnl_cents: None,
            unwind_loss_cents: None,
            settlement_pnl: None,
            settlement_source: None,
            settlement_result: None,
            settled_at: None,
            skip_reason: None,
            last_error: None,
            corrections: Vec::new(),
            updated_at: now,
        }
    }

    /// Returns the lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.settlement_pnl.is_some() {
            Phase::Settled
        } else if self.status.is_executing() {
            Phase::Executing
        } else {
            Phase::Open
        }
    }

    /// Idempotent client order id for the entry order on a leg.
    #[must_use]
    pub fn client_order_id(&self, leg: LegId) -> String {
        match leg {
            LegId::A => format!("{}-A", self.trade_id),
            LegId::B => format!("{}-B", self.trade_id),
        }
    }

    /// Instrument held on a leg.
    #[must_use]
    pub fn instrument(&self, leg: LegId) -> Instrument {
        match leg {
            LegId::A => Instrument::new(self.venue_a_market.clone(), self.venue_a_outcome),
            LegId::B => Instrument::new(self.venue_b_market.clone(), self.venue_b_outcome),
        }
    }

    /// Entry fill price on a leg.
    #[must_use]
    pub fn fill_price(&self, leg: LegId) -> Option<Decimal> {
        match leg {
            LegId::A => self.venue_a_fill_price,
            LegId::B => self.venue_b_fill_price,
        }
    }

    /// Contracts filled on a leg.
    #[must_use]
    pub fn filled(&self, leg: LegId) -> u32 {
        match leg {
            LegId::A => self.contracts_filled,
            LegId::B => self.venue_b_contracts_filled,
        }
    }

    /// Contracts closed on a leg.
    #[must_use]
    pub fn unwound(&self, leg: LegId) -> u32 {
        self.unwind.as_ref().map_or(0, |u| u.contracts(leg))
    }

    /// Contracts still held on a leg.
    #[must_use]
    pub fn held(&self, leg: LegId) -> u32 {
        self.filled(leg).saturating_sub(self.unwound(leg))
    }

    /// Contracts held on both legs.
    #[must_use]
    pub fn hedged_held(&self) -> u32 {
        self.held(LegId::A).min(self.held(LegId::B))
    }

    /// The leg carrying unhedged contracts and how many, if any.
    #[must_use]
    pub fn residual(&self) -> Option<(LegId, u32)> {
        let a = self.held(LegId::A);
        let b = self.held(LegId::B);
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => Some((LegId::A, a - b)),
            std::cmp::Ordering::Less => Some((LegId::B, b - a)),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// True if the token held on `leg` pays out when the team wins.
    #[must_use]
    pub fn leg_backs_team(&self, leg: LegId) -> bool {
        match leg {
            LegId::A => self.venue_a_outcome == Outcome::Yes,
            LegId::B => (self.venue_b_outcome == Outcome::Yes) != self.venue_b_opposite_market,
        }
    }

    /// Entry fees attributable to `contracts` of a leg, in cents.
    #[must_use]
    pub fn entry_fee_cents(&self, leg: LegId, contracts: u32) -> Decimal {
        let filled = self.filled(leg);
        if filled == 0 || contracts == 0 {
            return Decimal::ZERO;
        }
        let fee = match leg {
            LegId::A => self.fees.venue_a,
            LegId::B => self.fees.venue_b,
        };
        fee * CONTRACT_PAYOUT_CENTS * Decimal::from(contracts) / Decimal::from(filled)
    }

    /// Marks the trade as aborted before any order was placed.
    pub fn mark_skipped(&mut self, reason: SkipReason, detail: impl Into<String>) {
        self.status = TradeStatus::Skipped;
        self.tier = None;
        self.skip_reason = Some(reason);
        self.last_error = Some(detail.into());
        self.assign_no_exposure();
    }

    /// Marks venue A as not filled.
    pub fn mark_no_fill(&mut self) {
        self.status = TradeStatus::NoFill;
        self.tier = None;
        self.assign_no_exposure();
    }

    fn assign_no_exposure(&mut self) {
        self.settlement_pnl = Some(Decimal::ZERO);
        self.settlement_source = Some(NO_EXPOSURE_SOURCE.to_string());
        self.settled_at = Some(Utc::now());
    }

    /// Classifies the trade from confirmed leg fills and sets status and tier.
    pub fn classify_fills(&mut self) {
        let a = self.contracts_filled;
        let b = self.venue_b_contracts_filled;
        if a == 0 {
            self.mark_no_fill();
        } else if b >= a {
            self.status = TradeStatus::Success;
            self.tier = Some(if self.venue_b_opposite_market {
                Tier::OppositeHedge
            } else {
                Tier::Tier1Hedge
            });
        } else if b > 0 {
            self.status = TradeStatus::PartialHedge;
            self.tier = Some(Tier::Tier3aHold);
        } else {
            self.status = TradeStatus::Unhedged;
            self.tier = Some(Tier::Tier3aHold);
        }
    }

    /// Checks every record-level invariant.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.contracts_filled > self.contracts_intended {
            return Err(InvariantViolation::OverFilled {
                filled: self.contracts_filled,
                intended: self.contracts_intended,
            });
        }
        if self.venue_b_contracts_filled > self.contracts_filled {
            return Err(InvariantViolation::HedgeExceedsEntry {
                venue_b: self.venue_b_contracts_filled,
                venue_a: self.contracts_filled,
            });
        }
        if self.venue_b_ticket_ref.is_some()
            && (self.contracts_filled == 0 || self.status == TradeStatus::Pending)
        {
            return Err(InvariantViolation::HedgeWithoutEntry);
        }
        if self.venue_a_is_short != self.direction.venue_a_is_short() {
            return Err(InvariantViolation::ShortFlagMismatch);
        }
        if self.status == TradeStatus::Exited && self.unwind.is_none() {
            return Err(InvariantViolation::ExitWithoutUnwind);
        }
        if let Some(unwind) = &self.unwind {
            if unwind.venue_a_contracts > self.contracts_filled
                || unwind.venue_b_contracts > self.venue_b_contracts_filled
            {
                return Err(InvariantViolation::OverUnwound);
            }
        }
        let executing = self.status.is_executing();
        if !executing && formula_for(self.status, self.tier).is_none() {
            return Err(InvariantViolation::InvalidTier {
                status: self.status,
                tier: self.tier,
            });
        }
        if executing && self.tier.is_some() {
            return Err(InvariantViolation::InvalidTier {
                status: self.status,
                tier: self.tier,
            });
        }
        if executing && self.settlement_pnl.is_some() {
            return Err(InvariantViolation::SettledWhileExecuting);
        }
        if self.status.is_abort_clean() && self.settlement_pnl.is_none() {
            return Err(InvariantViolation::AbortWithoutSettlement);
        }
        Ok(())
    }
}

/// A trade record that breaks an invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("contracts_filled {filled} exceeds contracts_intended {intended}")]
    OverFilled { filled: u32, intended: u32 },

    #[error("venue B filled {venue_b} contracts but venue A only {venue_a}")]
    HedgeExceedsEntry { venue_b: u32, venue_a: u32 },

    #[error("venue B ticket recorded without a venue A fill")]
    HedgeWithoutEntry,

    #[error("venue_a_is_short disagrees with direction")]
    ShortFlagMismatch,

    #[error("EXITED trade has no unwind data")]
    ExitWithoutUnwind,

    #[error("more contracts unwound than filled")]
    OverUnwound,

    #[error("invalid status/tier pair {status}/{tier:?}")]
    InvalidTier {
        status: TradeStatus,
        tier: Option<Tier>,
    },

    #[error("settlement assigned while still executing")]
    SettledWhileExecuting,

    #[error("aborted trade has no settlement")]
    AbortWithoutSettlement,
}
