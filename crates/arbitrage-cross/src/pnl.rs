//! Settlement P&L computation.
//!
//! Every trade settles through one composite formula:
//!
//! ```text
//! settlement_pnl = (realized_unwind + held_hedged + held_residual) / 100 - entry_fees
//! ```
//!
//! - `realized_unwind`: signed cents from contracts closed before settlement,
//!   resolved through an ordered cascade of [`PnlStrategy`].
//! - `held_hedged`: `(100 - fill_A - fill_B) * q` for contracts still held on
//!   both legs (locked spread, or opposite-market hedge).
//! - `held_residual`: binary outcome of the unhedged leg, `(100 - fill) * r`
//!   if it pays and `-fill * r` if it does not.
//!
//! The status/tier pair only selects which components can be non-zero;
//! [`formula_for`] rejects pairs outside the table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use sportsarb_core::{Fill, CONTRACT_PAYOUT_CENTS};

use crate::trade::{formula_for, FormulaClass, LegId, Tier, Trade, TradeStatus, NO_EXPOSURE_SOURCE};

// =============================================================================
// Strategies
// =============================================================================

/// A way of valuing contracts closed before settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PnlStrategy {
    /// Signed unwind P&L recorded by the resolver.
    SignedUnwind,
    /// Recomputed from per-leg exit and entry prices.
    RecomputedFromFills,
    /// Unsigned loss from older ledgers. Never used as a value; flags the trade.
    LegacyUnsignedLoss,
}

impl PnlStrategy {
    /// Default evaluation order.
    #[must_use]
    pub fn default_cascade() -> Vec<Self> {
        vec![
            Self::SignedUnwind,
            Self::RecomputedFromFills,
            Self::LegacyUnsignedLoss,
        ]
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignedUnwind => "SIGNED_UNWIND",
            Self::RecomputedFromFills => "RECOMPUTED_FROM_FILLS",
            Self::LegacyUnsignedLoss => "LEGACY_UNSIGNED_LOSS",
        }
    }
}

impl std::fmt::Display for PnlStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Component name for contracts held on both legs.
pub const LOCKED_SPREAD_SOURCE: &str = "LOCKED_SPREAD";
/// Component name for contracts held on both legs across the opponent's market.
pub const OPPOSITE_HEDGE_SOURCE: &str = "OPPOSITE_HEDGE";
/// Component name for a held directional leg.
pub const BINARY_OUTCOME_SOURCE: &str = "BINARY_OUTCOME";
/// Component name for a leg priced from venue fills because the ledger lacks its fill price.
pub const EXCHANGE_REPORTED_SOURCE: &str = "EXCHANGE_REPORTED";

// =============================================================================
// Results
// =============================================================================

/// Why a trade cannot be settled.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PnlIssue {
    #[error("no settlement formula for {status}/{tier:?}")]
    InvalidTier {
        status: TradeStatus,
        tier: Option<Tier>,
    },

    #[error("unwind data incomplete: only legacy unsigned loss {loss_cents}c recorded")]
    IncompleteUnwind { loss_cents: Decimal },

    #[error("unwind recorded but no strategy could value it")]
    MissingUnwindData,

    #[error("no fill price for held venue {0:?} leg")]
    MissingFillPrice(LegId),

    #[error("held contracts await a market result")]
    AwaitingResult,
}

impl PnlIssue {
    /// Returns true if the trade should settle on a later pass without intervention.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::AwaitingResult)
    }
}

/// Computed settlement for one trade.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCalc {
    /// Final P&L in dollars.
    pub pnl: Decimal,
    /// Strategy and component names joined with `+`.
    pub source: String,
    pub formula: FormulaClass,
    pub realized_cents: Decimal,
    pub held_cents: Decimal,
}

/// Average entry prices reported by the venues, used when the ledger lacks a fill price.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportedPrices {
    pub venue_a: Option<Decimal>,
    pub venue_b: Option<Decimal>,
}

impl ReportedPrices {
    /// Volume-weighted entry prices of fills matching the trade's entry tickets.
    #[must_use]
    pub fn from_fills(trade: &Trade, fills: &[Fill]) -> Self {
        let average = |ticket: &Option<String>| {
            let ticket = ticket.as_deref()?;
            let (contracts, notional) = fills
                .iter()
                .filter(|f| f.order_id == ticket)
                .fold((0u32, Decimal::ZERO), |(c, n), f| {
                    (c + f.contracts, n + f.price_cents * Decimal::from(f.contracts))
                });
            (contracts > 0).then(|| notional / Decimal::from(contracts))
        };
        Self {
            venue_a: average(&trade.venue_a_ticket_ref),
            venue_b: average(&trade.venue_b_ticket_ref),
        }
    }

    fn leg(&self, leg: LegId) -> Option<Decimal> {
        match leg {
            LegId::A => self.venue_a,
            LegId::B => self.venue_b,
        }
    }
}

// =============================================================================
// Calculator
// =============================================================================

/// Settlement P&L calculator with a configurable unwind cascade.
#[derive(Debug, Clone)]
pub struct PnlCalculator {
    cascade: Vec<PnlStrategy>,
}

impl Default for PnlCalculator {
    fn default() -> Self {
        Self::new(PnlStrategy::default_cascade())
    }
}

impl PnlCalculator {
    #[must_use]
    pub fn new(cascade: Vec<PnlStrategy>) -> Self {
        Self { cascade }
    }

    #[must_use]
    pub fn cascade(&self) -> &[PnlStrategy] {
        &self.cascade
    }

    /// Computes the settlement P&L of a trade.
    ///
    /// `team_won` is the resolved result of the team's market; it is only
    /// needed when a directional leg is still held.
    ///
    /// # Errors
    /// Returns the reason the trade cannot be settled yet, or at all.
    pub fn settle(
        &self,
        trade: &Trade,
        team_won: Option<bool>,
        reported: &ReportedPrices,
    ) -> Result<SettlementCalc, PnlIssue> {
        let formula = formula_for(trade.status, trade.tier).ok_or(PnlIssue::InvalidTier {
            status: trade.status,
            tier: trade.tier,
        })?;
        if formula == FormulaClass::NoExposure {
            return Ok(SettlementCalc {
                pnl: Decimal::ZERO,
                source: NO_EXPOSURE_SOURCE.to_string(),
                formula,
                realized_cents: Decimal::ZERO,
                held_cents: Decimal::ZERO,
            });
        }

        let mut sources = Vec::new();

        let realized_cents = match self.realized_unwind_cents(trade)? {
            Some((cents, strategy)) => {
                sources.push(strategy.as_str());
                cents
            }
            None => Decimal::ZERO,
        };

        let mut held_cents = Decimal::ZERO;

        let hedged = trade.hedged_held();
        if hedged > 0 {
            let (price_a, reported_a) = Self::entry_price(trade, LegId::A, reported)?;
            let (price_b, reported_b) = Self::entry_price(trade, LegId::B, reported)?;
            held_cents += (CONTRACT_PAYOUT_CENTS - price_a - price_b) * Decimal::from(hedged);
            sources.push(if trade.venue_b_opposite_market {
                OPPOSITE_HEDGE_SOURCE
            } else {
                LOCKED_SPREAD_SOURCE
            });
            if reported_a || reported_b {
                sources.push(EXCHANGE_REPORTED_SOURCE);
            }
        }

        if let Some((leg, contracts)) = trade.residual() {
            let team_won = team_won.ok_or(PnlIssue::AwaitingResult)?;
            let (price, was_reported) = Self::entry_price(trade, leg, reported)?;
            held_cents += binary_outcome_cents(trade.leg_backs_team(leg) == team_won, price, contracts);
            sources.push(BINARY_OUTCOME_SOURCE);
            if was_reported && !sources.contains(&EXCHANGE_REPORTED_SOURCE) {
                sources.push(EXCHANGE_REPORTED_SOURCE);
            }
        }

        let pnl = (realized_cents + held_cents) / CONTRACT_PAYOUT_CENTS - trade.fees.total();
        let source = sources.join("+");
        debug!(
            trade_id = %trade.trade_id,
            formula = ?formula,
            source = %source,
            realized_cents = %realized_cents,
            held_cents = %held_cents,
            pnl = %pnl,
            "Computed settlement"
        );
        Ok(SettlementCalc {
            pnl,
            source,
            formula,
            realized_cents,
            held_cents,
        })
    }

    /// Resolves realized unwind P&L through the cascade.
    ///
    /// Returns `None` when nothing was ever closed.
    ///
    /// # Errors
    /// [`PnlIssue::IncompleteUnwind`] when only a legacy unsigned loss exists,
    /// [`PnlIssue::MissingUnwindData`] when no strategy applies.
    pub fn realized_unwind_cents(
        &self,
        trade: &Trade,
    ) -> Result<Option<(Decimal, PnlStrategy)>, PnlIssue> {
        let closed = trade.unwound(LegId::A) + trade.unwound(LegId::B);
        if closed == 0 && trade.unwind_pnl_cents.is_none() && trade.unwind_loss_cents.is_none() {
            return Ok(None);
        }

        for strategy in &self.cascade {
            match strategy {
                PnlStrategy::SignedUnwind => {
                    if let Some(cents) = trade.unwind_pnl_cents {
                        debug!(trade_id = %trade.trade_id, strategy = %strategy, cents = %cents, "Unwind P&L resolved");
                        return Ok(Some((cents, *strategy)));
                    }
                }
                PnlStrategy::RecomputedFromFills => {
                    if let Some(cents) = recompute_from_exits(trade) {
                        debug!(trade_id = %trade.trade_id, strategy = %strategy, cents = %cents, "Unwind P&L resolved");
                        return Ok(Some((cents, *strategy)));
                    }
                }
                PnlStrategy::LegacyUnsignedLoss => {
                    if let Some(loss_cents) = trade.unwind_loss_cents {
                        error!(
                            trade_id = %trade.trade_id,
                            strategy = %strategy,
                            loss_cents = %loss_cents,
                            "Only unsigned legacy unwind loss recorded, trade needs manual review"
                        );
                        return Err(PnlIssue::IncompleteUnwind { loss_cents });
                    }
                }
            }
        }
        Err(PnlIssue::MissingUnwindData)
    }

    fn entry_price(
        trade: &Trade,
        leg: LegId,
        reported: &ReportedPrices,
    ) -> Result<(Decimal, bool), PnlIssue> {
        if let Some(price) = trade.fill_price(leg) {
            return Ok((price, false));
        }
        match reported.leg(leg) {
            Some(price) => {
                debug!(
                    trade_id = %trade.trade_id,
                    leg = ?leg,
                    price_cents = %price,
                    "Using exchange-reported entry price"
                );
                Ok((price, true))
            }
            None => Err(PnlIssue::MissingFillPrice(leg)),
        }
    }
}

/// Value in cents of `contracts` held at `price_cents` once the market resolves.
#[must_use]
pub fn binary_outcome_cents(pays: bool, price_cents: Decimal, contracts: u32) -> Decimal {
    let contracts = Decimal::from(contracts);
    if pays {
        (CONTRACT_PAYOUT_CENTS - price_cents) * contracts
    } else {
        -price_cents * contracts
    }
}

fn recompute_from_exits(trade: &Trade) -> Option<Decimal> {
    let unwind = trade.unwind.as_ref()?;
    let mut cents = Decimal::ZERO;
    for (leg, exit) in [
        (LegId::A, unwind.venue_a_exit_price),
        (LegId::B, unwind.venue_b_exit_price),
    ] {
        let contracts = unwind.contracts(leg);
        if contracts == 0 {
            continue;
        }
        let entry = trade.fill_price(leg)?;
        cents += (exit? - entry) * Decimal::from(contracts);
    }
    Some(cents - unwind.exit_fees * CONTRACT_PAYOUT_CENTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::tests::{create_test_opportunity, create_test_trade};
    use crate::trade::UnwindRecord;
    use crate::types::HedgePlan;
    use rust_decimal_macros::dec;
    use sportsarb_core::{Direction, Instrument, OrderSide, Outcome};

    fn create_hedged_trade(direction: Direction, contracts: u32) -> Trade {
        let opp = create_test_opportunity(direction);
        let mut trade = Trade::pending(&opp, &HedgePlan::from_opportunity(&opp));
        trade.contracts_intended = contracts;
        trade.contracts_filled = contracts;
        trade.venue_b_contracts_filled = contracts;
        trade.venue_a_fill_price = Some(dec!(48));
        trade.venue_b_fill_price = Some(dec!(48));
        trade.classify_fills();
        trade
    }

    fn create_unhedged_trade(price: Decimal, contracts: u32) -> Trade {
        let mut trade = create_test_trade();
        trade.contracts_intended = contracts;
        trade.contracts_filled = contracts;
        trade.venue_a_fill_price = Some(price);
        trade.classify_fills();
        trade
    }

    // ==================== Hedged Tests ====================

    #[test]
    fn test_locked_spread_with_fees() {
        let mut trade = create_hedged_trade(Direction::BuyPmSellK, 10);
        trade.fees.venue_a = dec!(0.20);
        trade.fees.venue_b = dec!(0.30);
        let calc = PnlCalculator::default()
            .settle(&trade, Some(true), &ReportedPrices::default())
            .unwrap();
        // 4c spread on 10 contracts is $0.40, less $0.50 fees.
        assert_eq!(calc.pnl, dec!(-0.10));
        assert_eq!(calc.source, LOCKED_SPREAD_SOURCE);
        assert_eq!(calc.formula, FormulaClass::LockedSpread);
    }

    #[test]
    fn test_hedged_pnl_independent_of_result_and_direction() {
        let calc = PnlCalculator::default();
        let mut results = Vec::new();
        for direction in [Direction::BuyPmSellK, Direction::BuyKSellPm] {
            let trade = create_hedged_trade(direction, 10);
            for team_won in [true, false] {
                results.push(calc.settle(&trade, Some(team_won), &ReportedPrices::default()).unwrap().pnl);
            }
        }
        assert!(results.iter().all(|pnl| *pnl == dec!(0.40)));
    }

    #[test]
    fn test_opposite_hedge_source() {
        let mut trade = create_hedged_trade(Direction::BuyPmSellK, 10);
        trade.venue_b_opposite_market = true;
        trade.venue_b_outcome = Outcome::Yes;
        trade.classify_fills();
        let calc = PnlCalculator::default()
            .settle(&trade, None, &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.formula, FormulaClass::OppositeHedge);
        assert_eq!(calc.source, OPPOSITE_HEDGE_SOURCE);
        assert_eq!(calc.pnl, dec!(0.40));
    }

    // ==================== Directional Tests ====================

    #[test]
    fn test_directional_win_and_loss() {
        let trade = create_unhedged_trade(dec!(60), 5);
        let calc = PnlCalculator::default();
        let won = calc.settle(&trade, Some(true), &ReportedPrices::default()).unwrap();
        let lost = calc.settle(&trade, Some(false), &ReportedPrices::default()).unwrap();
        assert_eq!(won.pnl, dec!(2.00));
        assert_eq!(lost.pnl, dec!(-3.00));
        assert_eq!(won.source, BINARY_OUTCOME_SOURCE);
    }

    #[test]
    fn test_short_leg_pays_when_team_loses() {
        let opp = create_test_opportunity(Direction::BuyKSellPm);
        let mut trade = Trade::pending(&opp, &HedgePlan::from_opportunity(&opp));
        trade.contracts_filled = 5;
        trade.venue_a_fill_price = Some(dec!(60));
        trade.classify_fills();
        let calc = PnlCalculator::default()
            .settle(&trade, Some(false), &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.pnl, dec!(2.00));
    }

    #[test]
    fn test_directional_awaits_result() {
        let trade = create_unhedged_trade(dec!(60), 5);
        let result = PnlCalculator::default().settle(&trade, None, &ReportedPrices::default());
        assert_eq!(result, Err(PnlIssue::AwaitingResult));
        assert!(PnlIssue::AwaitingResult.is_pending());
    }

    #[test]
    fn test_partial_hedge_composite() {
        let mut trade = create_test_trade();
        trade.contracts_filled = 10;
        trade.venue_b_contracts_filled = 6;
        trade.venue_a_fill_price = Some(dec!(45));
        trade.venue_b_fill_price = Some(dec!(50));
        trade.classify_fills();

        let calc = PnlCalculator::default()
            .settle(&trade, Some(false), &ReportedPrices::default())
            .unwrap();
        // 6 hedged at 5c = 30c; 4 YES at 45c lose = -180c.
        assert_eq!(calc.pnl, dec!(-1.50));
        assert_eq!(calc.source, "LOCKED_SPREAD+BINARY_OUTCOME");
    }

    #[test]
    fn test_exchange_reported_price() {
        let mut trade = create_unhedged_trade(dec!(60), 5);
        trade.venue_a_fill_price = None;
        trade.venue_a_ticket_ref = Some("A-1".to_string());
        let fills = vec![Fill {
            fill_id: "f1".to_string(),
            order_id: "A-1".to_string(),
            instrument: Instrument::new("pm-lal-bos-lal", Outcome::Yes),
            side: OrderSide::Buy,
            contracts: 5,
            price_cents: dec!(60),
            fee: Decimal::ZERO,
            executed_at: chrono::Utc::now(),
        }];
        let reported = ReportedPrices::from_fills(&trade, &fills);
        assert_eq!(reported.venue_a, Some(dec!(60)));

        let calc = PnlCalculator::default().settle(&trade, Some(true), &reported).unwrap();
        assert_eq!(calc.pnl, dec!(2.00));
        assert_eq!(calc.source, "BINARY_OUTCOME+EXCHANGE_REPORTED");

        let missing = PnlCalculator::default().settle(&trade, Some(true), &ReportedPrices::default());
        assert_eq!(missing, Err(PnlIssue::MissingFillPrice(LegId::A)));
    }

    // ==================== Cascade Tests ====================

    fn create_exited_trade() -> Trade {
        let mut trade = create_hedged_trade(Direction::BuyPmSellK, 10);
        let mut unwind = UnwindRecord::default();
        unwind.add_exit(LegId::A, 10, dec!(50), Decimal::ZERO);
        unwind.add_exit(LegId::B, 10, dec!(50), Decimal::ZERO);
        trade.unwind = Some(unwind);
        trade.status = TradeStatus::Exited;
        trade.tier = Some(Tier::Tier2Exit);
        trade
    }

    #[test]
    fn test_signed_unwind_first() {
        let mut trade = create_exited_trade();
        trade.unwind_pnl_cents = Some(dec!(35));
        let calc = PnlCalculator::default()
            .settle(&trade, None, &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.pnl, dec!(0.35));
        assert_eq!(calc.source, "SIGNED_UNWIND");
        assert_eq!(calc.held_cents, Decimal::ZERO);
    }

    #[test]
    fn test_recomputed_from_exits_keeps_sign() {
        let mut trade = create_exited_trade();
        trade.unwind_pnl_cents = None;
        // (50 - 48) * 10 on both legs.
        let calc = PnlCalculator::default()
            .settle(&trade, None, &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.pnl, dec!(0.40));
        assert_eq!(calc.source, "RECOMPUTED_FROM_FILLS");

        trade.unwind.as_mut().unwrap().venue_a_exit_price = Some(dec!(40));
        let calc = PnlCalculator::default()
            .settle(&trade, None, &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.pnl, dec!(-0.60));
    }

    #[test]
    fn test_legacy_loss_flags_instead_of_settling() {
        let mut trade = create_exited_trade();
        trade.unwind_pnl_cents = None;
        trade.venue_a_fill_price = None;
        trade.unwind_loss_cents = Some(dec!(25));
        let result = PnlCalculator::default().settle(&trade, None, &ReportedPrices::default());
        assert_eq!(result, Err(PnlIssue::IncompleteUnwind { loss_cents: dec!(25) }));
    }

    #[test]
    fn test_cascade_order_is_configurable() {
        let mut trade = create_exited_trade();
        trade.unwind_pnl_cents = Some(dec!(35));
        let calc = PnlCalculator::new(vec![PnlStrategy::RecomputedFromFills, PnlStrategy::SignedUnwind])
            .settle(&trade, None, &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.source, "RECOMPUTED_FROM_FILLS");
        assert_eq!(calc.pnl, dec!(0.40));
    }

    #[test]
    fn test_invalid_tier_rejected() {
        let mut trade = create_hedged_trade(Direction::BuyPmSellK, 10);
        trade.tier = Some(Tier::Tier3aHold);
        assert!(matches!(
            PnlCalculator::default().settle(&trade, None, &ReportedPrices::default()),
            Err(PnlIssue::InvalidTier { .. })
        ));
    }

    #[test]
    fn test_no_exposure() {
        let mut trade = create_test_trade();
        trade.mark_no_fill();
        let calc = PnlCalculator::default()
            .settle(&trade, None, &ReportedPrices::default())
            .unwrap();
        assert_eq!(calc.pnl, Decimal::ZERO);
        assert_eq!(calc.source, NO_EXPOSURE_SOURCE);
    }
}
