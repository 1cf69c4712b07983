//! Unwind/hold resolver for open positions.
//!
//! Every poll re-prices each open trade from live quotes and compares closing
//! now against holding to settlement.
//!
//! # Hedged contracts
//!
//! ```text
//! combined_exit = exit_A + exit_B            (long YES: bid, NO token: 100 - ask)
//! unwind_pnl    = (combined_exit - entry_cost) * q - exit_fees
//! hold_pnl      = (100 - entry_cost) * q - entry_fees
//! unwind iff unwind_pnl > hold_pnl and unwind_pnl > 0
//! ```
//!
//! # Directional residual
//!
//! ```text
//! unwind_pnl = (exit - entry) * r - exit_fees
//! unwind iff unwind_pnl > take_profit * r and unwind_pnl > 0
//! ```
//!
//! All amounts in cents. Unwinds close venue A first and close venue B only
//! for what venue A actually closed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sportsarb_core::{OrderRequest, Quote, QuoteSource, ResolverConfig, CONTRACT_PAYOUT_CENTS};

use crate::fees::FeeCalculator;
use crate::ledger::{LedgerError, TradeLedger};
use crate::legs::{self, LegResult};
use crate::risk::CircuitBreaker;
use crate::store::SessionStore;
use crate::trade::{LegId, Phase, Tier, Trade, TradeStatus, UnwindRecord};
use crate::types::VenuePair;

// =============================================================================
// Evaluation
// =============================================================================

/// Why a position could not be evaluated this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    MissingQuote,
    StaleQuote,
    MissingFillPrice,
    /// Another caller is already unwinding the trade.
    InFlight,
}

/// Resolver decision for one part of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    Unwind,
    Skip(SkipCause),
}

/// Priced comparison between unwinding and holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Contracts evaluated.
    pub contracts: u32,
    /// P&L of closing now, in cents.
    pub unwind_pnl_cents: Decimal,
    /// P&L of holding (or the directional threshold), in cents.
    pub hold_pnl_cents: Decimal,
    /// Exit limit prices for venue A and venue B.
    pub exit_prices: (Option<Decimal>, Option<Decimal>),
    pub decision: Decision,
}

impl Evaluation {
    fn skip(contracts: u32, cause: SkipCause) -> Self {
        Self {
            contracts,
            unwind_pnl_cents: Decimal::ZERO,
            hold_pnl_cents: Decimal::ZERO,
            exit_prices: (None, None),
            decision: Decision::Skip(cause),
        }
    }

    #[must_use]
    pub fn is_unwind(&self) -> bool {
        self.decision == Decision::Unwind
    }
}

/// Evaluates the hedged contracts of a trade against fresh quotes.
#[must_use]
pub fn evaluate_hedged(trade: &Trade, quote_a: &Quote, quote_b: &Quote, fees: &FeeCalculator) -> Evaluation {
    let q = trade.hedged_held();
    let (Some(entry_a), Some(entry_b)) = (trade.venue_a_fill_price, trade.venue_b_fill_price) else {
        return Evaluation::skip(q, SkipCause::MissingFillPrice);
    };
    let (Some(exit_a), Some(exit_b)) = (
        quote_a.exit_price(trade.venue_a_outcome),
        quote_b.exit_price(trade.venue_b_outcome),
    ) else {
        return Evaluation::skip(q, SkipCause::MissingQuote);
    };

    let qd = Decimal::from(q);
    let entry_cost = entry_a + entry_b;
    let exit_fees = (fees.taker_fee(LegId::A.venue(), exit_a, q) + fees.taker_fee(LegId::B.venue(), exit_b, q))
        * CONTRACT_PAYOUT_CENTS;
    let unwind_pnl_cents = (exit_a + exit_b - entry_cost) * qd - exit_fees;
    let hold_pnl_cents = (CONTRACT_PAYOUT_CENTS - entry_cost) * qd
        - trade.entry_fee_cents(LegId::A, q)
        - trade.entry_fee_cents(LegId::B, q);

    let decision = if unwind_pnl_cents > hold_pnl_cents && unwind_pnl_cents > Decimal::ZERO {
        Decision::Unwind
    } else {
        Decision::Hold
    };
    Evaluation {
        contracts: q,
        unwind_pnl_cents,
        hold_pnl_cents,
        exit_prices: (Some(exit_a), Some(exit_b)),
        decision,
    }
}

/// Evaluates `contracts` unhedged contracts on `leg` against a fresh quote.
#[must_use]
pub fn evaluate_residual(
    trade: &Trade,
    leg: LegId,
    contracts: u32,
    quote: &Quote,
    fees: &FeeCalculator,
    take_profit_cents: Decimal,
) -> Evaluation {
    let Some(entry) = trade.fill_price(leg) else {
        return Evaluation::skip(contracts, SkipCause::MissingFillPrice);
    };
    let Some(exit) = quote.exit_price(trade.instrument(leg).outcome) else {
        return Evaluation::skip(contracts, SkipCause::MissingQuote);
    };

    let r = Decimal::from(contracts);
    let exit_fee = fees.taker_fee(leg.venue(), exit, contracts) * CONTRACT_PAYOUT_CENTS;
    let unwind_pnl_cents = (exit - entry) * r - exit_fee;
    let threshold = take_profit_cents * r;

    let decision = if unwind_pnl_cents > threshold && unwind_pnl_cents > Decimal::ZERO {
        Decision::Unwind
    } else {
        Decision::Hold
    };
    let exit_prices = match leg {
        LegId::A => (Some(exit), None),
        LegId::B => (None, Some(exit)),
    };
    Evaluation {
        contracts,
        unwind_pnl_cents,
        hold_pnl_cents: threshold,
        exit_prices,
        decision,
    }
}

/// Status and tier after contracts were closed.
#[must_use]
pub fn status_after_unwind(trade: &Trade) -> (TradeStatus, Option<Tier>) {
    let a = trade.held(LegId::A);
    let b = trade.held(LegId::B);
    if a == 0 && b == 0 {
        let was_hedged = trade.venue_b_contracts_filled >= trade.contracts_filled;
        let tier = if was_hedged { Tier::Tier2Exit } else { Tier::Tier3Unwind };
        return (TradeStatus::Exited, Some(tier));
    }
    match trade.status {
        TradeStatus::Unhedged => (TradeStatus::Unhedged, Some(Tier::Tier3aHold)),
        TradeStatus::Success if a == b => (trade.status, trade.tier),
        _ => (TradeStatus::PartialHedge, Some(Tier::Tier3Unwind)),
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Which part of a position to consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveScope {
    /// Hedged contracts and any residual.
    All,
    /// Only the unhedged residual (used by the engine right after a partial hedge).
    ResidualOnly,
}

/// What happened to one trade in one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// Nothing held.
    Flat,
    /// Holding is at least as good as closing.
    Held,
    /// Could not be priced this cycle.
    Skipped(SkipCause),
    /// Contracts were closed.
    Unwound {
        venue_a_contracts: u32,
        venue_b_contracts: u32,
        pnl_cents: Decimal,
    },
    /// A closing order could not be confirmed.
    Unconfirmed { error: String },
}

/// Summary of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverReport {
    pub evaluated: usize,
    pub held: usize,
    pub skipped: usize,
    pub unwound: usize,
    pub errors: usize,
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

struct ClosePlan {
    venue_a: u32,
    venue_a_price: Option<Decimal>,
    /// Venue B contracts closed only up to what venue A closed.
    venue_b_hedged: u32,
    venue_b_residual: u32,
    venue_b_price: Option<Decimal>,
}

/// Periodic unwind/hold decision worker.
pub struct Resolver {
    venues: VenuePair,
    quotes: Arc<dyn QuoteSource>,
    ledger: Arc<TradeLedger>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<SessionStore>,
    fees: FeeCalculator,
    config: ResolverConfig,
    /// Trades currently being resolved.
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a trade claimed by [`Resolver::claim`] when dropped.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    trade_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.trade_id);
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("venues", &self.venues)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    #[must_use]
    pub fn new(
        venues: VenuePair,
        quotes: Arc<dyn QuoteSource>,
        ledger: Arc<TradeLedger>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<SessionStore>,
        fees: FeeCalculator,
        config: ResolverConfig,
    ) -> Self {
        Self {
            venues,
            quotes,
            ledger,
            breaker,
            store,
            fees,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn claim(&self, trade_id: &str) -> Option<Claim<'_>> {
        if !self.in_flight.lock().insert(trade_id.to_string()) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            trade_id: trade_id.to_string(),
        })
    }

    fn fresh_quote(&self, leg: LegId, market: &str) -> Result<Quote, SkipCause> {
        let quote = self
            .quotes
            .quote(leg.venue(), market)
            .ok_or(SkipCause::MissingQuote)?;
        let age = quote.age(Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if age > self.config.max_quote_age {
            return Err(SkipCause::StaleQuote);
        }
        Ok(quote)
    }

    /// Prices every part of a position in scope.
    #[must_use]
    pub fn evaluate(&self, trade: &Trade, scope: ResolveScope) -> (Option<Evaluation>, Option<(LegId, Evaluation)>) {
        let quote_a = self.fresh_quote(LegId::A, &trade.venue_a_market);
        let quote_b = self.fresh_quote(LegId::B, &trade.venue_b_market);

        let hedged = match scope {
            ResolveScope::All if trade.hedged_held() > 0 => Some(match (&quote_a, &quote_b) {
                (Ok(a), Ok(b)) => evaluate_hedged(trade, a, b, &self.fees),
                (Err(cause), _) | (_, Err(cause)) => Evaluation::skip(trade.hedged_held(), *cause),
            }),
            _ => None,
        };

        let residual = trade.residual().map(|(leg, contracts)| {
            let quote = match leg {
                LegId::A => &quote_a,
                LegId::B => &quote_b,
            };
            let evaluation = match quote {
                Ok(quote) => evaluate_residual(
                    trade,
                    leg,
                    contracts,
                    quote,
                    &self.fees,
                    self.config.directional_take_profit_cents,
                ),
                Err(cause) => Evaluation::skip(contracts, *cause),
            };
            (leg, evaluation)
        });

        (hedged, residual)
    }

    /// Evaluates one trade and closes what the decision says to close.
    ///
    /// At most one caller resolves a trade at a time, and the decision is
    /// made from the latest ledger version rather than `trade`, which may
    /// predate an unwind another caller already wrote.
    ///
    /// # Errors
    /// Returns an error only if the ledger refuses the write.
    pub async fn resolve_trade(&self, trade: &Trade, scope: ResolveScope) -> Result<ResolveOutcome, ResolverError> {
        let Some(_claim) = self.claim(&trade.trade_id) else {
            debug!(trade_id = %trade.trade_id, "Trade already being resolved");
            return Ok(ResolveOutcome::Skipped(SkipCause::InFlight));
        };
        let latest = self
            .ledger
            .get(&trade.trade_id)
            .ok_or_else(|| LedgerError::NotFound(trade.trade_id.clone()))?;
        if latest.phase() != Phase::Open {
            debug!(trade_id = %trade.trade_id, phase = ?latest.phase(), "Trade no longer open");
            return Ok(ResolveOutcome::Flat);
        }
        let trade = &latest;

        if trade.held(LegId::A) == 0 && trade.held(LegId::B) == 0 {
            return Ok(ResolveOutcome::Flat);
        }

        let (hedged, residual) = self.evaluate(trade, scope);
        let mut plan = ClosePlan {
            venue_a: 0,
            venue_a_price: None,
            venue_b_hedged: 0,
            venue_b_residual: 0,
            venue_b_price: None,
        };

        if let Some(eval) = hedged.filter(Evaluation::is_unwind) {
            plan.venue_a += eval.contracts;
            plan.venue_b_hedged = eval.contracts;
            plan.venue_a_price = eval.exit_prices.0;
            plan.venue_b_price = eval.exit_prices.1;
        }
        if let Some((leg, eval)) = residual.filter(|(_, eval)| eval.is_unwind()) {
            match leg {
                LegId::A => {
                    plan.venue_a += eval.contracts;
                    plan.venue_a_price = eval.exit_prices.0;
                }
                LegId::B => {
                    plan.venue_b_residual = eval.contracts;
                    plan.venue_b_price = eval.exit_prices.1;
                }
            }
        }

        if plan.venue_a == 0 && plan.venue_b_hedged == 0 && plan.venue_b_residual == 0 {
            let skip = [hedged, residual.map(|(_, e)| e)]
                .into_iter()
                .flatten()
                .find_map(|e| match e.decision {
                    Decision::Skip(cause) => Some(cause),
                    _ => None,
                });
            if let Some(cause) = skip {
                debug!(trade_id = %trade.trade_id, cause = ?cause, "Resolver skipped position");
                return Ok(ResolveOutcome::Skipped(cause));
            }
            debug!(
                trade_id = %trade.trade_id,
                hedged_unwind = ?hedged.map(|e| e.unwind_pnl_cents),
                hedged_hold = ?hedged.map(|e| e.hold_pnl_cents),
                "Holding position"
            );
            return Ok(ResolveOutcome::Held);
        }

        self.execute_unwind(trade, plan).await
    }

    async fn execute_unwind(&self, trade: &Trade, plan: ClosePlan) -> Result<ResolveOutcome, ResolverError> {
        let mut updated = trade.clone();
        let mut record = updated.unwind.clone().unwrap_or_default();
        let mut realized = Decimal::ZERO;
        let mut error = None;
        let stamp = Utc::now().timestamp_millis();

        // Venue A first.
        let mut closed_a = 0;
        if plan.venue_a > 0 {
            if let Some(price) = plan.venue_a_price {
                match self.close_leg(trade, LegId::A, plan.venue_a, price, stamp).await {
                    Ok(closed) => {
                        closed_a = closed.contracts;
                        realized += closed.realize(trade, LegId::A, &mut record);
                    }
                    Err(e) => error = Some(e),
                }
            }
        }

        let mut venue_b_target = plan.venue_b_residual;
        if error.is_none() {
            venue_b_target += plan.venue_b_hedged.min(closed_a);
        }
        let mut closed_b = 0;
        if venue_b_target > 0 {
            if let Some(price) = plan.venue_b_price {
                match self.close_leg(trade, LegId::B, venue_b_target, price, stamp).await {
                    Ok(closed) => {
                        closed_b = closed.contracts;
                        realized += closed.realize(trade, LegId::B, &mut record);
                    }
                    Err(e) => error = Some(e),
                }
            }
        }

        if closed_a == 0 && closed_b == 0 && error.is_none() {
            debug!(trade_id = %trade.trade_id, "Unwind orders found no liquidity");
            return Ok(ResolveOutcome::Held);
        }

        if closed_a > 0 || closed_b > 0 {
            updated.unwind = Some(record);
            updated.unwind_pnl_cents = Some(updated.unwind_pnl_cents.unwrap_or(Decimal::ZERO) + realized);
            let (status, tier) = status_after_unwind(&updated);
            updated.status = status;
            updated.tier = tier;
        }
        updated.last_error.clone_from(&error);

        let stored = self.ledger.record_unwind(&updated)?;
        self.breaker.record_realized(realized / CONTRACT_PAYOUT_CENTS);
        self.store
            .set_exposure(&stored.game_id, &stored.team, stored.held(LegId::A));

        if let Some(error) = error {
            warn!(
                trade_id = %trade.trade_id,
                error = %error,
                "Unwind order unconfirmed"
            );
            return Ok(ResolveOutcome::Unconfirmed { error });
        }

        info!(
            trade_id = %stored.trade_id,
            venue_a_closed = closed_a,
            venue_b_closed = closed_b,
            pnl_cents = %realized,
            status = %stored.status,
            tier = ?stored.tier,
            "Position unwound"
        );
        Ok(ResolveOutcome::Unwound {
            venue_a_contracts: closed_a,
            venue_b_contracts: closed_b,
            pnl_cents: realized,
        })
    }

    async fn close_leg(
        &self,
        trade: &Trade,
        leg: LegId,
        contracts: u32,
        price_cents: Decimal,
        stamp: i64,
    ) -> Result<ClosedLeg, String> {
        let venue = self.venues.leg(leg);
        let order = OrderRequest::sell_ioc(
            format!("{}-U{}{}", trade.trade_id, leg.venue().leg_label(), stamp),
            trade.instrument(leg),
            price_cents,
            contracts,
        );
        let baseline = legs::baseline_position(venue, &order.instrument).await;
        match legs::execute_leg(
            venue,
            &order,
            baseline,
            self.config.order_timeout,
            self.config.order_poll_interval,
        )
        .await
        {
            LegResult::Confirmed {
                filled,
                avg_price_cents,
                order_id,
                fees,
            } => Ok(ClosedLeg {
                contracts: filled,
                price_cents: avg_price_cents.unwrap_or(price_cents),
                fee: fees.unwrap_or_else(|| self.fees.taker_fee(leg.venue(), price_cents, filled)),
                order_id,
            }),
            LegResult::Unknown { error } => Err(error),
        }
    }

    /// Runs one pass over every open position.
    pub async fn run_once(&self) -> ResolverReport {
        let mut report = ResolverReport::default();
        for trade in self.ledger.open_trades() {
            if trade.held(LegId::A) == 0 && trade.held(LegId::B) == 0 {
                continue;
            }
            report.evaluated += 1;
            match self.resolve_trade(&trade, ResolveScope::All).await {
                Ok(ResolveOutcome::Held | ResolveOutcome::Flat) => report.held += 1,
                Ok(ResolveOutcome::Skipped(_)) => report.skipped += 1,
                Ok(ResolveOutcome::Unwound { .. }) => report.unwound += 1,
                Ok(ResolveOutcome::Unconfirmed { .. }) => report.errors += 1,
                Err(e) => {
                    warn!(trade_id = %trade.trade_id, error = %e, "Resolver write failed");
                    report.errors += 1;
                }
            }
        }
        report
    }

    /// Runs passes on `poll_interval` until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            "Resolver started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if report.evaluated > 0 {
                        info!(
                            evaluated = report.evaluated,
                            unwound = report.unwound,
                            held = report.held,
                            skipped = report.skipped,
                            errors = report.errors,
                            "Resolver pass complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Resolver stopped");
    }
}

struct ClosedLeg {
    contracts: u32,
    price_cents: Decimal,
    fee: Decimal,
    order_id: Option<String>,
}

impl ClosedLeg {
    /// Folds the close into the unwind record and returns its realized P&L in cents.
    fn realize(&self, trade: &Trade, leg: LegId, record: &mut UnwindRecord) -> Decimal {
        if self.contracts == 0 {
            return Decimal::ZERO;
        }
        record.add_exit(leg, self.contracts, self.price_cents, self.fee);
        if let Some(order_id) = &self.order_id {
            record.ticket_refs.push(order_id.clone());
        }
        let entry = trade.fill_price(leg).unwrap_or(Decimal::ZERO);
        (self.price_cents - entry) * Decimal::from(self.contracts) - self.fee * CONTRACT_PAYOUT_CENTS
    }
}
