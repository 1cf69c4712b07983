//! Execution engine for dual-venue hedges.
//!
//! Drives one opportunity at a time through the trade state machine:
//!
//! ```text
//! PENDING ──┬─> SKIPPED                       (no order placed)
//!           ├─> PM_NO_FILL                    (venue A did not fill)
//!           └─> PM_FILLED ──┬─> SUCCESS       (venue B filled in full)
//!                           ├─> PARTIAL_HEDGE (venue B filled less)
//!                           └─> UNHEDGED      (venue B filled nothing)
//! ```
//!
//! # Ordering
//! Venue A (fill-or-kill, unreliable) is always placed first and venue B only
//! after venue A's fill is confirmed, sized to that fill. Venue B is never
//! retried. A single async lock keeps at most one order pair in flight.
//!
//! # Safety checks (in order)
//! 1. Circuit breaker
//! 2. Quote freshness (re-quoted from the live quote source when available)
//! 3. Phantom spread
//! 4. Minimum spread
//! 5. Duplicate prevention (blacklist, session, ledger position, in-flight trade)
//! 6. Live mapping verification
//! 7. Depth-aware sizing and hard limits

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use sportsarb_core::{
    AppConfig, EngineConfig, HardLimits, MappingError, MappingService, Opportunity, OrderRequest,
    QuoteSource, SizingConfig, CONTRACT_PAYOUT_CENTS,
};

use crate::fees::FeeCalculator;
use crate::ledger::{LedgerError, TradeLedger};
use crate::legs::{self, LegResult};
use crate::resolver::{ResolveOutcome, ResolveScope, Resolver, ResolverError};
use crate::risk::{CircuitBreaker, ExecutionResult, HaltReason};
use crate::sizing::size_trade;
use crate::store::SessionStore;
use crate::trade::{LegId, SkipReason, Trade, TradeStatus};
use crate::types::{HedgePlan, VenuePair};

// =============================================================================
// Results
// =============================================================================

/// How an execution attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Aborted before any order was placed.
    Skipped { reason: SkipReason },
    /// Venue A did not fill; nothing held.
    NoFill,
    /// Both legs filled equally.
    Hedged { contracts: u32 },
    /// Venue B filled fewer contracts than venue A.
    PartialHedge {
        venue_a: u32,
        venue_b: u32,
        /// What the resolver did with the excess, if it ran.
        residual: Option<ResolveOutcome>,
    },
    /// Venue B filled nothing; venue A held directionally.
    Unhedged { contracts: u32 },
    /// A leg could not be confirmed; the trade stays executing until recovery.
    Unresolved { error: String },
}

impl ExecutionOutcome {
    /// Returns true if the attempt left exposure that is not fully hedged.
    #[must_use]
    pub fn has_unhedged_exposure(&self) -> bool {
        matches!(
            self,
            Self::PartialHedge { .. } | Self::Unhedged { .. } | Self::Unresolved { .. }
        )
    }
}

/// Final record and outcome of one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub trade: Trade,
    pub outcome: ExecutionOutcome,
}

/// Errors that stop the engine from recording an attempt.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),
}

// =============================================================================
// Execution Engine
// =============================================================================

/// Single-flight executor for hedged arbitrage opportunities.
pub struct ExecutionEngine {
    venues: VenuePair,
    mapping: Arc<dyn MappingService>,
    quotes: Option<Arc<dyn QuoteSource>>,
    ledger: Arc<TradeLedger>,
    store: Arc<SessionStore>,
    breaker: Arc<CircuitBreaker>,
    resolver: Option<Arc<Resolver>>,
    fees: FeeCalculator,
    config: EngineConfig,
    sizing: SizingConfig,
    limits: HardLimits,
    lock: Mutex<()>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("venues", &self.venues)
            .field("config", &self.config)
            .field("sizing", &self.sizing)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Creates an engine from the application configuration.
    #[must_use]
    pub fn new(
        venues: VenuePair,
        mapping: Arc<dyn MappingService>,
        ledger: Arc<TradeLedger>,
        store: Arc<SessionStore>,
        breaker: Arc<CircuitBreaker>,
        config: &AppConfig,
    ) -> Self {
        Self {
            venues,
            mapping,
            quotes: None,
            ledger,
            store,
            breaker,
            resolver: None,
            fees: FeeCalculator::with_config(config.fees.clone()),
            config: config.engine.clone(),
            sizing: config.sizing.clone(),
            limits: config.limits.clone(),
            lock: Mutex::new(()),
        }
    }

    /// Re-quotes from a live quote cache before trading.
    #[must_use]
    pub fn with_quote_source(mut self, quotes: Arc<dyn QuoteSource>) -> Self {
        self.quotes = Some(quotes);
        self
    }

    /// Hands partial-hedge residuals to the resolver immediately.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<TradeLedger> {
        &self.ledger
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Executes one opportunity to a recorded outcome.
    ///
    /// Expected outcomes (skips, no-fills, partial hedges) are returned in the
    /// report, never as errors.
    ///
    /// # Errors
    /// Returns an error only if the ledger refuses a write.
    pub async fn execute(&self, opp: &Opportunity) -> Result<ExecutionReport, EngineError> {
        let _guard = self.lock.lock().await;

        let mut trade = Trade::pending(opp, &HedgePlan::from_opportunity(opp));
        self.ledger.insert_attempt(&trade)?;
        info!(
            trade_id = %trade.trade_id,
            game_id = %opp.game_id,
            team = %opp.team,
            direction = %opp.direction,
            requested = opp.max_size,
            "Attempting hedged execution"
        );

        let plan = match self.pre_trade_checks(opp, &trade).await {
            Ok(plan) => plan,
            Err((reason, detail)) => return self.skip(trade, reason, detail),
        };
        trade.spread_cents = plan.spread_cents();
        trade.combined_cost_cents = plan.combined_cost_cents();

        // Sizing and hard limits
        let sizing = size_trade(opp.max_size, &plan, &self.sizing);
        if sizing.contracts == 0 {
            return self.skip(trade, SkipReason::ZeroSize, format!("limited by {:?}", sizing.limited_by));
        }
        let order_a = OrderRequest::buy_fok(
            trade.client_order_id(LegId::A),
            plan.leg_a.instrument.clone(),
            plan.leg_a.price_cents,
            sizing.contracts,
        );
        let order_b = OrderRequest::buy_ioc(
            trade.client_order_id(LegId::B),
            plan.leg_b.instrument.clone(),
            plan.leg_b.price_cents,
            sizing.contracts,
        );
        for order in [&order_a, &order_b] {
            if let Err(e) = self.limits.validate_order(order) {
                return self.skip(trade, SkipReason::HardLimit, e.to_string());
            }
        }
        trade.contracts_intended = sizing.contracts;
        self.ledger.update_execution(&trade)?;
        debug!(
            trade_id = %trade.trade_id,
            contracts = sizing.contracts,
            limited_by = ?sizing.limited_by,
            spread_cents = %trade.spread_cents,
            "Sized hedge"
        );

        // Venue A
        let venue_a = self.venues.leg(LegId::A);
        let baseline_a = legs::baseline_position(venue_a, &order_a.instrument).await;
        let result_a = legs::execute_leg(
            venue_a,
            &order_a,
            baseline_a,
            self.config.venue_a_timeout,
            self.config.poll_interval,
        )
        .await;

        let (filled_a, price_a, ticket_a, fee_a) = match result_a {
            LegResult::Unknown { error } => return self.unresolved(trade, error),
            LegResult::Confirmed { filled: 0, order_id, .. } => {
                trade.venue_a_ticket_ref = order_id;
                trade.mark_no_fill();
                self.ledger.update_execution(&trade)?;
                info!(trade_id = %trade.trade_id, "Venue A did not fill, no exposure");
                return Ok(ExecutionReport {
                    trade,
                    outcome: ExecutionOutcome::NoFill,
                });
            }
            LegResult::Confirmed {
                filled,
                avg_price_cents,
                order_id,
                fees,
            } => {
                if filled > sizing.contracts {
                    // The venue holds these contracts; record them and hedge them all.
                    error!(
                        trade_id = %trade.trade_id,
                        ordered = sizing.contracts,
                        filled = filled,
                        "Venue A filled more than ordered"
                    );
                    trade.contracts_intended = filled;
                    trade.last_error = Some(format!(
                        "venue A over-fill: ordered {}, filled {filled}",
                        sizing.contracts
                    ));
                }
                let price = avg_price_cents.unwrap_or(order_a.price_cents);
                let fee = fees.unwrap_or_else(|| self.fees.taker_fee(LegId::A.venue(), price, filled));
                (filled, price, order_id, fee)
            }
        };

        trade.contracts_filled = filled_a;
        trade.venue_a_fill_price = Some(price_a);
        trade.venue_a_ticket_ref = ticket_a;
        trade.fees.venue_a = fee_a;
        trade.status = TradeStatus::PmFilled;
        self.ledger.update_execution(&trade)?;
        self.store.mark_traded(&trade.game_id);
        self.store.set_exposure(&trade.game_id, &trade.team, filled_a);
        info!(
            trade_id = %trade.trade_id,
            filled = filled_a,
            price_cents = %price_a,
            "Venue A filled, placing hedge"
        );

        // Venue B, sized to the actual venue A fill.
        let order_b = OrderRequest {
            contracts: filled_a,
            ..order_b
        };
        let venue_b = self.venues.leg(LegId::B);
        let baseline_b = legs::baseline_position(venue_b, &order_b.instrument).await;
        let result_b = legs::execute_leg(
            venue_b,
            &order_b,
            baseline_b,
            self.config.venue_b_timeout,
            self.config.poll_interval,
        )
        .await;

        match result_b {
            LegResult::Unknown { error } => return self.unresolved(trade, error),
            LegResult::Confirmed {
                filled,
                avg_price_cents,
                order_id,
                fees,
            } => {
                let filled = filled.min(filled_a);
                trade.venue_b_contracts_filled = filled;
                trade.venue_b_ticket_ref = order_id;
                if filled > 0 {
                    let price = avg_price_cents.unwrap_or(order_b.price_cents);
                    trade.venue_b_fill_price = Some(price);
                    trade.fees.venue_b =
                        fees.unwrap_or_else(|| self.fees.taker_fee(LegId::B.venue(), price, filled));
                }
            }
        }

        trade.classify_fills();
        self.ledger.update_execution(&trade)?;
        self.finish(trade).await
    }

    /// Runs every check that can abort the attempt before an order is placed.
    async fn pre_trade_checks(
        &self,
        opp: &Opportunity,
        trade: &Trade,
    ) -> Result<HedgePlan, (SkipReason, String)> {
        if let Err(e) = self.breaker.check() {
            return Err((SkipReason::CircuitBreaker, e.to_string()));
        }

        let plan = self.current_plan(opp)?;
        let spread = plan.spread_cents();
        if spread >= self.config.phantom_spread_cents {
            warn!(
                trade_id = %trade.trade_id,
                spread_cents = %spread,
                combined_cost_cents = %plan.combined_cost_cents(),
                "Phantom spread rejected"
            );
            return Err((
                SkipReason::PhantomSpread,
                format!("spread {spread}c implies a stale or empty book"),
            ));
        }
        if spread < self.config.min_spread_cents {
            return Err((
                SkipReason::Unfavorable,
                format!("spread {spread}c below minimum {}c", self.config.min_spread_cents),
            ));
        }

        if let Some(reason) = self.store.blacklist_reason(&opp.game_id) {
            return Err((SkipReason::Blacklisted, reason));
        }
        if self.store.is_traded(&opp.game_id)
            || self.store.exposure(&opp.game_id, &opp.team) > 0
            || self.ledger.position(&opp.game_id, &opp.team) > 0
        {
            return Err((SkipReason::Duplicate, "position already exists".to_string()));
        }
        let in_flight = self
            .ledger
            .trades_for_game(&opp.game_id)
            .into_iter()
            .any(|t| t.trade_id != trade.trade_id && t.status.is_executing());
        if in_flight {
            return Err((SkipReason::Duplicate, "unresolved attempt for game".to_string()));
        }

        self.verify_mapping(opp).await?;
        Ok(plan)
    }

    /// Re-prices the legs from live quotes when both are fresh, else checks the opportunity's own age.
    fn current_plan(&self, opp: &Opportunity) -> Result<HedgePlan, (SkipReason, String)> {
        let now = Utc::now();
        let fresh = |age: chrono::Duration| age.to_std().unwrap_or(Duration::ZERO) <= self.config.max_quote_age;

        if self.config.requote {
            if let Some(quotes) = &self.quotes {
                let live_a = quotes.quote(LegId::A.venue(), &opp.venue_a_market);
                let live_b = quotes.quote(LegId::B.venue(), &opp.venue_b_market);
                if let (Some(a), Some(b)) = (live_a, live_b) {
                    if fresh(a.age(now)) && fresh(b.age(now)) {
                        debug!(game_id = %opp.game_id, "Re-quoted from live cache");
                        return Ok(HedgePlan::from_quotes(opp, &a, &b));
                    }
                }
            }
        }

        let age = now - opp.quoted_at;
        if !fresh(age) {
            return Err((
                SkipReason::StaleQuote,
                format!("quote age {}ms exceeds maximum", age.num_milliseconds()),
            ));
        }
        Ok(HedgePlan::from_opportunity(opp))
    }

    /// Confirms the market mapping with a live call. Any doubt aborts.
    async fn verify_mapping(&self, opp: &Opportunity) -> Result<(), (SkipReason, String)> {
        match self.mapping.resolve(&opp.sport, &opp.game_id, &opp.team).await {
            Ok(mapping) => {
                let matches = mapping.venue_a_market == opp.venue_a_market
                    && mapping.venue_b_market == opp.venue_b_market
                    && mapping.venue_b_is_opponent == opp.venue_b_is_opponent;
                if matches {
                    return Ok(());
                }
                let detail = format!(
                    "expected {}/{} (opponent={}), got {}/{} (opponent={})",
                    mapping.venue_a_market,
                    mapping.venue_b_market,
                    mapping.venue_b_is_opponent,
                    opp.venue_a_market,
                    opp.venue_b_market,
                    opp.venue_b_is_opponent
                );
                error!(game_id = %opp.game_id, detail = %detail, "Mapping verification failed");
                self.store.blacklist(&opp.game_id, "mapping mismatch");
                Err((SkipReason::MappingMismatch, detail))
            }
            Err(e @ MappingError::NotFound { .. }) => {
                error!(game_id = %opp.game_id, error = %e, "Mapping verification failed");
                self.store.blacklist(&opp.game_id, "mapping not found");
                Err((SkipReason::MappingMismatch, e.to_string()))
            }
            Err(e @ MappingError::Unavailable(_)) => {
                warn!(game_id = %opp.game_id, error = %e, "Mapping service unavailable");
                Err((SkipReason::MappingUnavailable, e.to_string()))
            }
        }
    }

    fn skip(
        &self,
        mut trade: Trade,
        reason: SkipReason,
        detail: impl Into<String>,
    ) -> Result<ExecutionReport, EngineError> {
        let detail = detail.into();
        trade.mark_skipped(reason, detail.clone());
        self.ledger.update_execution(&trade)?;
        info!(
            trade_id = %trade.trade_id,
            reason = %reason,
            detail = %detail,
            "Execution skipped"
        );
        Ok(ExecutionReport {
            trade,
            outcome: ExecutionOutcome::Skipped { reason },
        })
    }

    fn unresolved(&self, mut trade: Trade, error: String) -> Result<ExecutionReport, EngineError> {
        trade.last_error = Some(error.clone());
        self.ledger.update_execution(&trade)?;
        self.breaker.record_execution(ExecutionResult::Unconfirmed);
        error!(
            trade_id = %trade.trade_id,
            status = %trade.status,
            error = %error,
            "Leg outcome unknown, leaving trade for recovery"
        );
        Ok(ExecutionReport {
            trade,
            outcome: ExecutionOutcome::Unresolved { error },
        })
    }

    async fn finish(&self, trade: Trade) -> Result<ExecutionReport, EngineError> {
        let venue_a = trade.contracts_filled;
        let venue_b = trade.venue_b_contracts_filled;

        let (trade, outcome) = match trade.status {
            TradeStatus::Success => {
                let locked = trade
                    .venue_a_fill_price
                    .zip(trade.venue_b_fill_price)
                    .map_or(trade.spread_cents, |(a, b)| CONTRACT_PAYOUT_CENTS - a - b);
                let expected = locked * Decimal::from(venue_a) / CONTRACT_PAYOUT_CENTS - trade.fees.total();
                self.breaker
                    .record_execution(ExecutionResult::Hedged { expected_pnl: expected });
                info!(
                    trade_id = %trade.trade_id,
                    contracts = venue_a,
                    tier = ?trade.tier,
                    expected_pnl = %expected,
                    "Hedge complete"
                );
                (trade, ExecutionOutcome::Hedged { contracts: venue_a })
            }
            TradeStatus::PartialHedge => {
                self.breaker.record_execution(ExecutionResult::Unhedged {
                    contracts: venue_a - venue_b,
                });
                warn!(
                    trade_id = %trade.trade_id,
                    venue_a = venue_a,
                    venue_b = venue_b,
                    "Partial hedge, resolving excess"
                );
                let residual = match &self.resolver {
                    Some(resolver) => Some(resolver.resolve_trade(&trade, ResolveScope::ResidualOnly).await?),
                    None => None,
                };
                let trade = self.ledger.get(&trade.trade_id).unwrap_or(trade);
                (
                    trade,
                    ExecutionOutcome::PartialHedge {
                        venue_a,
                        venue_b,
                        residual,
                    },
                )
            }
            TradeStatus::Unhedged => {
                self.breaker
                    .record_execution(ExecutionResult::Unhedged { contracts: venue_a });
                warn!(
                    trade_id = %trade.trade_id,
                    contracts = venue_a,
                    "Venue B did not fill, holding venue A directionally"
                );
                (trade, ExecutionOutcome::Unhedged { contracts: venue_a })
            }
            _ => (trade, ExecutionOutcome::NoFill),
        };

        self.store
            .set_exposure(&trade.game_id, &trade.team, trade.held(LegId::A));
        Ok(ExecutionReport { trade, outcome })
    }

    /// Executes opportunities from a feed, one at a time, until the feed ends or shutdown.
    pub async fn run(self: Arc<Self>, mut feed: mpsc::Receiver<Opportunity>, mut shutdown: watch::Receiver<bool>) {
        info!("Execution engine started");
        loop {
            tokio::select! {
                next = feed.recv() => {
                    let Some(opp) = next else {
                        info!("Opportunity feed closed");
                        break;
                    };
                    match self.execute(&opp).await {
                        Ok(report) => debug!(
                            trade_id = %report.trade.trade_id,
                            outcome = ?report.outcome,
                            "Attempt recorded"
                        ),
                        Err(e) => {
                            error!(error = %e, "Ledger refused execution record, halting entries");
                            self.breaker.halt(HaltReason::LedgerWrite);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Execution engine stopped");
    }
}
