//! Startup recovery of interrupted executions.
//!
//! Any trade still `PENDING` or `PM_FILLED` when the process starts was cut
//! off mid-execution. Each is resolved from venue state alone: orders are
//! found by their idempotent client ids and positions are read as a
//! cross-check. Recovery never places an order; a missing venue B leg is
//! recorded as unhedged and left to the resolver.

use std::sync::Arc;

use tracing::{info, warn};

use sportsarb_core::{OrderStatus, VenueAdapter, VenueError};

use crate::ledger::{LedgerError, TradeLedger};
use crate::legs;
use crate::store::SessionStore;
use crate::trade::{LegId, Phase, Trade, TradeStatus};
use crate::types::VenuePair;

/// Result of a recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Trades moved to a final execution status.
    pub resolved: Vec<(String, TradeStatus)>,
    /// Trades left executing because a venue could not be read.
    pub unresolved: Vec<(String, String)>,
}

/// What a venue says about one leg.
enum LegLookup {
    Found(OrderStatus),
    NeverPlaced,
    Unreadable(String),
}

/// Resolves interrupted executions from venue state.
#[derive(Debug)]
pub struct Recovery {
    venues: VenuePair,
    ledger: Arc<TradeLedger>,
    store: Arc<SessionStore>,
}

impl Recovery {
    #[must_use]
    pub fn new(venues: VenuePair, ledger: Arc<TradeLedger>, store: Arc<SessionStore>) -> Self {
        Self {
            venues,
            ledger,
            store,
        }
    }

    /// Resolves every executing trade in the ledger.
    ///
    /// # Errors
    /// Returns an error if the ledger refuses a write.
    pub async fn run(&self) -> Result<RecoveryReport, LedgerError> {
        let mut report = RecoveryReport::default();
        let executing = self.ledger.executing();
        if executing.is_empty() {
            return Ok(report);
        }
        info!(trades = executing.len(), "Recovering interrupted executions");

        for trade in executing {
            let trade_id = trade.trade_id.clone();
            match self.recover_trade(trade).await? {
                Ok(status) => report.resolved.push((trade_id, status)),
                Err(error) => {
                    warn!(trade_id = %trade_id, error = %error, "Trade left unresolved");
                    report.unresolved.push((trade_id, error));
                }
            }
        }

        info!(
            resolved = report.resolved.len(),
            unresolved = report.unresolved.len(),
            "Recovery complete"
        );
        Ok(report)
    }

    async fn recover_trade(&self, mut trade: Trade) -> Result<Result<TradeStatus, String>, LedgerError> {
        if trade.status == TradeStatus::Pending {
            match lookup(self.venues.leg(LegId::A), &trade.client_order_id(LegId::A)).await {
                LegLookup::Unreadable(error) => return Ok(Err(error)),
                LegLookup::NeverPlaced => {
                    if let Err(error) = self.confirm_unplaced(&trade, LegId::A).await {
                        return Ok(Err(error));
                    }
                    trade.mark_no_fill();
                    self.ledger.update_execution(&trade)?;
                    info!(trade_id = %trade.trade_id, "Venue A order never placed");
                    return Ok(Ok(trade.status));
                }
                LegLookup::Found(status) => {
                    trade.venue_a_ticket_ref = Some(status.order_id.clone());
                    let filled = status.filled;
                    if filled > trade.contracts_intended {
                        warn!(
                            trade_id = %trade.trade_id,
                            intended = trade.contracts_intended,
                            filled = filled,
                            "Venue A filled more than ordered"
                        );
                        trade.contracts_intended = filled;
                    }
                    if filled == 0 {
                        trade.mark_no_fill();
                        self.ledger.update_execution(&trade)?;
                        info!(trade_id = %trade.trade_id, "Venue A order did not fill");
                        return Ok(Ok(trade.status));
                    }
                    trade.contracts_filled = filled;
                    trade.venue_a_fill_price = status.avg_fill_price_cents;
                    trade.fees.venue_a = status.fees;
                    trade.status = TradeStatus::PmFilled;
                    self.ledger.update_execution(&trade)?;
                }
            }
        }

        self.corroborate(&trade).await;
        self.store.mark_traded(&trade.game_id);
        self.store
            .set_exposure(&trade.game_id, &trade.team, trade.contracts_filled);

        match lookup(self.venues.leg(LegId::B), &trade.client_order_id(LegId::B)).await {
            LegLookup::Unreadable(error) => return Ok(Err(error)),
            LegLookup::NeverPlaced => {
                if let Err(error) = self.confirm_unplaced(&trade, LegId::B).await {
                    return Ok(Err(error));
                }
            }
            LegLookup::Found(status) => {
                let filled = status.filled.min(trade.contracts_filled);
                trade.venue_b_ticket_ref = Some(status.order_id.clone());
                trade.venue_b_contracts_filled = filled;
                if filled > 0 {
                    trade.venue_b_fill_price = status.avg_fill_price_cents;
                    trade.fees.venue_b = status.fees;
                }
            }
        }

        trade.classify_fills();
        trade.last_error = None;
        self.ledger.update_execution(&trade)?;
        if trade.status == TradeStatus::Success {
            info!(
                trade_id = %trade.trade_id,
                contracts = trade.contracts_filled,
                "Recovered hedged trade"
            );
        } else {
            warn!(
                trade_id = %trade.trade_id,
                status = %trade.status,
                venue_a = trade.contracts_filled,
                venue_b = trade.venue_b_contracts_filled,
                "Recovered trade with unhedged exposure"
            );
        }
        Ok(Ok(trade.status))
    }

    /// Checks that a leg the venue has no order for left no contracts behind.
    ///
    /// The venue position must not exceed what other unsettled trades on the
    /// same instrument account for.
    async fn confirm_unplaced(&self, trade: &Trade, leg: LegId) -> Result<(), String> {
        let instrument = trade.instrument(leg);
        let position = self
            .venues
            .leg(leg)
            .get_position(&instrument)
            .await
            .map_err(|e| format!("order not found and position unreadable: {e}"))?;
        let accounted: i64 = self
            .ledger
            .snapshot()
            .iter()
            .filter(|t| t.trade_id != trade.trade_id && t.phase() != Phase::Settled)
            .filter(|t| t.instrument(leg) == instrument)
            .map(|t| i64::from(t.held(leg)))
            .sum();
        if position > accounted {
            return Err(format!(
                "order not found but {instrument} position is {position}, ledger accounts for {accounted}"
            ));
        }
        Ok(())
    }

    /// Warns if venue A holds fewer contracts than the recorded fill.
    async fn corroborate(&self, trade: &Trade) {
        let venue = self.venues.leg(LegId::A);
        match venue.get_position(&trade.instrument(LegId::A)).await {
            Ok(position) if position < i64::from(trade.contracts_filled) => warn!(
                trade_id = %trade.trade_id,
                position = position,
                recorded = trade.contracts_filled,
                "Venue A position below recorded fill"
            ),
            Ok(_) => {}
            Err(e) => warn!(trade_id = %trade.trade_id, error = %e, "Position cross-check unavailable"),
        }
    }
}

async fn lookup(venue: &dyn VenueAdapter, client_order_id: &str) -> LegLookup {
    match legs::lookup_order(venue, client_order_id).await {
        Ok(Some(status)) if status.state.is_terminal() => LegLookup::Found(status),
        Ok(Some(status)) => LegLookup::Unreadable(format!("order {} still live", status.order_id)),
        Ok(None) => LegLookup::NeverPlaced,
        Err(VenueError::OrderNotFound(_)) => LegLookup::NeverPlaced,
        Err(e) => LegLookup::Unreadable(e.to_string()),
    }
}
