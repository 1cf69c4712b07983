//! Settlement reconciliation.
//!
//! Assigns the final P&L to every open trade once it can be computed, then
//! cross-checks the result against venue cash flows.
//!
//! # Overview
//!
//! Each pass:
//! 1. Skips settled trades and counts executing ones as pending
//! 2. Looks up the team's market result for trades still holding contracts
//! 3. Computes P&L through [`PnlCalculator`] and writes it once
//! 4. Compares newly settled P&L against venue fills and reports drift
//!
//! Drift is never applied automatically; [`Reconciler::apply_corrections`] is
//! the explicit, audited step.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sportsarb_core::{Fill, MarketResult, ReconcilerConfig};

use crate::ledger::{LedgerError, TradeLedger};
use crate::pnl::{PnlCalculator, PnlIssue, PnlStrategy, ReportedPrices};
use crate::trade::{LegId, Phase, Trade};
use crate::types::VenuePair;

// =============================================================================
// Report Types
// =============================================================================

/// Category of a data-integrity problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityKind {
    InvalidTier,
    IncompleteUnwind,
    MissingUnwindData,
    MissingFillPrice,
    MissingResult,
    ResultDisagreement,
    VerificationMismatch,
}

impl From<&PnlIssue> for IntegrityKind {
    fn from(issue: &PnlIssue) -> Self {
        match issue {
            PnlIssue::InvalidTier { .. } => Self::InvalidTier,
            PnlIssue::IncompleteUnwind { .. } => Self::IncompleteUnwind,
            PnlIssue::MissingUnwindData => Self::MissingUnwindData,
            PnlIssue::MissingFillPrice(_) => Self::MissingFillPrice,
            PnlIssue::AwaitingResult => Self::MissingResult,
        }
    }
}

/// A trade that cannot be settled without intervention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityIssue {
    pub trade_id: String,
    pub kind: IntegrityKind,
    pub detail: String,
}

/// Disagreement between ledger P&L and venue cash flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drift {
    pub trade_id: String,
    pub ledger_pnl: Decimal,
    pub venue_pnl: Decimal,
    pub difference: Decimal,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Trades settled by this pass.
    pub settled: Vec<String>,
    /// Trades not yet settleable (executing, or awaiting a market result).
    pub pending: usize,
    pub flagged: Vec<IntegrityIssue>,
    pub drifts: Vec<Drift>,
}

impl ReconcileReport {
    /// Returns true if nothing needs attention.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty() && self.drifts.is_empty()
    }
}

/// Errors from the reconciler.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Team market result as seen across both venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeamResult {
    Resolved(MarketResult),
    Unresolved,
    Disagreement { venue_a: MarketResult, venue_b: MarketResult },
}

// =============================================================================
// Reconciler
// =============================================================================

/// Settlement reconciler over the trade ledger.
pub struct Reconciler {
    venues: VenuePair,
    ledger: Arc<TradeLedger>,
    pnl: PnlCalculator,
    config: ReconcilerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("venues", &self.venues)
            .field("pnl", &self.pnl)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(venues: VenuePair, ledger: Arc<TradeLedger>, config: ReconcilerConfig) -> Self {
        Self {
            venues,
            ledger,
            pnl: PnlCalculator::default(),
            config,
        }
    }

    /// Replaces the unwind P&L cascade.
    #[must_use]
    pub fn with_cascade(mut self, cascade: Vec<PnlStrategy>) -> Self {
        self.pnl = PnlCalculator::new(cascade);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Settles every open trade whose P&L can be computed.
    ///
    /// # Errors
    /// Returns an error only if the ledger refuses a write.
    pub async fn run_once(&self) -> Result<ReconcileReport, ReconcilerError> {
        let mut report = ReconcileReport::default();
        let trades = self.ledger.snapshot();
        let fills = self
            .fills_covering(trades.iter().filter(|t| t.phase() == Phase::Open))
            .await;

        for trade in trades {
            match trade.phase() {
                Phase::Settled => continue,
                Phase::Executing => {
                    report.pending += 1;
                    continue;
                }
                Phase::Open => {}
            }

            let held = trade.held(LegId::A) + trade.held(LegId::B) > 0;
            let result = if held {
                match self.team_result(&trade).await {
                    TeamResult::Resolved(result) => Some(result),
                    TeamResult::Unresolved => {
                        report.pending += 1;
                        continue;
                    }
                    TeamResult::Disagreement { venue_a, venue_b } => {
                        let issue = IntegrityIssue {
                            trade_id: trade.trade_id.clone(),
                            kind: IntegrityKind::ResultDisagreement,
                            detail: format!("venue A reports {venue_a}, venue B reports {venue_b}"),
                        };
                        error!(trade_id = %trade.trade_id, detail = %issue.detail, "Settlement results disagree");
                        report.flagged.push(issue);
                        continue;
                    }
                }
            } else {
                None
            };

            let reported = fills
                .as_deref()
                .map(|f| ReportedPrices::from_fills(&trade, f))
                .unwrap_or_default();
            let team_won = result.map(|r| r == MarketResult::Yes);
            match self.pnl.settle(&trade, team_won, &reported) {
                Ok(calc) => {
                    let stored = match self.ledger.record_settlement(
                        &trade.trade_id,
                        trade.updated_at,
                        calc.pnl,
                        &calc.source,
                        result.map(|r| r.as_str().to_string()),
                    ) {
                        Ok(stored) => stored,
                        Err(LedgerError::Stale { .. }) => {
                            debug!(trade_id = %trade.trade_id, "Trade changed while settling, retrying next pass");
                            report.pending += 1;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    info!(
                        trade_id = %stored.trade_id,
                        status = %stored.status,
                        tier = ?stored.tier,
                        pnl = %calc.pnl,
                        source = %calc.source,
                        "Trade settled"
                    );
                    if let Some(fills) = fills.as_deref() {
                        if let Some(drift) = self.cross_check(&stored, fills, result) {
                            report.drifts.push(drift);
                        }
                    }
                    report.settled.push(stored.trade_id);
                }
                Err(issue) if issue.is_pending() => report.pending += 1,
                Err(issue) => {
                    error!(trade_id = %trade.trade_id, issue = %issue, "Trade cannot be settled");
                    report.flagged.push(IntegrityIssue {
                        trade_id: trade.trade_id.clone(),
                        kind: IntegrityKind::from(&issue),
                        detail: issue.to_string(),
                    });
                }
            }
        }

        if !report.settled.is_empty() || !report.is_clean() {
            info!(
                settled = report.settled.len(),
                pending = report.pending,
                flagged = report.flagged.len(),
                drifts = report.drifts.len(),
                "Reconciliation pass complete"
            );
        }
        Ok(report)
    }

    /// Recomputes every settled trade and reports mismatches and drift.
    ///
    /// Never writes. Trades with audited corrections are compared against
    /// venue cash flow only.
    pub async fn verify(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let trades = self.ledger.snapshot();
        let fills = self
            .fills_covering(trades.iter().filter(|t| t.settlement_pnl.is_some()))
            .await;

        for trade in trades {
            let Some(ledger_pnl) = trade.settlement_pnl else {
                continue;
            };
            if trade.status.is_abort_clean() {
                continue;
            }

            let held = trade.held(LegId::A) + trade.held(LegId::B) > 0;
            let result = if held {
                match self.team_result(&trade).await {
                    TeamResult::Resolved(result) => Some(result),
                    _ => {
                        report.pending += 1;
                        continue;
                    }
                }
            } else {
                None
            };

            if trade.corrections.is_empty() {
                let reported = fills
                    .as_deref()
                    .map(|f| ReportedPrices::from_fills(&trade, f))
                    .unwrap_or_default();
                match self.pnl.settle(&trade, result.map(|r| r == MarketResult::Yes), &reported) {
                    Ok(calc) if calc.pnl != ledger_pnl => {
                        warn!(
                            trade_id = %trade.trade_id,
                            ledger_pnl = %ledger_pnl,
                            recomputed = %calc.pnl,
                            "Settled P&L does not match recomputation"
                        );
                        report.flagged.push(IntegrityIssue {
                            trade_id: trade.trade_id.clone(),
                            kind: IntegrityKind::VerificationMismatch,
                            detail: format!("ledger {ledger_pnl}, recomputed {}", calc.pnl),
                        });
                    }
                    Ok(_) => {}
                    Err(issue) => report.flagged.push(IntegrityIssue {
                        trade_id: trade.trade_id.clone(),
                        kind: IntegrityKind::from(&issue),
                        detail: issue.to_string(),
                    }),
                }
            }

            if let Some(fills) = fills.as_deref() {
                if let Some(drift) = self.cross_check(&trade, fills, result) {
                    report.drifts.push(drift);
                }
            }
        }
        report
    }

    /// Overwrites settled P&L with venue-derived values, keeping an audit entry per trade.
    ///
    /// # Errors
    /// Returns an error if the ledger refuses a correction.
    pub fn apply_corrections(&self, drifts: &[Drift], reason: &str) -> Result<usize, ReconcilerError> {
        let mut applied = 0;
        for drift in drifts {
            let trade = self.ledger.apply_correction(&drift.trade_id, drift.venue_pnl, reason)?;
            warn!(
                trade_id = %trade.trade_id,
                previous = %drift.ledger_pnl,
                corrected = %drift.venue_pnl,
                reason = %reason,
                "Settlement corrected"
            );
            applied += 1;
        }
        Ok(applied)
    }

    /// Resolves the team's market, preferring venue B and checking venue A when both answer.
    async fn team_result(&self, trade: &Trade) -> TeamResult {
        let from_b = self
            .venues
            .b
            .get_settlement(&trade.venue_b_market)
            .await
            .result()
            .map(|r| {
                if trade.venue_b_opposite_market {
                    r.inverted()
                } else {
                    r
                }
            });
        let from_a = self
            .venues
            .a
            .get_settlement(&trade.venue_a_market)
            .await
            .result();

        match (from_a, from_b) {
            (Some(a), Some(b)) if a != b => TeamResult::Disagreement {
                venue_a: a,
                venue_b: b,
            },
            (_, Some(result)) | (Some(result), None) => TeamResult::Resolved(result),
            (None, None) => TeamResult::Unresolved,
        }
    }

    /// Fills from both venues since `fills_lookback` before the oldest of `trades`.
    ///
    /// Returns `None` if there is nothing to cover or either venue cannot answer.
    async fn fills_covering<'a>(&self, trades: impl Iterator<Item = &'a Trade>) -> Option<Vec<Fill>> {
        let oldest = trades.map(|t| t.timestamp).min()?;
        let lookback = chrono::Duration::from_std(self.config.fills_lookback).unwrap_or(chrono::Duration::zero());
        let since = oldest - lookback;
        let mut fills = Vec::new();
        for venue in [&self.venues.a, &self.venues.b] {
            match venue.get_fills(since).await {
                Ok(mut venue_fills) => fills.append(&mut venue_fills),
                Err(e) => {
                    warn!(venue = %venue.venue(), error = %e, "Fill history unavailable, skipping cross-check");
                    return None;
                }
            }
        }
        Some(fills)
    }

    /// Compares ledger P&L with venue cash flow for a settled trade.
    ///
    /// Only trades whose every recorded order is fully covered by venue fills
    /// are compared; anything less would report missing history as drift.
    fn cross_check(&self, trade: &Trade, fills: &[Fill], result: Option<MarketResult>) -> Option<Drift> {
        let ledger_pnl = trade.settlement_pnl?;
        let Some(matched) = matched_fills(trade, fills) else {
            debug!(trade_id = %trade.trade_id, "Venue fills incomplete, skipping cross-check");
            return None;
        };

        let mut venue_pnl: Decimal = matched.iter().map(|f| f.cash_flow()).sum();
        if let Some(result) = result {
            let team_won = result == MarketResult::Yes;
            for leg in [LegId::A, LegId::B] {
                if trade.leg_backs_team(leg) == team_won {
                    venue_pnl += Decimal::from(trade.held(leg));
                }
            }
        }

        let difference = ledger_pnl - venue_pnl;
        if difference.abs() <= self.config.drift_tolerance {
            return None;
        }
        warn!(
            trade_id = %trade.trade_id,
            ledger_pnl = %ledger_pnl,
            venue_pnl = %venue_pnl,
            difference = %difference,
            "Settlement drift detected"
        );
        Some(Drift {
            trade_id: trade.trade_id.clone(),
            ledger_pnl,
            venue_pnl,
            difference,
        })
    }

    /// Runs passes on `poll_interval` until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(poll_secs = self.config.poll_interval.as_secs(), "Reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reconciler stopped");
    }
}

/// Venue fills for every order the trade recorded, or `None` unless each one
/// accounts for exactly the contracts the ledger says it filled.
fn matched_fills<'a>(trade: &Trade, fills: &'a [Fill]) -> Option<Vec<&'a Fill>> {
    let contracts_for = |ticket: &str| -> u32 {
        fills
            .iter()
            .filter(|f| f.order_id == ticket)
            .map(|f| f.contracts)
            .sum()
    };

    let mut tickets: HashSet<&str> = HashSet::new();
    for (ticket, filled) in [
        (trade.venue_a_ticket_ref.as_deref(), trade.contracts_filled),
        (trade.venue_b_ticket_ref.as_deref(), trade.venue_b_contracts_filled),
    ] {
        match ticket {
            Some(ticket) if contracts_for(ticket) == filled => {
                tickets.insert(ticket);
            }
            None if filled == 0 => {}
            _ => return None,
        }
    }

    if let Some(unwind) = &trade.unwind {
        let closed = unwind.venue_a_contracts + unwind.venue_b_contracts;
        let reported: u32 = unwind.ticket_refs.iter().map(|t| contracts_for(t)).sum();
        if reported != closed {
            return None;
        }
        tickets.extend(unwind.ticket_refs.iter().map(String::as_str));
    }

    let matched: Vec<&Fill> = fills
        .iter()
        .filter(|f| tickets.contains(f.order_id.as_str()))
        .collect();
    (!matched.is_empty()).then_some(matched)
}
