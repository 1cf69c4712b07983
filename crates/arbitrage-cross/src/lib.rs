//! Hedged dual-venue execution for sports prediction markets.
//!
//! This crate takes a detected price discrepancy between Polymarket (venue A)
//! and Kalshi (venue B) for the same game and team, buys complementary tokens
//! on both, and carries the position until its P&L is final.
//!
//! # Overview
//!
//! ```text
//! Polymarket: LAL YES ask 45c
//! Kalshi:     LAL NO  ask 50c   (100 - 50c YES bid)
//!
//! Combined cost:      95c
//! Guaranteed payout: 100c
//! Locked spread:       5c per contract (before fees)
//! ```
//!
//! Venue A is unreliable (fill-or-kill, may not fill), so it is always placed
//! first; venue B is placed only for what venue A actually filled. A venue B
//! shortfall leaves directional exposure that the resolver either unwinds or
//! holds to settlement.
//!
//! # Modules
//!
//! - [`executor`]: Execution engine and trade state machine
//! - [`resolver`]: Unwind/hold decisions for open positions
//! - [`reconciler`]: Settlement P&L and venue cross-checks
//! - [`recovery`]: Startup recovery of interrupted executions
//! - [`ledger`]: Durable JSON Lines trade ledger
//! - [`pnl`]: Settlement formulas and the unwind P&L cascade
//! - [`trade`]: The trade record and its invariants
//! - [`sizing`], [`fees`], [`risk`]: Depth-aware sizing, fee model, circuit breaker
//! - [`paper`], [`mapping`]: In-memory venues and static market mappings
//!
//! # Example
//!
//! ```ignore
//! use sportsarb_cross::{ExecutionEngine, TradeLedger, SessionStore, CircuitBreaker, VenuePair};
//!
//! let ledger = Arc::new(TradeLedger::open("data/trades.jsonl")?);
//! let engine = ExecutionEngine::new(venues, mapping, ledger, store, breaker, &config)
//!     .with_quote_source(quotes)
//!     .with_resolver(resolver);
//!
//! let report = engine.execute(&opportunity).await?;
//! println!("{}: {:?}", report.trade.trade_id, report.outcome);
//! ```
//!
//! # Safety
//!
//! **CRITICAL**: venue B is never placed unless venue A's fill is confirmed,
//! and a leg whose outcome cannot be confirmed is never read as "no fill".
//! Such trades stay executing until [`Recovery`] resolves them from venue state.

pub mod executor;
pub mod fees;
pub mod ledger;
pub mod legs;
pub mod mapping;
pub mod paper;
pub mod pnl;
pub mod reconciler;
pub mod recovery;
pub mod resolver;
pub mod risk;
pub mod sizing;
pub mod store;
pub mod trade;
pub mod types;

pub use executor::{EngineError, ExecutionEngine, ExecutionOutcome, ExecutionReport};
pub use fees::FeeCalculator;
pub use ledger::{LedgerEntry, LedgerError, Position, TradeLedger, Writer};
pub use legs::LegResult;
pub use mapping::StaticMappingService;
pub use paper::{FillBehavior, PaperQuoteBook, PaperVenue};
pub use pnl::{PnlCalculator, PnlIssue, PnlStrategy, ReportedPrices, SettlementCalc};
pub use reconciler::{Drift, IntegrityIssue, IntegrityKind, ReconcileReport, Reconciler, ReconcilerError};
pub use recovery::{Recovery, RecoveryReport};
pub use resolver::{
    Decision, Evaluation, ResolveOutcome, ResolveScope, Resolver, ResolverError, ResolverReport,
    SkipCause,
};
pub use risk::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerState, ExecutionResult, ExecutionTally, HaltReason,
};
pub use sizing::{size_trade, SizeLimit, SizingDecision};
pub use store::SessionStore;
pub use trade::{
    formula_for, FormulaClass, InvariantViolation, LegFees, LegId, Phase, SkipReason, Tier, Trade,
    TradeStatus, UnwindRecord, NO_EXPOSURE_SOURCE,
};
pub use types::{HedgePlan, PlannedLeg, VenuePair};
