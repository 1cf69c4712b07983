//! Execution halts for the engine.
//!
//! The engine asks [`CircuitBreaker::check`] before every entry. New entries
//! stop when:
//! - `max_consecutive_failures` executions in a row ended with venue A
//!   contracts not known to be hedged (cooldown of `pause_duration`)
//! - session P&L falls to the daily loss limit (halted until the next day)
//! - the ledger refused a write or an operator halted trading (halted until resumed)
//!
//! Session P&L is the expected P&L of hedged entries plus P&L realized by unwinds.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use sportsarb_core::CircuitBreakerConfig;

/// How an execution ended, as far as the breaker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Both legs filled equally.
    Hedged { expected_pnl: Decimal },
    /// Venue A contracts left without a venue B hedge.
    Unhedged { contracts: u32 },
    /// A leg outcome could not be confirmed.
    Unconfirmed,
}

/// Why trading is halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    DailyLoss,
    LedgerWrite,
    Manual,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DailyLoss => "daily loss limit reached",
            Self::LedgerWrite => "ledger refused a write",
            Self::Manual => "halted by operator",
        };
        write!(f, "{s}")
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,
    /// Waiting out the cooldown after an unhedged streak.
    Cooling,
    Halted(HaltReason),
}

/// Why an entry was refused.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CircuitBreakerError {
    #[error("Trading halted: {0}")]
    Halted(HaltReason),

    #[error("Cooling down after {streak} unhedged executions, {remaining_secs}s remaining")]
    Cooling { streak: u32, remaining_secs: u64 },
}

/// Execution counts for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionTally {
    pub hedged: u32,
    pub unhedged: u32,
    pub unconfirmed: u32,
    /// Venue A contracts left unhedged across the session.
    pub unhedged_contracts: u32,
}

#[derive(Debug, Default)]
struct BreakerInner {
    halted: Option<HaltReason>,
    cooling_until: Option<Instant>,
    streak: u32,
    session_pnl: Decimal,
    tally: ExecutionTally,
}

/// Gate in front of every new entry.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Checks whether a new entry may be placed.
    ///
    /// # Errors
    /// Returns why entries are refused.
    pub fn check(&self) -> Result<(), CircuitBreakerError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.halted {
            return Err(CircuitBreakerError::Halted(reason));
        }
        if let Some(until) = inner.cooling_until {
            let now = Instant::now();
            if now < until {
                return Err(CircuitBreakerError::Cooling {
                    streak: inner.streak,
                    remaining_secs: until.saturating_duration_since(now).as_secs(),
                });
            }
            inner.cooling_until = None;
            inner.streak = 0;
            info!("Cooldown over, entries resumed");
        }
        Ok(())
    }

    /// Records how an execution ended.
    pub fn record_execution(&self, result: ExecutionResult) {
        let mut inner = self.inner.lock();
        match result {
            ExecutionResult::Hedged { expected_pnl } => {
                inner.streak = 0;
                inner.tally.hedged += 1;
                inner.session_pnl += expected_pnl;
            }
            ExecutionResult::Unhedged { contracts } => {
                inner.streak += 1;
                inner.tally.unhedged += 1;
                inner.tally.unhedged_contracts += contracts;
            }
            ExecutionResult::Unconfirmed => {
                inner.streak += 1;
                inner.tally.unconfirmed += 1;
            }
        }

        if inner.streak >= self.config.max_consecutive_failures && inner.cooling_until.is_none() {
            inner.cooling_until = Some(Instant::now() + self.config.pause_duration);
            warn!(
                streak = inner.streak,
                pause_secs = self.config.pause_duration.as_secs(),
                "Unhedged executions in a row, cooling down"
            );
        }
        self.check_loss(&mut inner);
    }

    /// Records P&L realized by an unwind, in dollars.
    pub fn record_realized(&self, pnl: Decimal) {
        let mut inner = self.inner.lock();
        inner.session_pnl += pnl;
        self.check_loss(&mut inner);
    }

    fn check_loss(&self, inner: &mut BreakerInner) {
        if inner.halted.is_none() && -inner.session_pnl >= self.config.max_daily_loss {
            inner.halted = Some(HaltReason::DailyLoss);
            warn!(
                session_pnl = %inner.session_pnl,
                max_loss = %self.config.max_daily_loss,
                "Daily loss limit reached, trading halted"
            );
        }
    }

    /// Stops new entries until [`resume`](Self::resume).
    pub fn halt(&self, reason: HaltReason) {
        self.inner.lock().halted = Some(reason);
        warn!(reason = %reason, "Trading halted");
    }

    /// Lifts a halt and any cooldown. Session P&L is kept, so a daily loss
    /// halt comes straight back on the next recorded loss.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.halted = None;
        inner.cooling_until = None;
        inner.streak = 0;
        info!("Trading resumed");
    }

    /// Starts a new trading day: clears session P&L, counts and any daily loss halt.
    pub fn reset_day(&self) {
        let mut inner = self.inner.lock();
        inner.session_pnl = Decimal::ZERO;
        inner.tally = ExecutionTally::default();
        if inner.halted == Some(HaltReason::DailyLoss) {
            inner.halted = None;
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        match (inner.halted, inner.cooling_until) {
            (Some(reason), _) => CircuitBreakerState::Halted(reason),
            (None, Some(until)) if Instant::now() < until => CircuitBreakerState::Cooling,
            _ => CircuitBreakerState::Closed,
        }
    }

    /// Expected hedged P&L plus realized unwind P&L, in dollars.
    #[must_use]
    pub fn session_pnl(&self) -> Decimal {
        self.inner.lock().session_pnl
    }

    #[must_use]
    pub fn tally(&self) -> ExecutionTally {
        self.inner.lock().tally
    }

    /// Cooldown left, if cooling.
    #[must_use]
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = self.inner.lock().cooling_until?;
        let remaining = until.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_failures: 2,
            max_daily_loss: dec!(10),
            pause_duration: Duration::from_secs(300),
        })
    }

    // ==================== Streak Tests ====================

    #[test]
    fn test_starts_closed() {
        let cb = create_test_breaker();
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_unhedged_streak_cools_down() {
        let cb = create_test_breaker();
        cb.record_execution(ExecutionResult::Unhedged { contracts: 4 });
        assert!(cb.check().is_ok());
        cb.record_execution(ExecutionResult::Unconfirmed);

        assert_eq!(cb.state(), CircuitBreakerState::Cooling);
        assert!(matches!(cb.check(), Err(CircuitBreakerError::Cooling { streak: 2, .. })));
        assert!(cb.cooldown_remaining().is_some());
        let tally = cb.tally();
        assert_eq!(tally.unhedged, 1);
        assert_eq!(tally.unconfirmed, 1);
        assert_eq!(tally.unhedged_contracts, 4);
    }

    #[test]
    fn test_hedged_execution_breaks_streak() {
        let cb = create_test_breaker();
        cb.record_execution(ExecutionResult::Unhedged { contracts: 1 });
        cb.record_execution(ExecutionResult::Hedged { expected_pnl: dec!(0.10) });
        cb.record_execution(ExecutionResult::Unhedged { contracts: 1 });
        assert!(cb.check().is_ok());
        assert_eq!(cb.tally().hedged, 1);
        assert_eq!(cb.session_pnl(), dec!(0.10));
    }

    #[test]
    fn test_cooldown_elapses() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_failures: 1,
            max_daily_loss: dec!(10),
            pause_duration: Duration::ZERO,
        });
        cb.record_execution(ExecutionResult::Unconfirmed);
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
    }

    // ==================== Halt Tests ====================

    #[test]
    fn test_realized_losses_halt() {
        let cb = create_test_breaker();
        cb.record_realized(dec!(-6));
        assert!(cb.check().is_ok());
        cb.record_realized(dec!(-4));
        assert_eq!(cb.state(), CircuitBreakerState::Halted(HaltReason::DailyLoss));
        assert_eq!(cb.check(), Err(CircuitBreakerError::Halted(HaltReason::DailyLoss)));

        cb.reset_day();
        assert!(cb.check().is_ok());
        assert_eq!(cb.session_pnl(), Decimal::ZERO);
    }

    #[test]
    fn test_manual_halt_survives_new_day() {
        let cb = create_test_breaker();
        cb.halt(HaltReason::Manual);
        cb.reset_day();
        assert_eq!(cb.check(), Err(CircuitBreakerError::Halted(HaltReason::Manual)));
        cb.resume();
        assert!(cb.check().is_ok());
    }
}
