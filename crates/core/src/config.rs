use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::LimitError;
use crate::types::OrderRequest;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub engine: EngineConfig,
    pub sizing: SizingConfig,
    pub limits: HardLimits,
    pub fees: FeeConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub resolver: ResolverConfig,
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    /// Creates a conservative configuration for first live sessions.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            engine: EngineConfig::conservative(),
            sizing: SizingConfig::conservative(),
            limits: HardLimits::conservative(),
            circuit_breaker: CircuitBreakerConfig::conservative(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path of the append-only JSON Lines trade ledger.
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/trades.jsonl"),
        }
    }
}

// =============================================================================
// Execution Engine
// =============================================================================

/// Configuration for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum locked spread, in cents, required to trade.
    pub min_spread_cents: Decimal,

    /// Spreads at or above this many cents imply a stale or empty book.
    pub phantom_spread_cents: Decimal,

    /// Quotes older than this are not traded on.
    #[serde(with = "serde_millis")]
    pub max_quote_age: Duration,

    /// Re-read both venues from the live quote source before trading.
    pub requote: bool,

    /// Deadline for the venue A order to reach a terminal state.
    #[serde(with = "serde_millis")]
    pub venue_a_timeout: Duration,

    /// Deadline for the venue B order to reach a terminal state.
    #[serde(with = "serde_millis")]
    pub venue_b_timeout: Duration,

    /// Interval between order status polls.
    #[serde(with = "serde_millis")]
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_spread_cents: dec!(1),
            phantom_spread_cents: dec!(90),
            max_quote_age: Duration::from_secs(5),
            requote: true,
            venue_a_timeout: Duration::from_secs(10),
            venue_b_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    /// Creates a conservative configuration for initial testing.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            min_spread_cents: dec!(3),
            phantom_spread_cents: dec!(40),
            max_quote_age: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Sets the minimum spread.
    #[must_use]
    pub fn with_min_spread_cents(mut self, cents: Decimal) -> Self {
        self.min_spread_cents = cents;
        self
    }

    /// Sets both leg timeouts and the poll interval.
    #[must_use]
    pub fn with_timeouts(mut self, leg_timeout: Duration, poll_interval: Duration) -> Self {
        self.venue_a_timeout = leg_timeout;
        self.venue_b_timeout = leg_timeout;
        self.poll_interval = poll_interval;
        self
    }
}

/// Configuration for depth-aware sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Hard cap on contracts per trade.
    pub max_contracts_per_trade: u32,

    /// Hard cap on combined cost per trade, in dollars.
    pub max_cost_per_trade: Decimal,

    /// Only count book depth within this many cents of the best price.
    pub max_price_impact_cents: Decimal,

    /// Size used when a leg has no depth information.
    pub fallback_contracts: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_contracts_per_trade: 100,
            max_cost_per_trade: dec!(50),
            max_price_impact_cents: dec!(2),
            fallback_contracts: 1,
        }
    }
}

impl SizingConfig {
    /// Creates a conservative configuration for initial testing.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_contracts_per_trade: 20,
            max_cost_per_trade: dec!(10),
            max_price_impact_cents: dec!(1),
            fallback_contracts: 1,
        }
    }

    /// Sets the per-trade contract cap.
    #[must_use]
    pub fn with_max_contracts(mut self, contracts: u32) -> Self {
        self.max_contracts_per_trade = contracts;
        self
    }

    /// Sets the per-trade cost cap in dollars.
    #[must_use]
    pub fn with_max_cost(mut self, dollars: Decimal) -> Self {
        self.max_cost_per_trade = dollars;
        self
    }
}

// =============================================================================
// Hard Limits
// =============================================================================

/// Hard limits applied to every order before submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardLimits {
    /// Maximum order size in contracts.
    pub max_order_contracts: u32,

    /// Minimum order size in contracts.
    pub min_order_contracts: u32,

    /// Maximum price in cents.
    pub max_price_cents: Decimal,

    /// Minimum price in cents.
    pub min_price_cents: Decimal,

    /// Maximum single order value in dollars.
    pub max_order_value: Decimal,
}

impl Default for HardLimits {
    fn default() -> Self {
        Self {
            max_order_contracts: 1000,
            min_order_contracts: 1,
            max_price_cents: dec!(99),
            min_price_cents: dec!(1),
            max_order_value: dec!(500),
        }
    }
}

impl HardLimits {
    /// Creates conservative hard limits for initial testing.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_order_contracts: 100,
            min_order_contracts: 1,
            max_price_cents: dec!(95),
            min_price_cents: dec!(5),
            max_order_value: dec!(100),
        }
    }

    /// Validates an order against these limits.
    ///
    /// # Errors
    /// Returns the first limit the order violates.
    pub fn validate_order(&self, order: &OrderRequest) -> Result<(), LimitError> {
        if order.contracts < self.min_order_contracts {
            return Err(LimitError::ContractsBelowMinimum {
                contracts: order.contracts,
                min: self.min_order_contracts,
            });
        }
        if order.contracts > self.max_order_contracts {
            return Err(LimitError::ContractsAboveMaximum {
                contracts: order.contracts,
                max: self.max_order_contracts,
            });
        }
        if order.price_cents < self.min_price_cents || order.price_cents > self.max_price_cents {
            return Err(LimitError::PriceOutOfBand {
                price_cents: order.price_cents,
                min: self.min_price_cents,
                max: self.max_price_cents,
            });
        }
        let value = order.notional();
        if value > self.max_order_value {
            return Err(LimitError::OrderValueExceeded {
                value,
                max: self.max_order_value,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Fees
// =============================================================================

/// Fee schedule for both venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Flat venue A fee per contract, in cents.
    pub venue_a_per_contract_cents: Decimal,

    /// Venue B taker rate applied to `C * P * (1 - P)`.
    pub venue_b_taker_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            venue_a_per_contract_cents: Decimal::ZERO,
            venue_b_taker_rate: dec!(0.07),
        }
    }
}

impl FeeConfig {
    /// A schedule with no fees on either venue.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            venue_a_per_contract_cents: Decimal::ZERO,
            venue_b_taker_rate: Decimal::ZERO,
        }
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed executions before pausing.
    pub max_consecutive_failures: u32,

    /// Daily loss in dollars before tripping.
    pub max_daily_loss: Decimal,

    /// Pause duration after too many failures.
    #[serde(with = "serde_secs")]
    pub pause_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            max_daily_loss: dec!(100),
            pause_duration: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a conservative configuration.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_consecutive_failures: 2,
            max_daily_loss: dec!(25),
            pause_duration: Duration::from_secs(600),
        }
    }
}

// =============================================================================
// Resolver and Reconciler
// =============================================================================

/// Configuration for the unwind/hold resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Interval between resolver passes.
    #[serde(with = "serde_secs")]
    pub poll_interval: Duration,

    /// Quotes older than this are ignored.
    #[serde(with = "serde_millis")]
    pub max_quote_age: Duration,

    /// Per-contract profit, in cents, a directional residual must beat to unwind.
    pub directional_take_profit_cents: Decimal,

    /// Deadline for each unwind order.
    #[serde(with = "serde_millis")]
    pub order_timeout: Duration,

    /// Interval between unwind order status polls.
    #[serde(with = "serde_millis")]
    pub order_poll_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_quote_age: Duration::from_secs(10),
            directional_take_profit_cents: Decimal::ZERO,
            order_timeout: Duration::from_secs(10),
            order_poll_interval: Duration::from_millis(250),
        }
    }
}

/// Configuration for the settlement reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Interval between reconciliation passes.
    #[serde(with = "serde_secs")]
    pub poll_interval: Duration,

    /// Allowed difference, in dollars, between ledger and venue P&L.
    pub drift_tolerance: Decimal,

    /// How far before the oldest unsettled trade to request fills.
    #[serde(with = "serde_secs")]
    pub fills_lookback: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            drift_tolerance: dec!(0.02),
            fills_lookback: Duration::from_secs(3600),
        }
    }
}

/// Serializes a [`Duration`] as whole seconds.
pub mod serde_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
pub mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Durations in config never approach u64::MAX milliseconds.
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Instrument, Outcome};

    fn order(price: Decimal, contracts: u32) -> OrderRequest {
        OrderRequest::buy_fok("t-A", Instrument::new("MKT", Outcome::Yes), price, contracts)
    }

    // ==================== Defaults Tests ====================

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.min_spread_cents, dec!(1));
        assert_eq!(config.phantom_spread_cents, dec!(90));
        assert!(config.requote);
    }

    #[test]
    fn test_conservative_is_tighter() {
        let default = AppConfig::default();
        let conservative = AppConfig::conservative();
        assert!(conservative.sizing.max_contracts_per_trade < default.sizing.max_contracts_per_trade);
        assert!(conservative.engine.min_spread_cents > default.engine.min_spread_cents);
        assert!(conservative.limits.max_order_value < default.limits.max_order_value);
    }

    #[test]
    fn test_fee_defaults() {
        let fees = FeeConfig::default();
        assert_eq!(fees.venue_b_taker_rate, dec!(0.07));
        assert_eq!(fees.venue_a_per_contract_cents, Decimal::ZERO);
    }

    // ==================== Hard Limits Tests ====================

    #[test]
    fn test_limits_accept_valid_order() {
        assert!(HardLimits::default().validate_order(&order(dec!(45), 10)).is_ok());
    }

    #[test]
    fn test_limits_reject_oversize() {
        let limits = HardLimits::conservative();
        let err = limits.validate_order(&order(dec!(45), 101)).unwrap_err();
        assert!(matches!(err, LimitError::ContractsAboveMaximum { .. }));
    }

    #[test]
    fn test_limits_reject_price_band() {
        let limits = HardLimits::conservative();
        let err = limits.validate_order(&order(dec!(97), 1)).unwrap_err();
        assert!(matches!(err, LimitError::PriceOutOfBand { .. }));
    }

    #[test]
    fn test_limits_reject_order_value() {
        let limits = HardLimits {
            max_order_value: dec!(20),
            ..HardLimits::conservative()
        };
        let err = limits.validate_order(&order(dec!(50), 50)).unwrap_err();
        assert!(matches!(err, LimitError::OrderValueExceeded { .. }));
    }

    #[test]
    fn test_limits_reject_zero_contracts() {
        let err = HardLimits::default().validate_order(&order(dec!(50), 0)).unwrap_err();
        assert!(matches!(err, LimitError::ContractsBelowMinimum { .. }));
    }

    // ==================== Serde Tests ====================

    #[test]
    fn test_durations_roundtrip_as_numbers() {
        let config = EngineConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["max_quote_age"], 5000);
        assert_eq!(json["poll_interval"], 250);

        let cb = serde_json::to_value(CircuitBreakerConfig::default()).unwrap();
        assert_eq!(cb["pause_duration"], 300);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"engine":{"min_spread_cents":"2"}}"#).unwrap();
        assert_eq!(config.engine.min_spread_cents, dec!(2));
        assert_eq!(config.engine.phantom_spread_cents, dec!(90));
        assert_eq!(config.reconciler.drift_tolerance, dec!(0.02));
    }
}
