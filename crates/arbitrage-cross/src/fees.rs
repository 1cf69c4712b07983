//! Fee calculations for both venues.
//!
//! Venue B (Kalshi) charges a convex fee that peaks at 50c:
//!
//! ```text
//! fee = ceil_to_cent(rate * C * P * (1 - P))     P in dollars
//! ```
//!
//! Venue A (Polymarket) charges a flat per-contract fee, zero by default.
//! All fees returned here are in dollars.

use rust_decimal::{Decimal, RoundingStrategy};

use sportsarb_core::{FeeConfig, Venue, CONTRACT_PAYOUT_CENTS};

// =============================================================================
// Fee Calculator
// =============================================================================

/// Calculator for per-venue trading fees.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    config: FeeConfig,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl FeeCalculator {
    /// Creates a new fee calculator with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FeeConfig::default(),
        }
    }

    /// Creates a new fee calculator with custom configuration.
    #[must_use]
    pub fn with_config(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Calculates the venue B taker fee.
    ///
    /// # Arguments
    /// * `price_cents` - Price of the token traded, in cents
    /// * `contracts` - Number of contracts
    ///
    /// # Returns
    /// Fee in dollars, rounded up to the cent.
    #[must_use]
    pub fn venue_b_fee(&self, price_cents: Decimal, contracts: u32) -> Decimal {
        if contracts == 0 {
            return Decimal::ZERO;
        }
        let p = price_cents / CONTRACT_PAYOUT_CENTS;
        let raw = self.config.venue_b_taker_rate * Decimal::from(contracts) * p * (Decimal::ONE - p);
        raw.round_dp_with_strategy(2, RoundingStrategy::AwayFromZero)
    }

    /// Calculates the venue A fee in dollars.
    #[must_use]
    pub fn venue_a_fee(&self, contracts: u32) -> Decimal {
        self.config.venue_a_per_contract_cents * Decimal::from(contracts) / CONTRACT_PAYOUT_CENTS
    }

    /// Calculates the taker fee for an order on `venue`, in dollars.
    #[must_use]
    pub fn taker_fee(&self, venue: Venue, price_cents: Decimal, contracts: u32) -> Decimal {
        match venue {
            Venue::Polymarket => self.venue_a_fee(contracts),
            Venue::Kalshi => self.venue_b_fee(price_cents, contracts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ==================== Venue B Fee Tests ====================

    #[test]
    fn test_venue_b_fee_at_midpoint() {
        let calc = FeeCalculator::new();
        // 0.07 * 100 * 0.5 * 0.5 = 1.75
        assert_eq!(calc.venue_b_fee(dec!(50), 100), dec!(1.75));
    }

    #[test]
    fn test_venue_b_fee_rounds_up_to_cent() {
        let calc = FeeCalculator::new();
        // 0.07 * 1 * 0.5 * 0.5 = 0.0175 -> 0.02
        assert_eq!(calc.venue_b_fee(dec!(50), 1), dec!(0.02));
        // 0.07 * 10 * 0.45 * 0.55 = 0.17325 -> 0.18
        assert_eq!(calc.venue_b_fee(dec!(45), 10), dec!(0.18));
    }

    #[test]
    fn test_venue_b_fee_is_symmetric() {
        let calc = FeeCalculator::new();
        assert_eq!(
            calc.venue_b_fee(dec!(20), 25),
            calc.venue_b_fee(dec!(80), 25)
        );
    }

    #[test]
    fn test_venue_b_fee_zero_contracts() {
        let calc = FeeCalculator::new();
        assert_eq!(calc.venue_b_fee(dec!(50), 0), Decimal::ZERO);
    }

    // ==================== Venue A Fee Tests ====================

    #[test]
    fn test_venue_a_fee_default_zero() {
        assert_eq!(FeeCalculator::new().venue_a_fee(100), Decimal::ZERO);
    }

    #[test]
    fn test_venue_a_flat_fee() {
        let calc = FeeCalculator::with_config(FeeConfig {
            venue_a_per_contract_cents: dec!(0.5),
            ..FeeConfig::default()
        });
        assert_eq!(calc.venue_a_fee(10), dec!(0.05));
    }

    // ==================== Taker Fee Tests ====================

    #[test]
    fn test_taker_fee_routes_by_venue() {
        let calc = FeeCalculator::with_config(FeeConfig {
            venue_a_per_contract_cents: dec!(0.5),
            ..FeeConfig::default()
        });
        assert_eq!(calc.taker_fee(Venue::Polymarket, dec!(45), 100), dec!(0.5));
        assert_eq!(calc.taker_fee(Venue::Kalshi, dec!(50), 100), dec!(1.75));
    }

    #[test]
    fn test_zero_schedule() {
        let calc = FeeCalculator::with_config(FeeConfig::zero());
        assert_eq!(calc.taker_fee(Venue::Polymarket, dec!(45), 100), Decimal::ZERO);
        assert_eq!(calc.taker_fee(Venue::Kalshi, dec!(50), 100), Decimal::ZERO);
    }
}
