//! Depth-aware trade sizing.
//!
//! ```text
//! size = min(requested,
//!            depth_A within max_price_impact,
//!            depth_B within max_price_impact,
//!            max_contracts_per_trade,
//!            floor(max_cost_per_trade / combined_cost))
//! ```
//!
//! A leg without depth information contributes the conservative fallback size.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sportsarb_core::{PriceLevel, SizingConfig, CONTRACT_PAYOUT_CENTS};

use crate::types::HedgePlan;

/// Which bound decided the trade size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeLimit {
    Requested,
    VenueADepth,
    VenueBDepth,
    MissingDepth,
    MaxContracts,
    MaxCost,
}

/// Result of sizing a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingDecision {
    pub contracts: u32,
    pub limited_by: SizeLimit,
}

/// Sums the contracts priced no worse than `best + max_impact`.
///
/// Levels are priced as the cost of the token bought, so "worse" means higher.
#[must_use]
pub fn depth_within_impact(levels: &[PriceLevel], best_price: Decimal, max_impact: Decimal) -> u32 {
    let limit = best_price + max_impact;
    levels
        .iter()
        .filter(|level| level.price_cents <= limit)
        .map(|level| level.contracts)
        .fold(0u32, u32::saturating_add)
}

/// Sizes a hedge.
#[must_use]
pub fn size_trade(requested: u32, plan: &HedgePlan, config: &SizingConfig) -> SizingDecision {
    let mut decision = SizingDecision {
        contracts: requested,
        limited_by: SizeLimit::Requested,
    };
    let mut cap = |bound: u32, reason: SizeLimit| {
        if bound < decision.contracts {
            decision.contracts = bound;
            decision.limited_by = reason;
        }
    };

    match (&plan.leg_a.depth, &plan.leg_b.depth) {
        (Some(a), Some(b)) => {
            let impact = config.max_price_impact_cents;
            cap(
                depth_within_impact(a, plan.leg_a.price_cents, impact),
                SizeLimit::VenueADepth,
            );
            cap(
                depth_within_impact(b, plan.leg_b.price_cents, impact),
                SizeLimit::VenueBDepth,
            );
        }
        _ => cap(config.fallback_contracts, SizeLimit::MissingDepth),
    }

    cap(config.max_contracts_per_trade, SizeLimit::MaxContracts);

    let combined = plan.combined_cost_cents();
    if combined > Decimal::ZERO {
        let affordable = (config.max_cost_per_trade * CONTRACT_PAYOUT_CENTS / combined)
            .floor()
            .to_u32()
            .unwrap_or(u32::MAX);
        cap(affordable, SizeLimit::MaxCost);
    }

    decision
}
