//! Leg planning and shared handles for dual-venue execution.
//!
//! Every leg buys a token; a leg's price is the cost of the token it buys.
//! Venue A buys the team (or its NO token, when short); venue B buys whichever
//! token pays out in the opposite case, on the team's own market or, for an
//! opposite-market hedge, on the opponent's.

use std::sync::Arc;

use rust_decimal::Decimal;
use sportsarb_core::{
    Instrument, Opportunity, Outcome, PriceLevel, Quote, Venue, VenueAdapter,
    CONTRACT_PAYOUT_CENTS,
};

use crate::trade::LegId;

// =============================================================================
// Venue Handles
// =============================================================================

/// The two venue adapters, in placement order.
#[derive(Clone)]
pub struct VenuePair {
    /// Venue A, placed first (fill-or-kill).
    pub a: Arc<dyn VenueAdapter>,
    /// Venue B, placed second (immediate-or-cancel).
    pub b: Arc<dyn VenueAdapter>,
}

impl VenuePair {
    /// Creates a venue pair.
    pub fn new(a: Arc<dyn VenueAdapter>, b: Arc<dyn VenueAdapter>) -> Self {
        Self { a, b }
    }

    /// Returns the adapter for a leg.
    #[must_use]
    pub fn leg(&self, leg: LegId) -> &dyn VenueAdapter {
        match leg {
            LegId::A => self.a.as_ref(),
            LegId::B => self.b.as_ref(),
        }
    }
}

impl std::fmt::Debug for VenuePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenuePair")
            .field("a", &self.a.venue())
            .field("b", &self.b.venue())
            .finish()
    }
}

// =============================================================================
// Leg Plan
// =============================================================================

/// One planned leg of a hedge.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLeg {
    /// Venue the leg trades on.
    pub venue: Venue,
    /// Token bought.
    pub instrument: Instrument,
    /// Cost of the token in cents.
    pub price_cents: Decimal,
    /// Depth available to buy the token, priced as its cost.
    pub depth: Option<Vec<PriceLevel>>,
}

/// Both legs of a hedge, derived from an opportunity's direction.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgePlan {
    pub leg_a: PlannedLeg,
    pub leg_b: PlannedLeg,
}

impl HedgePlan {
    /// Derives the legs from the opportunity's own quotes.
    #[must_use]
    pub fn from_opportunity(opp: &Opportunity) -> Self {
        Self::from_quotes(opp, &opp.venue_a_quote(), &opp.venue_b_quote())
    }

    /// Derives the legs from explicit quotes, keeping the opportunity's markets.
    ///
    /// Missing quote sides price the leg at 100c, which no spread check accepts.
    #[must_use]
    pub fn from_quotes(opp: &Opportunity, quote_a: &Quote, quote_b: &Quote) -> Self {
        let outcome_a = if opp.direction.venue_a_is_short() {
            Outcome::No
        } else {
            Outcome::Yes
        };
        // Venue B must pay out exactly when venue A does not.
        let outcome_b = if opp.venue_b_is_opponent {
            outcome_a
        } else {
            outcome_a.opposite()
        };

        let leg_a = PlannedLeg {
            venue: Venue::Polymarket,
            instrument: Instrument::new(opp.venue_a_market.clone(), outcome_a),
            price_cents: quote_a
                .entry_price(outcome_a)
                .unwrap_or(CONTRACT_PAYOUT_CENTS),
            depth: opp.venue_a_depth.clone(),
        };
        let leg_b = PlannedLeg {
            venue: Venue::Kalshi,
            instrument: Instrument::new(opp.venue_b_market.clone(), outcome_b),
            price_cents: quote_b
                .entry_price(outcome_b)
                .unwrap_or(CONTRACT_PAYOUT_CENTS),
            depth: opp.venue_b_depth.clone(),
        };
        Self { leg_a, leg_b }
    }

    /// Sum of both leg prices in cents.
    #[must_use]
    pub fn combined_cost_cents(&self) -> Decimal {
        self.leg_a.price_cents + self.leg_b.price_cents
    }

    /// Locked spread in cents (`100 - combined_cost`).
    #[must_use]
    pub fn spread_cents(&self) -> Decimal {
        CONTRACT_PAYOUT_CENTS - self.combined_cost_cents()
    }
}
