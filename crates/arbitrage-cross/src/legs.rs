//! Placing a single leg and confirming what it did.
//!
//! A leg is only ever reported as filled or unfilled after the venue has
//! confirmed it: first by looking the order up by its client id, then by the
//! change in venue position. A timeout or transport error is never read as
//! "no fill"; when neither lookup answers, the leg is [`LegResult::Unknown`].

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use sportsarb_core::{
    Instrument, OrderRequest, OrderSide, OrderStatus, VenueAdapter, VenueError,
};

/// Confirmed outcome of one leg.
#[derive(Debug, Clone, PartialEq)]
pub enum LegResult {
    /// The venue confirmed how many contracts filled.
    Confirmed {
        filled: u32,
        /// Average fill price in cents, when the venue reported one.
        avg_price_cents: Option<Decimal>,
        /// Venue order id, when the order was found.
        order_id: Option<String>,
        /// Fees reported by the venue, in dollars.
        fees: Option<Decimal>,
    },
    /// Neither the order nor the position could be read.
    Unknown { error: String },
}

impl LegResult {
    fn from_status(status: &OrderStatus) -> Self {
        Self::Confirmed {
            filled: status.filled,
            avg_price_cents: status.avg_fill_price_cents,
            order_id: Some(status.order_id.clone()),
            fees: Some(status.fees),
        }
    }

    /// Contracts confirmed filled, or `None` if unknown.
    #[must_use]
    pub fn filled(&self) -> Option<u32> {
        match self {
            Self::Confirmed { filled, .. } => Some(*filled),
            Self::Unknown { .. } => None,
        }
    }
}

/// Places an order and polls until it reaches a terminal state.
///
/// # Errors
/// Returns the first venue error from placement or polling.
pub async fn place_and_wait(
    venue: &dyn VenueAdapter,
    order: &OrderRequest,
    poll_interval: Duration,
) -> Result<OrderStatus, VenueError> {
    let mut status = venue.place_order(order).await?;
    while !status.state.is_terminal() {
        tokio::time::sleep(poll_interval).await;
        status = venue.get_order(&status.order_id).await?;
    }
    Ok(status)
}

/// Places one leg under a deadline and confirms the result.
///
/// `baseline` is the venue position of the order's instrument before placement;
/// without it the position fallback is unavailable.
pub async fn execute_leg(
    venue: &dyn VenueAdapter,
    order: &OrderRequest,
    baseline: Option<i64>,
    timeout: Duration,
    poll_interval: Duration,
) -> LegResult {
    let error = match tokio::time::timeout(timeout, place_and_wait(venue, order, poll_interval)).await {
        Ok(Ok(status)) => return LegResult::from_status(&status),
        Ok(Err(e)) => e.to_string(),
        Err(_) => VenueError::timeout(venue.venue(), "place_order").to_string(),
    };

    warn!(
        venue = %venue.venue(),
        client_order_id = %order.client_order_id,
        error = %error,
        "Leg outcome unconfirmed, querying venue"
    );
    confirm_leg(venue, order, baseline).await
}

/// Looks an order up by client id, cancelling it first if it is still live.
///
/// # Errors
/// Returns the venue error if the lookup itself fails.
pub async fn lookup_order(
    venue: &dyn VenueAdapter,
    client_order_id: &str,
) -> Result<Option<OrderStatus>, VenueError> {
    let Some(mut status) = venue.find_order(client_order_id).await? else {
        return Ok(None);
    };
    if !status.state.is_terminal() {
        if let Err(e) = venue.cancel_order(&status.order_id).await {
            warn!(order_id = %status.order_id, error = %e, "Cancel of live order failed");
        }
        status = venue.get_order(&status.order_id).await?;
    }
    Ok(Some(status))
}

/// Confirms a leg whose placement did not return cleanly.
pub async fn confirm_leg(
    venue: &dyn VenueAdapter,
    order: &OrderRequest,
    baseline: Option<i64>,
) -> LegResult {
    let lookup_error = match lookup_order(venue, &order.client_order_id).await {
        Ok(Some(status)) if status.state.is_terminal() => {
            debug!(
                client_order_id = %order.client_order_id,
                filled = status.filled,
                "Leg confirmed by order lookup"
            );
            return LegResult::from_status(&status);
        }
        Ok(Some(status)) => format!("order {} still live after cancel", status.order_id),
        // A venue that never saw the order still has to show an unchanged position.
        Ok(None) => format!("order {} not found", order.client_order_id),
        Err(e) => e.to_string(),
    };

    match position_delta(venue, order, baseline).await {
        Ok(filled) => confirmed_by_position(order, filled),
        Err(position_error) => LegResult::Unknown {
            error: format!("{lookup_error}; position: {position_error}"),
        },
    }
}

fn confirmed_by_position(order: &OrderRequest, filled: u32) -> LegResult {
    debug!(
        client_order_id = %order.client_order_id,
        filled = filled,
        "Leg confirmed by position delta"
    );
    LegResult::Confirmed {
        filled,
        avg_price_cents: (filled > 0).then_some(order.price_cents),
        order_id: None,
        fees: None,
    }
}

/// Contracts traded by `order`, read from the change in venue position.
async fn position_delta(
    venue: &dyn VenueAdapter,
    order: &OrderRequest,
    baseline: Option<i64>,
) -> Result<u32, String> {
    let baseline = baseline.ok_or_else(|| "no baseline position".to_string())?;
    let current = venue
        .get_position(&order.instrument)
        .await
        .map_err(|e| e.to_string())?;
    let delta = match order.side {
        OrderSide::Buy => current - baseline,
        OrderSide::Sell => baseline - current,
    };
    let delta = u32::try_from(delta.max(0)).unwrap_or(u32::MAX);
    Ok(delta.min(order.contracts))
}

/// Reads the venue position of an instrument, logging instead of failing.
pub async fn baseline_position(venue: &dyn VenueAdapter, instrument: &Instrument) -> Option<i64> {
    match venue.get_position(instrument).await {
        Ok(position) => Some(position),
        Err(e) => {
            warn!(
                venue = %venue.venue(),
                instrument = %instrument,
                error = %e,
                "Baseline position unavailable"
            );
            None
        }
    }
}
