use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{MappingError, VenueError};
use crate::settlement::SettlementLookup;
use crate::types::{Fill, GameMapping, Instrument, OrderRequest, OrderStatus, Quote, Venue};

/// Order routing and account queries for a single venue.
///
/// Implementations must honour `client_order_id` idempotently: placing the same
/// client id twice must not create a second order, and [`VenueAdapter::find_order`]
/// must locate an order by that id after a timeout.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Which venue this adapter talks to.
    fn venue(&self) -> Venue;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderStatus, VenueError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, VenueError>;

    /// Looks an order up by its client id. `Ok(None)` means the venue never saw it.
    async fn find_order(&self, client_order_id: &str) -> Result<Option<OrderStatus>, VenueError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError>;

    /// Net contracts held of the instrument.
    async fn get_position(&self, instrument: &Instrument) -> Result<i64, VenueError>;

    /// Available cash balance in dollars.
    async fn get_balance(&self) -> Result<Decimal, VenueError>;

    async fn get_fills(&self, since: DateTime<Utc>) -> Result<Vec<Fill>, VenueError>;

    async fn get_settlement(&self, market: &str) -> SettlementLookup;
}

/// Authoritative game/team to market mapping, consulted live before every trade.
#[async_trait]
pub trait MappingService: Send + Sync {
    async fn resolve(
        &self,
        sport: &str,
        game_id: &str,
        team: &str,
    ) -> Result<GameMapping, MappingError>;
}

/// Read access to the latest cached quotes.
pub trait QuoteSource: Send + Sync {
    fn quote(&self, venue: Venue, market: &str) -> Option<Quote>;
}
