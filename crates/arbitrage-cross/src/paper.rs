//! Paper venues for dry runs and tests.
//!
//! [`PaperVenue`] fills orders at their limit price and keeps orders,
//! positions, fills and settlements in memory. Each placement consumes the
//! next scripted [`FillBehavior`] (full fill when the script is empty), which
//! makes it possible to drive every engine branch deterministically,
//! including lost responses and venues that stop answering.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use sportsarb_core::{
    Fill, FeeConfig, Instrument, MarketResult, OrderRequest, OrderSide, OrderState, OrderStatus,
    Quote, QuoteSource, SettlementLookup, SettlementRecord, TimeInForce, Venue, VenueAdapter,
    VenueError, CONTRACT_PAYOUT_CENTS,
};

use crate::fees::FeeCalculator;

/// What the next placement does.
#[derive(Debug, Clone, PartialEq)]
pub enum FillBehavior {
    /// Fill everything at the limit price.
    Full,
    /// Fill at most this many contracts, cancel the rest.
    Partial(u32),
    /// Fill nothing (FOK killed, IOC found no liquidity).
    None,
    /// Reject the placement without recording an order.
    Error(VenueError),
    /// Rest on the book unfilled until cancelled.
    Resting,
    /// Fill everything, then never answer.
    Hang,
    /// Fill everything, then report a network error.
    FillThenError,
    /// Fill exactly this many contracts, even beyond the order size.
    OverFill(u32),
}

#[derive(Debug)]
struct PaperState {
    script: VecDeque<FillBehavior>,
    orders: HashMap<String, OrderStatus>,
    by_client: HashMap<String, String>,
    positions: HashMap<Instrument, i64>,
    fills: Vec<Fill>,
    settlements: HashMap<String, SettlementRecord>,
    balance: Decimal,
    next_id: u64,
}

/// In-memory venue adapter.
#[derive(Debug)]
pub struct PaperVenue {
    venue: Venue,
    fees: FeeCalculator,
    state: Mutex<PaperState>,
    lookups_failing: RwLock<bool>,
    place_calls: AtomicU32,
    total_calls: AtomicU32,
}

impl PaperVenue {
    /// Creates a paper venue with the default fee schedule and a $10,000 balance.
    #[must_use]
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            fees: FeeCalculator::new(),
            state: Mutex::new(PaperState {
                script: VecDeque::new(),
                orders: HashMap::new(),
                by_client: HashMap::new(),
                positions: HashMap::new(),
                fills: Vec::new(),
                settlements: HashMap::new(),
                balance: dec!(10000),
                next_id: 1,
            }),
            lookups_failing: RwLock::new(false),
            place_calls: AtomicU32::new(0),
            total_calls: AtomicU32::new(0),
        }
    }

    /// Sets the fee schedule.
    #[must_use]
    pub fn with_fees(mut self, config: FeeConfig) -> Self {
        self.fees = FeeCalculator::with_config(config);
        self
    }

    /// Sets the starting balance in dollars.
    #[must_use]
    pub fn with_balance(self, balance: Decimal) -> Self {
        self.state.lock().balance = balance;
        self
    }

    /// Queues behaviors for the next placements.
    pub fn script(&self, behaviors: impl IntoIterator<Item = FillBehavior>) {
        self.state.lock().script.extend(behaviors);
    }

    /// Makes every lookup fail with a network error.
    pub fn set_lookups_failing(&self, failing: bool) {
        *self.lookups_failing.write() = failing;
    }

    /// Resolves a market.
    pub fn settle(&self, market: &str, result: MarketResult) {
        self.state
            .lock()
            .settlements
            .insert(market.to_string(), SettlementRecord::new(market, result));
    }

    /// Loads settlement records, replacing any with the same market.
    pub fn load_settlements(&self, records: impl IntoIterator<Item = SettlementRecord>) {
        let mut state = self.state.lock();
        for record in records {
            state.settlements.insert(record.market.clone(), record);
        }
    }

    /// Overrides the held quantity of an instrument.
    pub fn set_position(&self, instrument: Instrument, contracts: i64) {
        self.state.lock().positions.insert(instrument, contracts);
    }

    /// Returns the held quantity without counting as an adapter call.
    #[must_use]
    pub fn position_of(&self, instrument: &Instrument) -> i64 {
        self.state.lock().positions.get(instrument).copied().unwrap_or(0)
    }

    /// Number of `place_order` calls.
    #[must_use]
    pub fn place_calls(&self) -> u32 {
        self.place_calls.load(Ordering::SeqCst)
    }

    /// Number of adapter calls of any kind.
    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Every fill recorded so far.
    #[must_use]
    pub fn recorded_fills(&self) -> Vec<Fill> {
        self.state.lock().fills.clone()
    }

    /// Shifts every recorded fill `by` into the past.
    pub fn age_fills(&self, by: chrono::Duration) {
        for fill in &mut self.state.lock().fills {
            fill.executed_at -= by;
        }
    }

    fn touch(&self) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_lookups(&self, operation: &str) -> Result<(), VenueError> {
        if *self.lookups_failing.read() {
            return Err(VenueError::Network(format!("{} unavailable: {operation}", self.venue)));
        }
        Ok(())
    }

    /// Records an order, filling `contracts` of it at the limit price.
    fn record(&self, state: &mut PaperState, order: &OrderRequest, contracts: u32, resting: bool) -> OrderStatus {
        let order_id = format!("{}-{}", self.venue.leg_label(), state.next_id);
        state.next_id += 1;

        let filled = contracts;
        let fee = self.fees.taker_fee(self.venue, order.price_cents, filled);
        let state_after = if resting {
            OrderState::Open
        } else if filled >= order.contracts {
            OrderState::Filled
        } else {
            OrderState::Cancelled
        };

        if filled > 0 {
            let notional = order.price_cents * Decimal::from(filled) / CONTRACT_PAYOUT_CENTS;
            let signed = i64::from(filled);
            let position = state.positions.entry(order.instrument.clone()).or_insert(0);
            match order.side {
                OrderSide::Buy => {
                    *position += signed;
                    state.balance -= notional + fee;
                }
                OrderSide::Sell => {
                    *position -= signed;
                    state.balance += notional - fee;
                }
            }
            let fill_id = format!("{order_id}-f");
            state.fills.push(Fill {
                fill_id,
                order_id: order_id.clone(),
                instrument: order.instrument.clone(),
                side: order.side,
                contracts: filled,
                price_cents: order.price_cents,
                fee,
                executed_at: Utc::now(),
            });
        }

        let status = OrderStatus {
            order_id: order_id.clone(),
            client_order_id: order.client_order_id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            state: state_after,
            requested: order.contracts,
            filled,
            avg_fill_price_cents: (filled > 0).then_some(order.price_cents),
            fees: fee,
        };
        state.orders.insert(order_id.clone(), status.clone());
        state
            .by_client
            .insert(order.client_order_id.clone(), order_id);

        debug!(
            venue = %self.venue,
            client_order_id = %order.client_order_id,
            filled = filled,
            requested = order.contracts,
            "Paper order recorded"
        );
        status
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderStatus, VenueError> {
        self.touch();
        self.place_calls.fetch_add(1, Ordering::SeqCst);

        let (status, behavior) = {
            let mut state = self.state.lock();
            if let Some(existing) = state
                .by_client
                .get(&order.client_order_id)
                .and_then(|id| state.orders.get(id))
            {
                return Ok(existing.clone());
            }

            let behavior = state.script.pop_front().unwrap_or(FillBehavior::Full);
            if order.side == OrderSide::Buy {
                let required = order.notional();
                if required > state.balance {
                    return Err(VenueError::InsufficientBalance {
                        required,
                        available: state.balance,
                    });
                }
            }

            let status = match &behavior {
                FillBehavior::Error(e) => return Err(e.clone()),
                FillBehavior::Full | FillBehavior::Hang | FillBehavior::FillThenError => {
                    self.record(&mut state, order, order.contracts, false)
                }
                FillBehavior::Partial(n) => {
                    let n = if order.time_in_force == TimeInForce::Fok && *n < order.contracts {
                        0
                    } else {
                        (*n).min(order.contracts)
                    };
                    self.record(&mut state, order, n, false)
                }
                FillBehavior::OverFill(n) => self.record(&mut state, order, *n, false),
                FillBehavior::None => self.record(&mut state, order, 0, false),
                FillBehavior::Resting => self.record(&mut state, order, 0, true),
            };
            (status, behavior)
        };

        match behavior {
            FillBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(status)
            }
            FillBehavior::FillThenError => {
                Err(VenueError::Network("connection reset after submit".to_string()))
            }
            _ => Ok(status),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, VenueError> {
        self.touch();
        self.check_lookups("get_order")?;
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))
    }

    async fn find_order(&self, client_order_id: &str) -> Result<Option<OrderStatus>, VenueError> {
        self.touch();
        self.check_lookups("find_order")?;
        let state = self.state.lock();
        Ok(state
            .by_client
            .get(client_order_id)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        self.touch();
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;
        if !order.state.is_terminal() {
            order.state = OrderState::Cancelled;
        }
        Ok(())
    }

    async fn get_position(&self, instrument: &Instrument) -> Result<i64, VenueError> {
        self.touch();
        self.check_lookups("get_position")?;
        Ok(self.position_of(instrument))
    }

    async fn get_balance(&self) -> Result<Decimal, VenueError> {
        self.touch();
        self.check_lookups("get_balance")?;
        Ok(self.state.lock().balance)
    }

    async fn get_fills(&self, since: DateTime<Utc>) -> Result<Vec<Fill>, VenueError> {
        self.touch();
        self.check_lookups("get_fills")?;
        Ok(self
            .state
            .lock()
            .fills
            .iter()
            .filter(|f| f.executed_at >= since)
            .cloned()
            .collect())
    }

    async fn get_settlement(&self, market: &str) -> SettlementLookup {
        self.touch();
        if let Err(e) = self.check_lookups("get_settlement") {
            return SettlementLookup::LookupFailed(e.to_string());
        }
        match self.state.lock().settlements.get(market) {
            Some(record) if record.result != MarketResult::Open => {
                SettlementLookup::Settled(record.clone())
            }
            _ => SettlementLookup::NotYetSettled,
        }
    }
}

// =============================================================================
// Quote Book
// =============================================================================

/// In-memory quote cache.
#[derive(Debug, Default)]
pub struct PaperQuoteBook {
    quotes: RwLock<HashMap<(Venue, String), Quote>>,
}

impl PaperQuoteBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the latest quote for a market.
    pub fn set(&self, venue: Venue, market: &str, quote: Quote) {
        self.quotes.write().insert((venue, market.to_string()), quote);
    }
}

impl QuoteSource for PaperQuoteBook {
    fn quote(&self, venue: Venue, market: &str) -> Option<Quote> {
        self.quotes.read().get(&(venue, market.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sportsarb_core::Outcome;

    fn create_test_order(client_id: &str, tif: TimeInForce) -> OrderRequest {
        OrderRequest {
            client_order_id: client_id.to_string(),
            instrument: Instrument::new("KX-LAL", Outcome::No),
            side: OrderSide::Buy,
            price_cents: dec!(50),
            contracts: 10,
            time_in_force: tif,
        }
    }

    #[tokio::test]
    async fn test_full_fill_updates_position_and_fills() {
        let venue = PaperVenue::new(Venue::Kalshi);
        let status = venue
            .place_order(&create_test_order("t1-B", TimeInForce::Ioc))
            .await
            .unwrap();

        assert_eq!(status.state, OrderState::Filled);
        assert_eq!(status.filled, 10);
        // 0.07 * 10 * 0.25 = 0.175 -> 0.18
        assert_eq!(status.fees, dec!(0.18));
        assert_eq!(venue.position_of(&Instrument::new("KX-LAL", Outcome::No)), 10);
        assert_eq!(venue.recorded_fills().len(), 1);
    }

    #[tokio::test]
    async fn test_client_id_is_idempotent() {
        let venue = PaperVenue::new(Venue::Polymarket);
        let order = create_test_order("t1-A", TimeInForce::Fok);
        let first = venue.place_order(&order).await.unwrap();
        let second = venue.place_order(&order).await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(venue.position_of(&order.instrument), 10);
    }

    #[tokio::test]
    async fn test_partial_fok_fills_nothing() {
        let venue = PaperVenue::new(Venue::Polymarket);
        venue.script([FillBehavior::Partial(4)]);
        let status = venue
            .place_order(&create_test_order("t1-A", TimeInForce::Fok))
            .await
            .unwrap();
        assert_eq!(status.filled, 0);
        assert_eq!(status.state, OrderState::Cancelled);
    }

    #[tokio::test]
    async fn test_fill_then_error_records_order() {
        let venue = PaperVenue::new(Venue::Polymarket);
        venue.script([FillBehavior::FillThenError]);
        let order = create_test_order("t1-A", TimeInForce::Fok);
        assert!(venue.place_order(&order).await.is_err());

        let found = venue.find_order("t1-A").await.unwrap().unwrap();
        assert_eq!(found.filled, 10);
    }

    #[tokio::test]
    async fn test_failing_lookups() {
        let venue = PaperVenue::new(Venue::Kalshi);
        venue.settle("KX-LAL", MarketResult::Yes);
        venue.set_lookups_failing(true);
        assert!(venue.find_order("x").await.is_err());
        assert!(matches!(
            venue.get_settlement("KX-LAL").await,
            SettlementLookup::LookupFailed(_)
        ));
        venue.set_lookups_failing(false);
        assert!(matches!(
            venue.get_settlement("KX-LAL").await,
            SettlementLookup::Settled(_)
        ));
    }

    #[test]
    fn test_quote_book() {
        let book = PaperQuoteBook::new();
        assert!(book.quote(Venue::Kalshi, "KX").is_none());
        book.set(Venue::Kalshi, "KX", Quote::new(dec!(50), dec!(51)));
        assert_eq!(book.quote(Venue::Kalshi, "KX").unwrap().ask_cents, Some(dec!(51)));
    }
}
