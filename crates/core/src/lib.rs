pub mod config;
pub mod config_loader;
pub mod error;
pub mod settlement;
pub mod traits;
pub mod types;

pub use config::{
    AppConfig, CircuitBreakerConfig, EngineConfig, FeeConfig, HardLimits, LedgerConfig,
    ReconcilerConfig, ResolverConfig, SizingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{LimitError, MappingError, VenueError};
pub use settlement::{MarketResult, SettlementLookup, SettlementRecord};
pub use traits::{MappingService, QuoteSource, VenueAdapter};
pub use types::{
    Direction, Fill, GameMapping, Instrument, Opportunity, OrderRequest, OrderSide, OrderState,
    OrderStatus, Outcome, PriceLevel, Quote, TimeInForce, Venue, CONTRACT_PAYOUT_CENTS,
};
