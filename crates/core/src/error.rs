//! Error types for venue and mapping collaborators.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::Venue;

/// Errors returned by a [`crate::traits::VenueAdapter`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    /// Order was rejected by the venue.
    #[error("Order rejected: {reason}")]
    Rejected {
        /// Rejection reason from the venue.
        reason: String,
    },

    /// Insufficient balance to place the order.
    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Balance required for the order, in dollars.
        required: Decimal,
        /// Currently available balance, in dollars.
        available: Decimal,
    },

    /// The request timed out before the venue answered.
    #[error("Timeout talking to {venue}: {operation}")]
    Timeout {
        /// Venue that timed out.
        venue: Venue,
        /// Operation in flight.
        operation: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Unknown order id.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Invalid order parameters.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),
}

impl VenueError {
    /// Creates a rejected error with the given reason.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(venue: Venue, operation: impl Into<String>) -> Self {
        Self::Timeout {
            venue,
            operation: operation.into(),
        }
    }

    /// Returns true if the error says nothing about the state of the venue.
    ///
    /// A transient error must never be read as "no order" or "no position".
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Network(_)
        )
    }
}

/// Errors returned by a [`crate::traits::MappingService`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    /// No mapping exists for the game/team.
    #[error("No mapping for {sport}/{game_id}/{team}")]
    NotFound {
        /// Sport key.
        sport: String,
        /// Game identifier.
        game_id: String,
        /// Team.
        team: String,
    },

    /// The mapping service could not be reached.
    #[error("Mapping service unavailable: {0}")]
    Unavailable(String),
}

/// An order violated a configured hard limit.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LimitError {
    #[error("Order count {contracts} below minimum {min}")]
    ContractsBelowMinimum { contracts: u32, min: u32 },

    #[error("Order count {contracts} exceeds maximum {max}")]
    ContractsAboveMaximum { contracts: u32, max: u32 },

    #[error("Price {price_cents}c outside [{min}, {max}]")]
    PriceOutOfBand {
        price_cents: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Order value ${value} exceeds maximum ${max}")]
    OrderValueExceeded { value: Decimal, max: Decimal },
}
