use thiserror::Error;

use crate::types::{Cents, MarketId, MarketStatus, OrderId};

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("price must be 1-99 cents (got {0})")]
    InvalidPrice(Cents),

    #[error("quantity must be positive (got {0})")]
    InvalidQuantity(i64),

    #[error("token budget must be positive (got {0})")]
    InvalidBudget(Cents),

    #[error("market order needs a token budget (buy) or a quantity (sell)")]
    InvalidMarketOrder,

    #[error("insufficient balance: need {needed} cents, have {available}")]
    InsufficientBalance { needed: Cents, available: Cents },

    #[error("insufficient shares: need {needed}, have {available}")]
    InsufficientShares { needed: i64, available: i64 },

    #[error("market is not active (found {0:?})")]
    MarketClosed(MarketStatus),

    #[error("market {0} not found")]
    MarketNotFound(MarketId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} belongs to another user")]
    NotOrderOwner(OrderId),

    #[error("command deadline elapsed before the market worker accepted it")]
    Timeout,

    #[error("market worker has shut down")]
    WorkerGone,

    #[error("market worker is halted after an invariant failure")]
    Halted,

    #[error("persistence unavailable: {0}")]
    Unavailable(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Retry taxonomy surfaced to the gateway: validation and precondition
/// failures are safe for the client to retry after correcting the request,
/// transient failures are safe to retry as-is, fatal failures are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Precondition,
    Transient,
    Fatal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidPrice(_)
            | EngineError::InvalidQuantity(_)
            | EngineError::InvalidBudget(_)
            | EngineError::InvalidMarketOrder
            | EngineError::InvalidData(_) => ErrorKind::Validation,

            EngineError::InsufficientBalance { .. }
            | EngineError::InsufficientShares { .. }
            | EngineError::MarketClosed(_)
            | EngineError::MarketNotFound(_)
            | EngineError::OrderNotFound(_)
            | EngineError::NotOrderOwner(_) => ErrorKind::Precondition,

            EngineError::Timeout | EngineError::WorkerGone | EngineError::Unavailable(_) => {
                ErrorKind::Transient
            }

            EngineError::Halted | EngineError::InvariantViolation(_) => ErrorKind::Fatal,
        }
    }
}
