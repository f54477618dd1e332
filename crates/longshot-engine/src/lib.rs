pub mod book;
pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

// Core types
pub use book::{BookKey, Orderbook, OrderbookSnapshot, PriceLevel, SideDepth};
pub use bus::{EventBus, MarketEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Command, IdGen, MatchingEngine, Report};
pub use error::{EngineError, ErrorKind, Result};
pub use ledger::{Ledger, LedgerOp, LedgerTxn};
pub use persistence::{NoopPersistence, Persistence, PersistenceError, PersistenceResult, WriteBatch};
pub use service::MarketRegistry;
pub use types::{
    Balance, BalanceScope, Cents, MAX_PRICE_CENTS, MIN_PRICE_CENTS, Market, MarketId, MarketStatus,
    OrderId, OrgId, Order, OrderKind, OrderStatus, Position, Side, TOKEN_CENTS, Trade, TradeId,
    TradeKind, UserId, validate_limit,
};
