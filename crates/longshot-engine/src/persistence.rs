use thiserror::Error;

use crate::types::{Balance, BalanceScope, Market, MarketId, Order, OrderId, Position, Trade, TradeId, UserId};

#[derive(Debug, Clone, Error)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Everything one committed engine command changed, written together so the
/// store can apply it in a single database transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Created or mutated orders, final state.
    pub orders: Vec<Order>,
    /// New trades, append-only.
    pub trades: Vec<Trade>,
    /// Post-commit position rows for every touched (user, market).
    pub positions: Vec<(UserId, MarketId, Position)>,
    /// Post-commit balance rows for every touched (user, scope).
    pub balances: Vec<(UserId, BalanceScope, Balance)>,
    /// Market record when volume/status/outcome changed.
    pub market: Option<Market>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.trades.is_empty()
            && self.positions.is_empty()
            && self.balances.is_empty()
            && self.market.is_none()
    }
}

/// Durable storage capability handed to the engine. The in-memory engine
/// state is authoritative for an active market; the store exists so books,
/// balances, and positions can be rebuilt after a restart.
pub trait Persistence: Send + Sync {
    /// Insert a newly created market.
    fn save_market(&self, market: &Market) -> PersistenceResult<()>;

    /// Apply one command's writes atomically.
    fn apply(&self, batch: &WriteBatch) -> PersistenceResult<()>;

    /// All markets, any status (recovery + listings).
    fn load_markets(&self) -> PersistenceResult<Vec<Market>>;

    /// Resting (open / partially filled) orders of one market, oldest
    /// first, for book rebuilds.
    fn load_open_orders(&self, market_id: MarketId) -> PersistenceResult<Vec<Order>>;

    /// Every stored position row (ledger restore).
    fn load_positions(&self) -> PersistenceResult<Vec<(UserId, MarketId, Position)>>;

    /// Every stored balance row (ledger restore).
    fn load_balances(&self) -> PersistenceResult<Vec<(UserId, BalanceScope, Balance)>>;

    /// Highest assigned (order id, trade id, market id), so the id
    /// generator can resume past them.
    fn max_ids(&self) -> PersistenceResult<(OrderId, TradeId, MarketId)>;
}

/// No-op store for tests and ephemeral setups.
pub struct NoopPersistence;

impl Persistence for NoopPersistence {
    fn save_market(&self, _market: &Market) -> PersistenceResult<()> {
        Ok(())
    }

    fn apply(&self, _batch: &WriteBatch) -> PersistenceResult<()> {
        Ok(())
    }

    fn load_markets(&self) -> PersistenceResult<Vec<Market>> {
        Ok(Vec::new())
    }

    fn load_open_orders(&self, _market_id: MarketId) -> PersistenceResult<Vec<Order>> {
        Ok(Vec::new())
    }

    fn load_positions(&self) -> PersistenceResult<Vec<(UserId, MarketId, Position)>> {
        Ok(Vec::new())
    }

    fn load_balances(&self) -> PersistenceResult<Vec<(UserId, BalanceScope, Balance)>> {
        Ok(Vec::new())
    }

    fn max_ids(&self) -> PersistenceResult<(OrderId, TradeId, MarketId)> {
        Ok((0, 0, 0))
    }
}
