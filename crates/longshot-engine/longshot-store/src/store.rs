use std::sync::Mutex;

use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use longshot_engine::{
    Balance, BalanceScope, Market, MarketId, MarketStatus, Order, OrderId, OrderStatus,
    Persistence, PersistenceError, PersistenceResult, Position, Trade, TradeId, UserId, WriteBatch,
};

use crate::conversions::{
    balance_to_row, market_to_row, order_to_row, position_to_row, row_to_balance, row_to_market,
    row_to_order, row_to_position, row_to_trade, trade_to_row,
};
use crate::error::StoreError;
use crate::models::{BalanceRow, MarketRow, NewUserRow, OrderRow, PositionRow, TradeRow, UserRow};
use crate::schema::{balances, markets, orders, positions, trades, users};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn now_text() -> String {
    chrono::Utc::now().to_rfc3339()
}

// --- Public types ---

/// A stored account as the gateway sees it.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub is_admin: bool,
    pub created_at: String,
}

impl From<UserRow> for UserInfo {
    fn from(row: UserRow) -> Self {
        UserInfo {
            id: row.id as UserId,
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            is_admin: row.is_admin != 0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    pub status: Option<MarketStatus>,
    pub scope: Option<BalanceScope>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<UserId>,
    pub market_id: Option<MarketId>,
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
}

// --- LongshotStore ---

/// Persistent storage for users, markets, orders, trades, positions, and
/// balances.
///
/// All methods take `&mut self` because Diesel's `SqliteConnection`
/// requires `&mut` for all operations, including reads.
pub struct LongshotStore {
    conn: SqliteConnection,
}

impl LongshotStore {
    /// Open (or create) a store at the given file path. Runs migrations
    /// automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(path)?;
        diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(LongshotStore { conn })
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(":memory:")?;
        diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(LongshotStore { conn })
    }

    // ==================== Users ====================

    /// Insert a new account. A duplicate email is a conflict.
    pub fn create_user(
        &mut self,
        email: &str,
        password_hash: &str,
        display_name: &str,
        is_admin: bool,
    ) -> crate::Result<UserInfo> {
        let row = NewUserRow {
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            display_name: display_name.to_string(),
            is_admin: is_admin as i32,
            created_at: now_text(),
        };
        let inserted = diesel::insert_into(users::table)
            .values(&row)
            .execute(&mut self.conn);
        match inserted {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(StoreError::Conflict(format!("email already registered: {email}")));
            }
            Err(e) => return Err(e.into()),
        }

        let user: UserRow = users::table
            .filter(users::email.eq(email))
            .first(&mut self.conn)?;
        Ok(user.into())
    }

    pub fn user_by_email(&mut self, email: &str) -> crate::Result<Option<UserInfo>> {
        let row: Option<UserRow> = users::table
            .filter(users::email.eq(email))
            .first(&mut self.conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    pub fn user_by_id(&mut self, user_id: UserId) -> crate::Result<Option<UserInfo>> {
        let row: Option<UserRow> = users::table
            .find(user_id as i64)
            .first(&mut self.conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    // ==================== Markets ====================

    pub fn insert_market(&mut self, market: &Market) -> crate::Result<()> {
        let row = market_to_row(market, &now_text());
        diesel::insert_into(markets::table)
            .values(&row)
            .execute(&mut self.conn)?;
        Ok(())
    }

    pub fn upsert_market(&mut self, market: &Market) -> crate::Result<()> {
        let row = market_to_row(market, &now_text());
        diesel::replace_into(markets::table)
            .values(&row)
            .execute(&mut self.conn)?;
        Ok(())
    }

    pub fn get_market(&mut self, market_id: MarketId) -> crate::Result<Option<Market>> {
        let row: Option<MarketRow> = markets::table
            .find(market_id as i64)
            .first(&mut self.conn)
            .optional()?;
        row.map(row_to_market).transpose()
    }

    pub fn list_markets(&mut self, filter: &MarketFilter) -> crate::Result<Vec<Market>> {
        let mut query = markets::table.into_boxed();
        if let Some(status) = filter.status {
            query = query.filter(markets::market_status.eq(status.as_i32()));
        }
        if let Some(scope) = filter.scope {
            query = query.filter(markets::scope.eq(scope.as_i64()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        let rows: Vec<MarketRow> = query.order(markets::id.asc()).load(&mut self.conn)?;
        rows.into_iter().map(row_to_market).collect()
    }

    // ==================== Orders ====================

    pub fn get_order(&mut self, order_id: OrderId) -> crate::Result<Option<Order>> {
        let row: Option<OrderRow> = orders::table
            .find(order_id as i64)
            .first(&mut self.conn)
            .optional()?;
        row.map(row_to_order).transpose()
    }

    pub fn list_orders(&mut self, filter: &OrderFilter) -> crate::Result<Vec<Order>> {
        let mut query = orders::table.into_boxed();
        if let Some(user_id) = filter.user_id {
            query = query.filter(orders::user_id.eq(user_id as i64));
        }
        if let Some(market_id) = filter.market_id {
            query = query.filter(orders::market_id.eq(market_id as i64));
        }
        if let Some(status) = filter.status {
            query = query.filter(orders::order_status.eq(status.as_i32()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        let rows: Vec<OrderRow> = query
            .order((orders::created_at_ms.asc(), orders::id.asc()))
            .load(&mut self.conn)?;
        rows.into_iter().map(row_to_order).collect()
    }

    /// Resting orders of a market, oldest first — the book rebuild input.
    pub fn resting_orders(&mut self, market_id: MarketId) -> crate::Result<Vec<Order>> {
        let rows: Vec<OrderRow> = orders::table
            .filter(orders::market_id.eq(market_id as i64))
            .filter(orders::order_status.eq_any(vec![
                OrderStatus::Open.as_i32(),
                OrderStatus::PartiallyFilled.as_i32(),
            ]))
            .order((orders::created_at_ms.asc(), orders::id.asc()))
            .load(&mut self.conn)?;
        rows.into_iter().map(row_to_order).collect()
    }

    // ==================== Trades ====================

    /// Latest trades of a market, newest first.
    pub fn list_trades(&mut self, market_id: MarketId, limit: i64) -> crate::Result<Vec<Trade>> {
        let rows: Vec<TradeRow> = trades::table
            .filter(trades::market_id.eq(market_id as i64))
            .order(trades::id.desc())
            .limit(limit)
            .load(&mut self.conn)?;
        rows.into_iter().map(row_to_trade).collect()
    }

    // ==================== Balances & positions ====================

    pub fn upsert_balance(
        &mut self,
        user_id: UserId,
        scope: BalanceScope,
        balance: &Balance,
    ) -> crate::Result<()> {
        let row = balance_to_row(user_id, scope, balance, &now_text());
        diesel::replace_into(balances::table)
            .values(&row)
            .execute(&mut self.conn)?;
        Ok(())
    }

    pub fn all_balances(&mut self) -> crate::Result<Vec<(UserId, BalanceScope, Balance)>> {
        let rows: Vec<BalanceRow> = balances::table.load(&mut self.conn)?;
        Ok(rows.into_iter().map(row_to_balance).collect())
    }

    pub fn all_positions(&mut self) -> crate::Result<Vec<(UserId, MarketId, Position)>> {
        let rows: Vec<PositionRow> = positions::table.load(&mut self.conn)?;
        Ok(rows.into_iter().map(row_to_position).collect())
    }

    // ==================== Batched writes ====================

    /// Apply one committed engine command in a single database transaction.
    pub fn apply_batch(&mut self, batch: &WriteBatch) -> crate::Result<()> {
        let now = now_text();
        self.conn.transaction::<_, StoreError, _>(|conn| {
            for order in &batch.orders {
                diesel::replace_into(orders::table)
                    .values(order_to_row(order, &now))
                    .execute(conn)?;
            }
            for trade in &batch.trades {
                diesel::insert_into(trades::table)
                    .values(trade_to_row(trade))
                    .execute(conn)?;
            }
            for (user_id, market_id, position) in &batch.positions {
                diesel::replace_into(positions::table)
                    .values(position_to_row(*user_id, *market_id, position, &now))
                    .execute(conn)?;
            }
            for (user_id, scope, balance) in &batch.balances {
                diesel::replace_into(balances::table)
                    .values(balance_to_row(*user_id, *scope, balance, &now))
                    .execute(conn)?;
            }
            if let Some(market) = &batch.market {
                diesel::replace_into(markets::table)
                    .values(market_to_row(market, &now))
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    /// Highest assigned ids, for resuming the id generator.
    pub fn max_ids(&mut self) -> crate::Result<(OrderId, TradeId, MarketId)> {
        let max_order: Option<i64> = orders::table
            .select(diesel::dsl::max(orders::id))
            .first(&mut self.conn)?;
        let max_trade: Option<i64> = trades::table
            .select(diesel::dsl::max(trades::id))
            .first(&mut self.conn)?;
        let max_market: Option<i64> = markets::table
            .select(diesel::dsl::max(markets::id))
            .first(&mut self.conn)?;
        Ok((
            max_order.unwrap_or(0) as OrderId,
            max_trade.unwrap_or(0) as TradeId,
            max_market.unwrap_or(0) as MarketId,
        ))
    }
}

// --- SharedStore ---

/// `&self` adapter over [`LongshotStore`] for sharing between the gateway
/// and the market workers. Also the [`Persistence`] implementation handed
/// to the engine.
pub struct SharedStore {
    inner: Mutex<LongshotStore>,
}

impl SharedStore {
    pub fn new(store: LongshotStore) -> Self {
        Self { inner: Mutex::new(store) }
    }

    pub fn open(path: &str) -> crate::Result<Self> {
        Ok(Self::new(LongshotStore::open(path)?))
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        Ok(Self::new(LongshotStore::open_in_memory()?))
    }

    /// Run a closure against the locked store.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut LongshotStore) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

fn persist_err(e: StoreError) -> PersistenceError {
    PersistenceError(e.to_string())
}

impl Persistence for SharedStore {
    fn save_market(&self, market: &Market) -> PersistenceResult<()> {
        self.with(|store| store.insert_market(market)).map_err(persist_err)
    }

    fn apply(&self, batch: &WriteBatch) -> PersistenceResult<()> {
        self.with(|store| store.apply_batch(batch)).map_err(persist_err)
    }

    fn load_markets(&self) -> PersistenceResult<Vec<Market>> {
        self.with(|store| store.list_markets(&MarketFilter::default()))
            .map_err(persist_err)
    }

    fn load_open_orders(&self, market_id: MarketId) -> PersistenceResult<Vec<Order>> {
        self.with(|store| store.resting_orders(market_id)).map_err(persist_err)
    }

    fn load_positions(&self) -> PersistenceResult<Vec<(UserId, MarketId, Position)>> {
        self.with(|store| store.all_positions()).map_err(persist_err)
    }

    fn load_balances(&self) -> PersistenceResult<Vec<(UserId, BalanceScope, Balance)>> {
        self.with(|store| store.all_balances()).map_err(persist_err)
    }

    fn max_ids(&self) -> PersistenceResult<(OrderId, TradeId, MarketId)> {
        self.with(|store| store.max_ids()).map_err(persist_err)
    }
}
