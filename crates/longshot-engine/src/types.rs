use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// All ids are plain integers assigned by the engine's id generator and
/// preserved by the store.
pub type UserId = u64;
pub type MarketId = u64;
pub type OrderId = u64;
pub type TradeId = u64;
pub type OrgId = u64;

/// All money is integer cents. 1 play token = 100 cents; a share pays
/// [`TOKEN_CENTS`] on the winning side at resolution.
pub type Cents = i64;

pub const TOKEN_CENTS: Cents = 100;
pub const MIN_PRICE_CENTS: Cents = 1;
pub const MAX_PRICE_CENTS: Cents = 99;

/// Fallback midpoint (in cents) when a side has neither quotes nor trades.
pub const DEFAULT_MIDPOINT: f64 = 50.0;

/// Which binary outcome a share (or order, or resolution) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Side::Yes => 0,
            Side::No => 1,
        }
    }

    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Side::Yes),
            1 => Ok(Side::No),
            other => Err(EngineError::InvalidData(format!("invalid side: {other}"))),
        }
    }
}

/// Whether an order acquires shares (buy) or disposes of them (sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Buy,
    Sell,
}

impl OrderKind {
    pub fn as_i32(self) -> i32 {
        match self {
            OrderKind::Buy => 0,
            OrderKind::Sell => 1,
        }
    }

    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(OrderKind::Buy),
            1 => Ok(OrderKind::Sell),
            other => Err(EngineError::InvalidData(format!("invalid order kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            OrderStatus::Open => 0,
            OrderStatus::PartiallyFilled => 1,
            OrderStatus::Filled => 2,
            OrderStatus::Cancelled => 3,
        }
    }

    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(OrderStatus::Open),
            1 => Ok(OrderStatus::PartiallyFilled),
            2 => Ok(OrderStatus::Filled),
            3 => Ok(OrderStatus::Cancelled),
            other => Err(EngineError::InvalidData(format!("invalid order status: {other}"))),
        }
    }

    /// Open and partially filled orders rest in the book.
    pub fn is_resting(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Resolved,
    Deleted,
}

impl MarketStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            MarketStatus::Active => 0,
            MarketStatus::Resolved => 1,
            MarketStatus::Deleted => 2,
        }
    }

    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(MarketStatus::Active),
            1 => Ok(MarketStatus::Resolved),
            2 => Ok(MarketStatus::Deleted),
            other => Err(EngineError::InvalidData(format!("invalid market status: {other}"))),
        }
    }
}

/// Which pot of tokens a balance entry (and a market) lives in.
///
/// Global markets settle against the user's global balance; markets created
/// inside an organisation settle against a per-organisation balance that is
/// independent of the global one. Positions are always keyed by market and
/// never cross scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "org_id")]
pub enum BalanceScope {
    Global,
    Org(OrgId),
}

impl BalanceScope {
    /// Store encoding: 0 is the global scope, anything else is an org id.
    pub fn as_i64(self) -> i64 {
        match self {
            BalanceScope::Global => 0,
            BalanceScope::Org(id) => id as i64,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        if v == 0 {
            BalanceScope::Global
        } else {
            BalanceScope::Org(v as OrgId)
        }
    }
}

/// A user's token balance within one scope. `available + escrow` is the
/// user's total; reservation moves value from `available` to `escrow` and
/// both stay non-negative at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Cents,
    pub escrow: Cents,
}

impl Balance {
    pub fn total(&self) -> Cents {
        self.available + self.escrow
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub title: String,
    pub description: String,
    pub scope: BalanceScope,
    pub status: MarketStatus,
    /// Set exactly when `status == Resolved`.
    pub outcome: Option<Side>,
    /// Cumulative traded value in cents (maker price for matches, one full
    /// token per minted pair).
    pub volume: Cents,
    pub resolve_at: Option<u64>,
    pub created_at: u64,
}

impl Market {
    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market_id: MarketId,
    pub user_id: UserId,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price in cents, always in `1..=99`.
    pub price: Cents,
    pub quantity: i64,
    pub filled: i64,
    pub status: OrderStatus,
    /// Unix millis at creation; arrival order breaks price ties.
    pub created_at: u64,
}

impl Order {
    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled
    }

    /// Escrow still held against the unfilled remainder of a buy order.
    pub fn remaining_escrow(&self) -> Cents {
        self.price * self.remaining()
    }

    /// Record a fill and move the status along.
    pub fn fill(&mut self, qty: i64) {
        self.filled += qty;
        self.status = if self.filled >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// Shares changed owners between a buyer and a seller.
    Match,
    /// A new YES+NO pair was created from two buy orders; `seller` is None.
    Mint,
}

impl TradeKind {
    pub fn as_i32(self) -> i32 {
        match self {
            TradeKind::Match => 0,
            TradeKind::Mint => 1,
        }
    }

    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(TradeKind::Match),
            1 => Ok(TradeKind::Mint),
            other => Err(EngineError::InvalidData(format!("invalid trade kind: {other}"))),
        }
    }
}

/// One executed fill. Mint trades are normalised to the YES side: `price`
/// is the YES buyer's effective per-unit cost and `buyer` is the YES buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market_id: MarketId,
    pub side: Side,
    pub kind: TradeKind,
    pub price: Cents,
    pub quantity: i64,
    pub buyer_id: UserId,
    pub seller_id: Option<UserId>,
    pub created_at: u64,
}

/// A user's holdings in one market.
///
/// `*_reserved` counts shares locked behind open sell orders; they are still
/// owned (and pay out at resolution) but cannot back another sell.
/// `*_cost` is the total acquisition cost in cents; the volume-weighted
/// average price is `cost / shares`, derived at the display boundary. Sales
/// scale cost down proportionally so the average is unchanged by them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub yes_shares: i64,
    pub no_shares: i64,
    pub yes_reserved: i64,
    pub no_reserved: i64,
    pub yes_cost: Cents,
    pub no_cost: Cents,
}

impl Position {
    pub fn shares(&self, side: Side) -> i64 {
        match side {
            Side::Yes => self.yes_shares,
            Side::No => self.no_shares,
        }
    }

    pub fn reserved(&self, side: Side) -> i64 {
        match side {
            Side::Yes => self.yes_reserved,
            Side::No => self.no_reserved,
        }
    }

    /// Shares not locked behind open sell orders.
    pub fn available(&self, side: Side) -> i64 {
        self.shares(side) - self.reserved(side)
    }

    pub fn cost(&self, side: Side) -> Cents {
        match side {
            Side::Yes => self.yes_cost,
            Side::No => self.no_cost,
        }
    }

    pub fn avg_price(&self, side: Side) -> Option<f64> {
        let shares = self.shares(side);
        if shares == 0 {
            None
        } else {
            Some(self.cost(side) as f64 / shares as f64)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.yes_shares == 0 && self.no_shares == 0
    }

    pub(crate) fn add_shares(&mut self, side: Side, qty: i64, cost: Cents) {
        match side {
            Side::Yes => {
                self.yes_shares += qty;
                self.yes_cost += cost;
            }
            Side::No => {
                self.no_shares += qty;
                self.no_cost += cost;
            }
        }
    }

    /// Remove sold shares, scaling cost down so the average price the
    /// remaining shares were acquired at is unchanged.
    pub(crate) fn remove_shares(&mut self, side: Side, qty: i64) {
        let shares = self.shares(side);
        debug_assert!(qty <= shares);
        let cost_removed = if shares == 0 { 0 } else { self.cost(side) * qty / shares };
        match side {
            Side::Yes => {
                self.yes_shares -= qty;
                self.yes_cost -= cost_removed;
            }
            Side::No => {
                self.no_shares -= qty;
                self.no_cost -= cost_removed;
            }
        }
    }

    pub(crate) fn add_reserved(&mut self, side: Side, qty: i64) {
        match side {
            Side::Yes => self.yes_reserved += qty,
            Side::No => self.no_reserved += qty,
        }
    }

    pub(crate) fn sub_reserved(&mut self, side: Side, qty: i64) {
        match side {
            Side::Yes => self.yes_reserved -= qty,
            Side::No => self.no_reserved -= qty,
        }
    }
}

/// Validate limit-order parameters before they reach the books.
pub fn validate_limit(price: Cents, quantity: i64) -> Result<()> {
    if !(MIN_PRICE_CENTS..=MAX_PRICE_CENTS).contains(&price) {
        return Err(EngineError::InvalidPrice(price));
    }
    if quantity <= 0 {
        return Err(EngineError::InvalidQuantity(quantity));
    }
    Ok(())
}
