use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{Cents, DEFAULT_MIDPOINT, MarketId, Order, OrderId, OrderKind, Side};

/// Composite key ordering resting orders by price-time priority.
///
/// Bids sort best-first as highest price then earliest arrival; asks as
/// lowest price then earliest arrival. A single key type with kind-aware
/// ordering lets both halves share the same map plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookKey {
    pub price: Cents,
    pub seq: u64,
    pub kind: OrderKind,
}

impl Ord for BookKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.kind {
            // Higher price first for bids, then earlier arrival
            OrderKind::Buy => self
                .price
                .cmp(&other.price)
                .reverse()
                .then(self.seq.cmp(&other.seq)),
            // Lower price first for asks, then earlier arrival
            OrderKind::Sell => self.price.cmp(&other.price).then(self.seq.cmp(&other.seq)),
        }
    }
}

impl PartialOrd for BookKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One aggregated price level in a depth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Cents,
    pub quantity: i64,
}

/// Published depth for one side's book, with its display midpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideDepth {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub midpoint: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub market_id: MarketId,
    pub yes: SideDepth,
    pub no: SideDepth,
}

#[derive(Debug, Default)]
struct SideBook {
    bids: BTreeMap<BookKey, Order>,
    asks: BTreeMap<BookKey, Order>,
    last_trade: Option<Cents>,
}

impl SideBook {
    fn half(&self, kind: OrderKind) -> &BTreeMap<BookKey, Order> {
        match kind {
            OrderKind::Buy => &self.bids,
            OrderKind::Sell => &self.asks,
        }
    }

    fn half_mut(&mut self, kind: OrderKind) -> &mut BTreeMap<BookKey, Order> {
        match kind {
            OrderKind::Buy => &mut self.bids,
            OrderKind::Sell => &mut self.asks,
        }
    }

    /// `(best_bid + best_ask) / 2` when both halves are quoted, else the
    /// last trade price on this side, else 50.
    fn midpoint(&self) -> f64 {
        let best_bid = self.bids.keys().next().map(|k| k.price);
        let best_ask = self.asks.keys().next().map(|k| k.price);
        match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (bid + ask) as f64 / 2.0,
            _ => match self.last_trade {
                Some(price) => price as f64,
                None => DEFAULT_MIDPOINT,
            },
        }
    }

    fn depth(&self, max_levels: usize) -> SideDepth {
        SideDepth {
            bids: aggregate(&self.bids, max_levels),
            asks: aggregate(&self.asks, max_levels),
            midpoint: self.midpoint(),
        }
    }
}

fn aggregate(half: &BTreeMap<BookKey, Order>, max_levels: usize) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = Vec::new();
    for (key, order) in half {
        let extends_last = levels.last().is_some_and(|level| level.price == key.price);
        if extends_last {
            levels.last_mut().expect("non-empty").quantity += order.remaining();
        } else {
            if levels.len() == max_levels {
                break;
            }
            levels.push(PriceLevel { price: key.price, quantity: order.remaining() });
        }
    }
    levels
}

/// Per-market resting limit orders: a YES book and a NO book, each with a
/// bid and an ask half. Owned exclusively by the market's worker; all
/// mutation goes through the matching engine.
#[derive(Debug)]
pub struct Orderbook {
    market_id: MarketId,
    yes: SideBook,
    no: SideBook,
    index: HashMap<OrderId, (Side, BookKey)>,
    next_seq: u64,
}

impl Orderbook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            yes: SideBook::default(),
            no: SideBook::default(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    fn side(&self, side: Side) -> &SideBook {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideBook {
        match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        }
    }

    /// Rest an order. Arrival sequence is assigned here, so inserting
    /// recovered orders in created-at order preserves time priority.
    pub fn insert(&mut self, order: Order) {
        let key = BookKey { price: order.price, seq: self.next_seq, kind: order.kind };
        self.next_seq += 1;
        self.index.insert(order.id, (order.side, key));
        self.side_mut(order.side).half_mut(order.kind).insert(key, order);
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let (side, key) = self.index.get(&order_id)?;
        self.side(*side).half(key.kind).get(key)
    }

    pub fn best_bid(&self, side: Side) -> Option<Cents> {
        self.side(side).bids.keys().next().map(|k| k.price)
    }

    pub fn best_ask(&self, side: Side) -> Option<Cents> {
        self.side(side).asks.keys().next().map(|k| k.price)
    }

    /// Resting bids of a side, best price first, FIFO within price.
    pub fn bids(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.side(side).bids.values()
    }

    /// Resting asks of a side, best price first, FIFO within price.
    pub fn asks(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.side(side).asks.values()
    }

    /// Apply a fill to a resting order; fully filled orders leave the book.
    /// Returns the updated order.
    pub fn apply_fill(&mut self, order_id: OrderId, qty: i64) -> Result<Order> {
        let (side, key) = *self
            .index
            .get(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        let half = self.side_mut(side).half_mut(key.kind);
        let order = half
            .get_mut(&key)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if qty > order.remaining() {
            return Err(EngineError::InvariantViolation(format!(
                "fill of {qty} exceeds remaining {} on order {order_id}",
                order.remaining()
            )));
        }
        order.fill(qty);
        let updated = order.clone();
        if updated.remaining() == 0 {
            half.remove(&key);
            self.index.remove(&order_id);
        }
        Ok(updated)
    }

    /// Remove an order and return it with its remaining quantity intact.
    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let (side, key) = self.index.remove(&order_id)?;
        self.side_mut(side).half_mut(key.kind).remove(&key)
    }

    /// Pull every resting order out of the book (resolution / deletion).
    pub fn drain_all(&mut self) -> Vec<Order> {
        let mut orders: Vec<Order> = Vec::with_capacity(self.index.len());
        for side_book in [&mut self.yes, &mut self.no] {
            orders.extend(std::mem::take(&mut side_book.bids).into_values());
            orders.extend(std::mem::take(&mut side_book.asks).into_values());
        }
        self.index.clear();
        orders.sort_unstable_by_key(|o| o.id);
        orders
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Record a trade price for midpoint fallback. Mints count on the YES
    /// side at the YES price and on the NO side at its complement.
    pub fn record_trade(&mut self, side: Side, price: Cents) {
        self.side_mut(side).last_trade = Some(price);
    }

    pub fn midpoint(&self, side: Side) -> f64 {
        self.side(side).midpoint()
    }

    pub fn snapshot(&self, depth: usize) -> OrderbookSnapshot {
        OrderbookSnapshot {
            market_id: self.market_id,
            yes: self.yes.depth(depth),
            no: self.no.depth(depth),
        }
    }
}
