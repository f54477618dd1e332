use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::book::{Orderbook, OrderbookSnapshot};
use crate::bus::{EventBus, MarketEvent};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{Ledger, LedgerOp, LedgerTxn};
use crate::persistence::{Persistence, WriteBatch};
use crate::types::{
    Cents, Market, MarketId, MarketStatus, Order, OrderId, OrderKind, OrderStatus, Side,
    TOKEN_CENTS, Trade, TradeId, TradeKind, UserId, validate_limit,
};

/// Monotonic id source shared by all market workers. `resume` restarts the
/// counters past the highest persisted ids.
pub struct IdGen {
    next_order: AtomicU64,
    next_trade: AtomicU64,
    next_market: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        Self::resume(0, 0, 0)
    }

    pub fn resume(max_order: OrderId, max_trade: TradeId, max_market: MarketId) -> Self {
        Self {
            next_order: AtomicU64::new(max_order + 1),
            next_trade: AtomicU64::new(max_trade + 1),
            next_market: AtomicU64::new(max_market + 1),
        }
    }

    pub fn next_order_id(&self) -> OrderId {
        self.next_order.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_trade_id(&self) -> TradeId {
        self.next_trade.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_market_id(&self) -> MarketId {
        self.next_market.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// One trading instruction for a market, already authenticated and
/// validated for shape by the gateway. The engine re-checks everything it
/// is authoritative for (prices, quantities, funds, market state).
#[derive(Debug, Clone)]
pub enum Command {
    PlaceLimit { user: UserId, side: Side, kind: OrderKind, price: Cents, quantity: i64 },
    /// Buys carry a token budget, sells a share quantity.
    PlaceMarket { user: UserId, side: Side, kind: OrderKind, budget: Option<Cents>, quantity: Option<i64> },
    Cancel { user: UserId, order_id: OrderId },
    Resolve { outcome: Side },
    Delete,
}

/// What one command did: resulting trades, the final state of the placed
/// (or cancelled) order, and the caller's money movements.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub order: Option<Order>,
    pub trades: Vec<Trade>,
    pub shares_filled: i64,
    /// Net cents the caller paid for acquired shares.
    pub tokens_spent: Cents,
    /// Cents credited to the caller for sold shares.
    pub tokens_received: Cents,
    /// Escrow or budget returned to the caller within this command.
    pub refund: Cents,
    /// Volume-weighted fill price; display only.
    pub avg_price: Option<f64>,
}

/// A planned fill against one resting order. `price` is always the resting
/// order's own price; effective taker/maker costs are derived when the fill
/// is staged.
#[derive(Debug, Clone, Copy)]
struct Fill {
    maker_order: OrderId,
    maker_user: UserId,
    price: Cents,
    qty: i64,
    kind: TradeKind,
}

/// Lightweight view of a resting order used while planning fills.
#[derive(Debug, Clone, Copy)]
struct Resting {
    id: OrderId,
    user: UserId,
    price: Cents,
    remaining: i64,
}

impl Resting {
    fn of(order: &Order) -> Self {
        Self { id: order.id, user: order.user_id, price: order.price, remaining: order.remaining() }
    }
}

/// Per-market matching engine. Owned exclusively by the market's worker
/// task; every public method runs to completion with no suspension point,
/// so commands are strictly serialised.
pub struct MatchingEngine {
    market: Market,
    book: Orderbook,
    ledger: Arc<Ledger>,
    store: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    ids: Arc<IdGen>,
    config: EngineConfig,
    halted: bool,
}

impl MatchingEngine {
    pub fn new(
        market: Market,
        ledger: Arc<Ledger>,
        store: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        ids: Arc<IdGen>,
        config: EngineConfig,
    ) -> Self {
        let book = Orderbook::new(market.id);
        Self { market, book, ledger, store, clock, bus, ids, config, halted: false }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The market no longer accepts commands: resolved, deleted, or halted.
    pub fn is_terminal(&self) -> bool {
        self.halted || !self.market.is_active()
    }

    /// Rebuild the book from persisted resting orders (oldest first).
    pub fn restore_book(&mut self, mut orders: Vec<Order>) {
        orders.sort_unstable_by_key(|o| (o.created_at, o.id));
        let count = orders.len();
        for order in orders {
            debug_assert!(order.status.is_resting());
            self.book.insert(order);
        }
        if count > 0 {
            log::info!("market {}: restored {count} resting orders", self.market.id);
        }
    }

    pub fn snapshot(&self, depth: Option<usize>) -> OrderbookSnapshot {
        self.book.snapshot(depth.unwrap_or(self.config.snapshot_depth))
    }

    pub fn execute(&mut self, cmd: Command) -> Result<Report> {
        if self.halted {
            return Err(EngineError::Halted);
        }
        if !self.market.is_active() {
            return Err(EngineError::MarketClosed(self.market.status));
        }
        match cmd {
            Command::PlaceLimit { user, side, kind, price, quantity } => {
                self.place_limit(user, side, kind, price, quantity)
            }
            Command::PlaceMarket { user, side, kind, budget, quantity } => match kind {
                OrderKind::Buy => {
                    let budget = budget.ok_or(EngineError::InvalidMarketOrder)?;
                    self.place_market_buy(user, side, budget)
                }
                OrderKind::Sell => {
                    let quantity = quantity.ok_or(EngineError::InvalidMarketOrder)?;
                    self.place_market_sell(user, side, quantity)
                }
            },
            Command::Cancel { user, order_id } => self.cancel(user, order_id),
            Command::Resolve { outcome } => self.resolve(outcome),
            Command::Delete => self.delete(),
        }
    }

    // ── Limit orders ─────────────────────────────────────────────────────

    fn place_limit(
        &mut self,
        user: UserId,
        side: Side,
        kind: OrderKind,
        price: Cents,
        quantity: i64,
    ) -> Result<Report> {
        validate_limit(price, quantity)?;
        let scope = self.market.scope;

        // The reservation is the only point a command may fail on the
        // caller's funds; everything after consumes reserved value.
        let mut txn = self.ledger.begin();
        match kind {
            OrderKind::Buy => txn.reserve(user, scope, price * quantity),
            OrderKind::Sell => {
                txn.push(LedgerOp::ReserveShares { user, market: self.market.id, side, qty: quantity })
            }
        }
        self.ledger.commit(txn)?;

        let mut order = Order {
            id: self.ids.next_order_id(),
            market_id: self.market.id,
            user_id: user,
            side,
            kind,
            price,
            quantity,
            filled: 0,
            status: OrderStatus::Open,
            created_at: self.clock.now_millis(),
        };

        let fills = match kind {
            OrderKind::Buy => self.plan_buy(user, side, Some(price), quantity, None),
            OrderKind::Sell => self.plan_sell(user, side, Some(price), quantity),
        };

        let mut txn = self.ledger.begin();
        let mut out = StagedCommand::new(user);
        match kind {
            OrderKind::Buy => self.stage_buy_fills(&mut txn, &mut out, user, side, Some(price), &fills),
            OrderKind::Sell => self.stage_sell_fills(&mut txn, &mut out, user, side, Some(price), &fills),
        }
        self.commit_fills(txn)?;

        // Book mutations only after the ledger committed.
        let mut batch_orders = self.apply_fills_to_book(&fills, &mut out);
        for fill in &fills {
            order.fill(fill.qty);
        }
        if order.remaining() > 0 {
            self.book.insert(order.clone());
        }
        batch_orders.push(order.clone());

        self.finish_command(out, batch_orders, Some(order))
    }

    // ── Market orders ────────────────────────────────────────────────────

    fn place_market_buy(&mut self, user: UserId, side: Side, budget: Cents) -> Result<Report> {
        if budget <= 0 {
            return Err(EngineError::InvalidBudget(budget));
        }
        let scope = self.market.scope;

        let mut txn = self.ledger.begin();
        txn.reserve(user, scope, budget);
        self.ledger.commit(txn)?;

        let fills = self.plan_buy(user, side, None, i64::MAX, Some(budget));

        let mut txn = self.ledger.begin();
        let mut out = StagedCommand::new(user);
        self.stage_buy_fills(&mut txn, &mut out, user, side, None, &fills);
        let leftover = budget - out.spent;
        txn.release(user, scope, leftover);
        out.refund += leftover;
        self.commit_fills(txn)?;

        let batch_orders = self.apply_fills_to_book(&fills, &mut out);
        self.finish_command(out, batch_orders, None)
    }

    fn place_market_sell(&mut self, user: UserId, side: Side, quantity: i64) -> Result<Report> {
        if quantity <= 0 {
            return Err(EngineError::InvalidQuantity(quantity));
        }

        let mut txn = self.ledger.begin();
        txn.push(LedgerOp::ReserveShares { user, market: self.market.id, side, qty: quantity });
        self.ledger.commit(txn)?;

        let fills = self.plan_sell(user, side, None, quantity);

        let mut txn = self.ledger.begin();
        let mut out = StagedCommand::new(user);
        self.stage_sell_fills(&mut txn, &mut out, user, side, None, &fills);
        let leftover = quantity - out.filled;
        if leftover > 0 {
            txn.push(LedgerOp::ReleaseShares { user, market: self.market.id, side, qty: leftover });
        }
        self.commit_fills(txn)?;

        let batch_orders = self.apply_fills_to_book(&fills, &mut out);
        self.finish_command(out, batch_orders, None)
    }

    // ── Planning ─────────────────────────────────────────────────────────

    /// Walk the same-side asks (match) and opposite-side bids (mint)
    /// choosing, per step, whichever fills the buyer cheaper; ties prefer
    /// the match so share supply stays minimal. A limit buy is capped by
    /// its own price per unit; a market buy (`limit_price` None) is capped
    /// by `budget` and pays the complement of the resting bid on mints.
    fn plan_buy(
        &self,
        user: UserId,
        side: Side,
        limit_price: Option<Cents>,
        quantity: i64,
        budget: Option<Cents>,
    ) -> Vec<Fill> {
        let asks: Vec<Resting> = self
            .book
            .asks(side)
            .filter(|o| o.user_id != user)
            .map(Resting::of)
            .collect();
        let opp_bids: Vec<Resting> = self
            .book
            .bids(side.opposite())
            .filter(|o| o.user_id != user)
            .map(Resting::of)
            .collect();

        let mut fills = Vec::new();
        let mut remaining = quantity;
        let mut budget_left = budget.unwrap_or(Cents::MAX);
        let (mut ai, mut oi) = (0usize, 0usize);

        while remaining > 0 {
            let ask = asks
                .get(ai)
                .filter(|r| limit_price.is_none_or(|p| r.price <= p));
            let opp = opp_bids
                .get(oi)
                .filter(|r| limit_price.is_none_or(|p| r.price + p >= TOKEN_CENTS));

            // Effective per-unit cost to the incoming buyer.
            let match_cost = ask.map(|r| r.price);
            let mint_cost = opp.map(|r| match limit_price {
                Some(p) => mint_taker_cost(p, r.price),
                None => TOKEN_CENTS - r.price,
            });

            let use_match = match (match_cost, mint_cost) {
                (None, None) => break,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(a), Some(m)) => a <= m,
            };

            let (maker, unit_cost, kind) = if use_match {
                let maker = *ask.expect("checked above");
                (maker, match_cost.expect("checked above"), TradeKind::Match)
            } else {
                let maker = *opp.expect("checked above");
                (maker, mint_cost.expect("checked above"), TradeKind::Mint)
            };

            let affordable = if unit_cost == 0 { i64::MAX } else { budget_left / unit_cost };
            let qty = remaining.min(maker.remaining).min(affordable);
            if qty <= 0 {
                break;
            }

            fills.push(Fill {
                maker_order: maker.id,
                maker_user: maker.user,
                price: maker.price,
                qty,
                kind,
            });
            remaining -= qty;
            budget_left -= unit_cost * qty;
            if qty == maker.remaining {
                if use_match {
                    ai += 1;
                } else {
                    oi += 1;
                }
            }
        }
        fills
    }

    /// Walk the same-side bids best-first. Sells never mint: minting
    /// creates shares, a sale only moves existing ones.
    fn plan_sell(&self, user: UserId, side: Side, limit_price: Option<Cents>, quantity: i64) -> Vec<Fill> {
        let mut fills = Vec::new();
        let mut remaining = quantity;
        for maker in self.book.bids(side).filter(|o| o.user_id != user) {
            if remaining == 0 {
                break;
            }
            if let Some(floor) = limit_price
                && maker.price < floor
            {
                break;
            }
            let qty = remaining.min(maker.remaining());
            fills.push(Fill {
                maker_order: maker.id,
                maker_user: maker.user_id,
                price: maker.price,
                qty,
                kind: TradeKind::Match,
            });
            remaining -= qty;
        }
        fills
    }

    // ── Staging (ledger ops + trades) ────────────────────────────────────

    /// `limit_price` is the buyer's escrowed per-unit price; None means a
    /// market order escrowed against a budget, which is charged at cost.
    fn stage_buy_fills(
        &self,
        txn: &mut LedgerTxn,
        out: &mut StagedCommand,
        buyer: UserId,
        side: Side,
        limit_price: Option<Cents>,
        fills: &[Fill],
    ) {
        let scope = self.market.scope;
        let market = self.market.id;
        let now = self.clock.now_millis();

        for fill in fills {
            let qty = fill.qty;
            out.touch(fill.maker_user);
            match fill.kind {
                TradeKind::Match => {
                    let price = fill.price;
                    txn.debit_escrow(buyer, scope, price * qty);
                    if let Some(limit) = limit_price {
                        // Fill at the resting maker's price; the difference
                        // to the buyer's own price comes back off escrow.
                        txn.release(buyer, scope, (limit - price) * qty);
                        out.refund += (limit - price) * qty;
                    }
                    txn.credit(fill.maker_user, scope, price * qty);
                    txn.push(LedgerOp::TransferShares {
                        from: fill.maker_user,
                        to: buyer,
                        market,
                        side,
                        qty,
                        price,
                    });
                    out.spent += price * qty;
                    out.volume += price * qty;
                    out.trades.push(Trade {
                        id: self.ids.next_trade_id(),
                        market_id: market,
                        side,
                        kind: TradeKind::Match,
                        price,
                        quantity: qty,
                        buyer_id: buyer,
                        seller_id: Some(fill.maker_user),
                        created_at: now,
                    });
                }
                TradeKind::Mint => {
                    let q = fill.price;
                    // With no stated limit the buyer pays the complement of
                    // the resting bid and there is no surplus to split.
                    let p = limit_price.unwrap_or(TOKEN_CENTS - q);
                    let surplus = p + q - TOKEN_CENTS;
                    let taker_refund = surplus / 2;
                    let maker_refund = surplus - taker_refund;
                    let taker_cost = p - taker_refund;
                    let maker_cost = q - maker_refund;

                    txn.debit_escrow(buyer, scope, taker_cost * qty);
                    txn.release(buyer, scope, taker_refund * qty);
                    txn.debit_escrow(fill.maker_user, scope, maker_cost * qty);
                    txn.release(fill.maker_user, scope, maker_refund * qty);
                    txn.push(LedgerOp::MintShares {
                        user: buyer,
                        market,
                        side,
                        qty,
                        cost: taker_cost * qty,
                    });
                    txn.push(LedgerOp::MintShares {
                        user: fill.maker_user,
                        market,
                        side: side.opposite(),
                        qty,
                        cost: maker_cost * qty,
                    });
                    out.spent += taker_cost * qty;
                    out.refund += taker_refund * qty;
                    out.volume += TOKEN_CENTS * qty;

                    // Mint trades are recorded on the YES side at the YES
                    // buyer's effective price.
                    let (yes_price, yes_buyer) = match side {
                        Side::Yes => (taker_cost, buyer),
                        Side::No => (maker_cost, fill.maker_user),
                    };
                    out.trades.push(Trade {
                        id: self.ids.next_trade_id(),
                        market_id: market,
                        side: Side::Yes,
                        kind: TradeKind::Mint,
                        price: yes_price,
                        quantity: qty,
                        buyer_id: yes_buyer,
                        seller_id: None,
                        created_at: now,
                    });
                }
            }
            out.filled += qty;
        }
    }

    /// A limit sell executes at its own ask price — the resting buyer pays
    /// the ask and gets the difference to their bid back off escrow. A
    /// market sell (`limit_price` None) has no ask price and executes at
    /// the resting bid.
    fn stage_sell_fills(
        &self,
        txn: &mut LedgerTxn,
        out: &mut StagedCommand,
        seller: UserId,
        side: Side,
        limit_price: Option<Cents>,
        fills: &[Fill],
    ) {
        let scope = self.market.scope;
        let market = self.market.id;
        let now = self.clock.now_millis();

        for fill in fills {
            let qty = fill.qty;
            let price = limit_price.unwrap_or(fill.price);
            out.touch(fill.maker_user);
            txn.debit_escrow(fill.maker_user, scope, price * qty);
            txn.release(fill.maker_user, scope, (fill.price - price) * qty);
            txn.credit(seller, scope, price * qty);
            txn.push(LedgerOp::TransferShares {
                from: seller,
                to: fill.maker_user,
                market,
                side,
                qty,
                price,
            });
            out.received += price * qty;
            out.volume += price * qty;
            out.filled += qty;
            out.trades.push(Trade {
                id: self.ids.next_trade_id(),
                market_id: market,
                side,
                kind: TradeKind::Match,
                price,
                quantity: qty,
                buyer_id: fill.maker_user,
                seller_id: Some(seller),
                created_at: now,
            });
        }
    }

    // ── Cancel / resolve / delete ────────────────────────────────────────

    fn cancel(&mut self, user: UserId, order_id: OrderId) -> Result<Report> {
        let owner = self
            .book
            .get(order_id)
            .map(|o| o.user_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if owner != user {
            return Err(EngineError::NotOrderOwner(order_id));
        }

        let mut order = self.book.remove(order_id).expect("order present");
        let mut txn = self.ledger.begin();
        let refund = self.stage_order_cancel(&mut txn, &mut order);
        self.commit_fills(txn)?;

        let mut out = StagedCommand::new(user);
        out.refund = refund;
        self.finish_command(out, vec![order.clone()], Some(order))
    }

    fn resolve(&mut self, outcome: Side) -> Result<Report> {
        self.check_share_symmetry()?;

        let mut txn = self.ledger.begin();
        let mut out = StagedCommand::new(0);
        let mut cancelled = self.stage_cancel_all(&mut txn, &mut out);

        // Winning shares pay one token each; losing shares burn for
        // nothing, which keeps the two sides' totals moving together.
        for (user, position) in self.ledger.positions_for_market(self.market.id) {
            txn.credit(user, self.market.scope, position.shares(outcome) * TOKEN_CENTS);
            self.stage_burn_position(&mut txn, user, &position);
            out.touch(user);
        }
        self.commit_fills(txn)?;

        self.market.status = MarketStatus::Resolved;
        self.market.outcome = Some(outcome);
        out.events.push(MarketEvent::MarketResolved { market_id: self.market.id, outcome });
        let report = self.finish_command(out, std::mem::take(&mut cancelled), None)?;
        Ok(report)
    }

    fn delete(&mut self) -> Result<Report> {
        let mut txn = self.ledger.begin();
        let mut out = StagedCommand::new(0);
        let mut cancelled = self.stage_cancel_all(&mut txn, &mut out);

        // Error-correction path: give every holder back what they paid to
        // enter their current position, then zero the books.
        for (user, position) in self.ledger.positions_for_market(self.market.id) {
            txn.credit(user, self.market.scope, position.yes_cost + position.no_cost);
            self.stage_burn_position(&mut txn, user, &position);
            out.touch(user);
        }
        self.commit_fills(txn)?;

        self.market.status = MarketStatus::Deleted;
        out.events.push(MarketEvent::MarketDeleted { market_id: self.market.id });
        let report = self.finish_command(out, std::mem::take(&mut cancelled), None)?;
        Ok(report)
    }

    /// Burn a holder's remaining shares on both sides. Runs after the
    /// cancel stage released every sell reservation in the same
    /// transaction, so nothing is still locked when the burn applies.
    fn stage_burn_position(&self, txn: &mut LedgerTxn, user: UserId, position: &crate::types::Position) {
        for side in [Side::Yes, Side::No] {
            let qty = position.shares(side);
            if qty > 0 {
                txn.push(LedgerOp::BurnShares { user, market: self.market.id, side, qty });
            }
        }
    }

    fn stage_cancel_all(&mut self, txn: &mut LedgerTxn, out: &mut StagedCommand) -> Vec<Order> {
        let mut cancelled = self.book.drain_all();
        for order in cancelled.iter_mut() {
            out.touch(order.user_id);
            self.stage_order_cancel(txn, order);
        }
        cancelled
    }

    /// Mark an order cancelled and stage the refund of whatever is still
    /// held against it: `price × remaining` escrow for buys, the remaining
    /// share reservation for sells. Returns the token refund.
    fn stage_order_cancel(&self, txn: &mut LedgerTxn, order: &mut Order) -> Cents {
        let remaining = order.remaining();
        order.status = OrderStatus::Cancelled;
        match order.kind {
            OrderKind::Buy => {
                let refund = order.price * remaining;
                txn.release(order.user_id, self.market.scope, refund);
                refund
            }
            OrderKind::Sell => {
                if remaining > 0 {
                    txn.push(LedgerOp::ReleaseShares {
                        user: order.user_id,
                        market: self.market.id,
                        side: order.side,
                        qty: remaining,
                    });
                }
                0
            }
        }
    }

    // ── Commit / persist / publish ───────────────────────────────────────

    /// Commit a fill-phase transaction. Every op only consumes value the
    /// command reserved earlier, so a failure here is an engine bug: the
    /// market halts rather than continue on corrupt state.
    fn commit_fills(&mut self, txn: LedgerTxn) -> Result<()> {
        if let Err(err) = self.ledger.commit(txn) {
            log::error!("market {}: halting, fill commit failed: {err}", self.market.id);
            self.halted = true;
            return Err(EngineError::InvariantViolation(err.to_string()));
        }
        Ok(())
    }

    fn apply_fills_to_book(&mut self, fills: &[Fill], out: &mut StagedCommand) -> Vec<Order> {
        let mut updated = Vec::new();
        for fill in fills {
            let maker = self
                .book
                .apply_fill(fill.maker_order, fill.qty)
                .expect("planned fill applies");
            updated.push(maker);
        }
        for trade in &out.trades {
            match trade.kind {
                TradeKind::Match => self.book.record_trade(trade.side, trade.price),
                TradeKind::Mint => {
                    self.book.record_trade(Side::Yes, trade.price);
                    self.book.record_trade(Side::No, TOKEN_CENTS - trade.price);
                }
            }
        }
        updated
    }

    /// Persist the batch, publish events, and assemble the report. Runs
    /// after the ledger commit; a store that stays down after retries halts
    /// the market so memory and disk cannot silently diverge.
    fn finish_command(
        &mut self,
        mut out: StagedCommand,
        orders: Vec<Order>,
        report_order: Option<Order>,
    ) -> Result<Report> {
        self.market.volume += out.volume;

        let mut batch = WriteBatch {
            orders,
            trades: out.trades.clone(),
            ..WriteBatch::default()
        };
        if out.volume > 0 || !self.market.is_active() {
            batch.market = Some(self.market.clone());
        }
        for user in &out.users {
            batch.balances.push((
                *user,
                self.market.scope,
                self.ledger.balance(*user, self.market.scope),
            ));
            batch.positions.push((*user, self.market.id, self.ledger.position(*user, self.market.id)));
        }
        self.persist(&batch)?;

        if cfg!(debug_assertions) {
            self.check_share_symmetry()?;
        }

        for trade in &out.trades {
            self.bus.publish(MarketEvent::trade(self.market.id, trade.clone()));
        }
        self.bus.publish(MarketEvent::OrderbookUpdate {
            snapshot: self.book.snapshot(self.config.snapshot_depth),
        });
        for user in &out.users {
            self.bus.publish(MarketEvent::PortfolioUpdate {
                market_id: self.market.id,
                user_id: *user,
                balance: self.ledger.balance(*user, self.market.scope),
                position: self.ledger.position(*user, self.market.id),
            });
        }
        for event in std::mem::take(&mut out.events) {
            self.bus.publish(event);
        }

        let avg_price = if out.filled > 0 {
            Some((out.spent + out.received) as f64 / out.filled as f64)
        } else {
            None
        };
        Ok(Report {
            order: report_order,
            trades: out.trades,
            shares_filled: out.filled,
            tokens_spent: out.spent,
            tokens_received: out.received,
            refund: out.refund,
            avg_price,
        })
    }

    fn persist(&mut self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            match self.store.apply(batch) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.persist_retries => {
                    attempt += 1;
                    log::warn!(
                        "market {}: persistence attempt {attempt} failed: {err}",
                        self.market.id
                    );
                }
                Err(err) => {
                    log::error!(
                        "market {}: halting, persistence failed after {attempt} retries: {err}",
                        self.market.id
                    );
                    self.halted = true;
                    return Err(EngineError::Unavailable(err.to_string()));
                }
            }
        }
    }

    fn check_share_symmetry(&mut self) -> Result<()> {
        let (yes, no) = self.ledger.share_totals(self.market.id);
        if yes != no {
            self.halted = true;
            log::error!(
                "market {}: halting, share symmetry broken (yes={yes}, no={no})",
                self.market.id
            );
            return Err(EngineError::InvariantViolation(format!(
                "share totals diverged: yes={yes}, no={no}"
            )));
        }
        Ok(())
    }
}

/// Effective per-unit cost to an incoming buyer at limit `p` minting
/// against a resting opposite bid at `q`: the buyer is charged `p` and half
/// the surplus over one token comes back (the odd cent stays with the
/// resting side).
fn mint_taker_cost(p: Cents, q: Cents) -> Cents {
    let surplus = p + q - TOKEN_CENTS;
    p - surplus / 2
}

/// Accumulator for everything a command stages before the final
/// persist/publish step.
struct StagedCommand {
    trades: Vec<Trade>,
    events: Vec<MarketEvent>,
    users: BTreeSet<UserId>,
    filled: i64,
    spent: Cents,
    received: Cents,
    refund: Cents,
    volume: Cents,
}

impl StagedCommand {
    fn new(caller: UserId) -> Self {
        let mut users = BTreeSet::new();
        if caller != 0 {
            users.insert(caller);
        }
        Self {
            trades: Vec::new(),
            events: Vec::new(),
            users,
            filled: 0,
            spent: 0,
            received: 0,
            refund: 0,
            volume: 0,
        }
    }

    fn touch(&mut self, user: UserId) {
        self.users.insert(user);
    }
}
