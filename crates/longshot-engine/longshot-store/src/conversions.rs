//! Row ↔ domain conversions. Ids are stored as SQLite integers and cast
//! back to the engine's unsigned aliases; enums round-trip through the
//! integer codes the engine types define.

use longshot_engine::{
    Balance, BalanceScope, Market, MarketStatus, Order, OrderKind, OrderStatus, Position, Side,
    Trade, TradeKind,
};

use crate::Result;
use crate::models::{BalanceRow, MarketRow, OrderRow, PositionRow, TradeRow};

pub fn market_to_row(market: &Market, now_text: &str) -> MarketRow {
    MarketRow {
        id: market.id as i64,
        title: market.title.clone(),
        description: market.description.clone(),
        scope: market.scope.as_i64(),
        market_status: market.status.as_i32(),
        outcome: market.outcome.map(|s| s.as_i32()),
        volume: market.volume,
        resolve_at: market.resolve_at.map(|t| t as i64),
        created_at_ms: market.created_at as i64,
        updated_at: now_text.to_string(),
    }
}

pub fn row_to_market(row: MarketRow) -> Result<Market> {
    Ok(Market {
        id: row.id as u64,
        title: row.title,
        description: row.description,
        scope: BalanceScope::from_i64(row.scope),
        status: MarketStatus::from_i32(row.market_status)?,
        outcome: row.outcome.map(Side::from_i32).transpose()?,
        volume: row.volume,
        resolve_at: row.resolve_at.map(|t| t as u64),
        created_at: row.created_at_ms as u64,
    })
}

pub fn order_to_row(order: &Order, now_text: &str) -> OrderRow {
    OrderRow {
        id: order.id as i64,
        market_id: order.market_id as i64,
        user_id: order.user_id as i64,
        side: order.side.as_i32(),
        kind: order.kind.as_i32(),
        price: order.price,
        quantity: order.quantity,
        filled: order.filled,
        order_status: order.status.as_i32(),
        created_at_ms: order.created_at as i64,
        updated_at: now_text.to_string(),
    }
}

pub fn row_to_order(row: OrderRow) -> Result<Order> {
    Ok(Order {
        id: row.id as u64,
        market_id: row.market_id as u64,
        user_id: row.user_id as u64,
        side: Side::from_i32(row.side)?,
        kind: OrderKind::from_i32(row.kind)?,
        price: row.price,
        quantity: row.quantity,
        filled: row.filled,
        status: OrderStatus::from_i32(row.order_status)?,
        created_at: row.created_at_ms as u64,
    })
}

pub fn trade_to_row(trade: &Trade) -> TradeRow {
    TradeRow {
        id: trade.id as i64,
        market_id: trade.market_id as i64,
        side: trade.side.as_i32(),
        kind: trade.kind.as_i32(),
        price: trade.price,
        quantity: trade.quantity,
        buyer_id: trade.buyer_id as i64,
        seller_id: trade.seller_id.map(|u| u as i64),
        created_at_ms: trade.created_at as i64,
    }
}

pub fn row_to_trade(row: TradeRow) -> Result<Trade> {
    Ok(Trade {
        id: row.id as u64,
        market_id: row.market_id as u64,
        side: Side::from_i32(row.side)?,
        kind: TradeKind::from_i32(row.kind)?,
        price: row.price,
        quantity: row.quantity,
        buyer_id: row.buyer_id as u64,
        seller_id: row.seller_id.map(|u| u as u64),
        created_at: row.created_at_ms as u64,
    })
}

pub fn position_to_row(
    user_id: u64,
    market_id: u64,
    position: &Position,
    now_text: &str,
) -> PositionRow {
    PositionRow {
        user_id: user_id as i64,
        market_id: market_id as i64,
        yes_shares: position.yes_shares,
        no_shares: position.no_shares,
        yes_reserved: position.yes_reserved,
        no_reserved: position.no_reserved,
        yes_cost: position.yes_cost,
        no_cost: position.no_cost,
        updated_at: now_text.to_string(),
    }
}

pub fn row_to_position(row: PositionRow) -> (u64, u64, Position) {
    (
        row.user_id as u64,
        row.market_id as u64,
        Position {
            yes_shares: row.yes_shares,
            no_shares: row.no_shares,
            yes_reserved: row.yes_reserved,
            no_reserved: row.no_reserved,
            yes_cost: row.yes_cost,
            no_cost: row.no_cost,
        },
    )
}

pub fn balance_to_row(
    user_id: u64,
    scope: BalanceScope,
    balance: &Balance,
    now_text: &str,
) -> BalanceRow {
    BalanceRow {
        user_id: user_id as i64,
        scope: scope.as_i64(),
        available: balance.available,
        escrow: balance.escrow,
        updated_at: now_text.to_string(),
    }
}

pub fn row_to_balance(row: BalanceRow) -> (u64, BalanceScope, Balance) {
    (
        row.user_id as u64,
        BalanceScope::from_i64(row.scope),
        Balance { available: row.available, escrow: row.escrow },
    )
}
