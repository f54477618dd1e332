//! End-to-end matching behaviour driven straight through the engine:
//! minting, same-side matching, market orders, and price-time priority.

use longshot_engine::testing::{EngineFixture, fixture};
use longshot_engine::{
    Balance, EngineError, OrderKind, OrderStatus, Side, TradeKind,
};

const A: u64 = 1;
const B: u64 = 2;
const C: u64 = 3;
const D: u64 = 4;

fn funded() -> EngineFixture {
    let fx = fixture();
    for user in [A, B, C, D] {
        fx.fund(user, 1_000);
    }
    fx
}

#[test]
fn crossing_yes_and_no_buys_mints_a_pair() {
    let mut fx = funded();

    // A: YES BUY 10 @ 60 rests; B: NO BUY 10 @ 40 crosses (60 + 40 = 100).
    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 10).unwrap();
    let report = fx.limit(B, Side::No, OrderKind::Buy, 40, 10).unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.kind, TradeKind::Mint);
    assert_eq!(trade.side, Side::Yes);
    assert_eq!(trade.price, 60);
    assert_eq!(trade.quantity, 10);
    assert_eq!(trade.seller_id, None);

    assert_eq!(fx.balance(A), Balance { available: 400, escrow: 0 });
    assert_eq!(fx.balance(B), Balance { available: 600, escrow: 0 });
    assert_eq!(fx.position(A).yes_shares, 10);
    assert_eq!(fx.position(B).no_shares, 10);
    assert_eq!(fx.ledger.share_totals(longshot_engine::testing::MARKET_ID), (10, 10));
}

#[test]
fn mint_surplus_is_split_between_both_buyers() {
    let mut fx = funded();

    // 60 + 50 = 110: 10 cents of surplus per unit, 5 back to each buyer.
    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 10).unwrap();
    let report = fx.limit(B, Side::No, OrderKind::Buy, 50, 10).unwrap();

    assert_eq!(report.tokens_spent, 450); // 50 - 5 per unit
    assert_eq!(report.refund, 50);
    assert_eq!(fx.balance(A), Balance { available: 450, escrow: 0 });
    assert_eq!(fx.balance(B), Balance { available: 550, escrow: 0 });
    // The pair is debited exactly one token per unit in total.
    assert_eq!(fx.balance(A).available + fx.balance(B).available, 2_000 - 10 * 100);
    assert_eq!(report.trades[0].price, 55);
}

#[test]
fn odd_mint_surplus_favours_the_resting_buyer() {
    let mut fx = funded();

    // 60 + 45 = 105: surplus 5, taker gets 2, resting maker gets 3.
    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 1).unwrap();
    let report = fx.limit(B, Side::No, OrderKind::Buy, 45, 1).unwrap();

    assert_eq!(report.tokens_spent, 43); // 45 - 2
    assert_eq!(fx.balance(A).available, 1_000 - 57); // 60 - 3
    assert_eq!(fx.balance(B).available, 1_000 - 43);
}

#[test]
fn taker_buy_fills_at_resting_ask_price_with_refund() {
    let mut fx = funded();
    fx.seed_pair(C, D, 5, 60);

    // C asks 5 YES @ 60; A bids up to 70 and pays only 60.
    fx.limit(C, Side::Yes, OrderKind::Sell, 60, 5).unwrap();
    let report = fx.limit(A, Side::Yes, OrderKind::Buy, 70, 5).unwrap();

    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].kind, TradeKind::Match);
    assert_eq!(report.trades[0].price, 60);
    assert_eq!(report.tokens_spent, 300);
    assert_eq!(report.refund, 50);
    assert_eq!(fx.balance(A), Balance { available: 700, escrow: 0 });
    assert_eq!(fx.balance(C).available, 1_300);
    assert_eq!(fx.position(A).yes_shares, 5);
    assert_eq!(fx.position(C).yes_shares, 0);
}

#[test]
fn taker_sell_fills_at_its_own_ask_price_refunding_the_bid() {
    let mut fx = funded();
    fx.seed_pair(C, D, 5, 55);

    // A: YES BUY 5 @ 70 rests; C sells 5 @ 60. Match executes at the ask:
    // A is debited 300 and gets the 10-cent difference back per share.
    fx.limit(A, Side::Yes, OrderKind::Buy, 70, 5).unwrap();
    let report = fx.limit(C, Side::Yes, OrderKind::Sell, 60, 5).unwrap();

    assert_eq!(report.trades[0].price, 60);
    assert_eq!(report.tokens_received, 300);
    assert_eq!(fx.balance(C).available, 1_300);
    assert_eq!(fx.balance(A), Balance { available: 700, escrow: 0 });
    assert_eq!(fx.position(A).yes_shares, 5);
}

#[test]
fn match_is_preferred_over_mint_at_equal_cost() {
    let mut fx = funded();
    fx.seed_pair(C, D, 5, 60);

    // Both routes would cost the taker 60: an ask at 60, and a NO bid at 40.
    fx.limit(C, Side::Yes, OrderKind::Sell, 60, 5).unwrap();
    fx.limit(B, Side::No, OrderKind::Buy, 40, 5).unwrap();
    let report = fx.limit(A, Side::Yes, OrderKind::Buy, 60, 5).unwrap();

    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].kind, TradeKind::Match);
    // Share supply unchanged: the existing pair moved, nothing minted.
    assert_eq!(fx.ledger.share_totals(longshot_engine::testing::MARKET_ID), (5, 5));
}

#[test]
fn cheaper_mint_wins_over_pricier_ask() {
    let mut fx = funded();
    fx.seed_pair(C, D, 5, 60);

    // Ask at 58 vs NO bid at 50: minting costs the taker 60 - 5 = 55.
    fx.limit(C, Side::Yes, OrderKind::Sell, 58, 5).unwrap();
    fx.limit(B, Side::No, OrderKind::Buy, 50, 5).unwrap();
    let report = fx.limit(A, Side::Yes, OrderKind::Buy, 60, 5).unwrap();

    assert_eq!(report.trades[0].kind, TradeKind::Mint);
    assert_eq!(report.tokens_spent, 275); // 55 per unit
}

#[test]
fn same_price_resting_orders_fill_in_arrival_order() {
    let mut fx = funded();
    fx.seed_pair(C, D, 10, 50);
    fx.seed_pair(C, D, 10, 50);

    let first = fx.limit(C, Side::Yes, OrderKind::Sell, 60, 10).unwrap();
    let second = fx.limit(C, Side::Yes, OrderKind::Sell, 60, 10).unwrap();
    let first_id = first.order.unwrap().id;
    let second_id = second.order.unwrap().id;

    let report = fx.limit(A, Side::Yes, OrderKind::Buy, 60, 10).unwrap();
    assert_eq!(report.trades.len(), 1);

    // The earlier ask is gone; the later one still rests untouched.
    assert!(fx.cancel(C, first_id).is_err());
    let cancelled = fx.cancel(C, second_id).unwrap().order.unwrap();
    assert_eq!(cancelled.filled, 0);
}

#[test]
fn partial_fill_rests_remainder_at_limit_price() {
    let mut fx = funded();
    fx.seed_pair(C, D, 4, 50);

    fx.limit(C, Side::Yes, OrderKind::Sell, 50, 4).unwrap();
    let report = fx.limit(A, Side::Yes, OrderKind::Buy, 55, 10).unwrap();

    let order = report.order.unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.filled, 4);
    assert_eq!(report.shares_filled, 4);
    // 4 filled at 50 plus 6 still escrowed at 55.
    assert_eq!(fx.balance(A), Balance { available: 1_000 - 200 - 330, escrow: 330 });
}

#[test]
fn market_buy_walks_the_cheapest_route_and_refunds_leftover() {
    let mut fx = funded();
    fx.fund(C, 10_000);
    fx.seed_pair(C, D, 2_000, 50);

    // Book: asks at 30 x5, 40 x5, 50 x1000.
    fx.limit(C, Side::Yes, OrderKind::Sell, 30, 5).unwrap();
    fx.limit(C, Side::Yes, OrderKind::Sell, 40, 5).unwrap();
    fx.limit(C, Side::Yes, OrderKind::Sell, 50, 1_000).unwrap();

    let report = fx.market_buy(A, Side::Yes, 300).unwrap();

    // 5 @ 30 (150) then 3 @ 40 (120); the fourth 40-cent share does not fit.
    assert_eq!(report.shares_filled, 8);
    assert_eq!(report.tokens_spent, 270);
    assert_eq!(report.refund, 30);
    assert_eq!(report.avg_price, Some(33.75));
    assert!(report.order.is_none());
    assert_eq!(fx.balance(A), Balance { available: 730, escrow: 0 });
}

#[test]
fn market_buy_can_mint_against_opposite_bids() {
    let mut fx = funded();

    // Only liquidity is a NO bid at 70: minting costs the buyer 30.
    fx.limit(B, Side::No, OrderKind::Buy, 70, 10).unwrap();
    let report = fx.market_buy(A, Side::Yes, 90).unwrap();

    assert_eq!(report.shares_filled, 3);
    assert_eq!(report.tokens_spent, 90);
    assert_eq!(report.refund, 0);
    assert_eq!(report.trades[0].kind, TradeKind::Mint);
    // Normalised YES price is the buyer's complement cost.
    assert_eq!(report.trades[0].price, 30);
    assert_eq!(fx.position(A).yes_shares, 3);
    assert_eq!(fx.position(B).no_shares, 3);
}

#[test]
fn market_sell_walks_bids_and_reports_unfilled_remainder() {
    let mut fx = funded();
    fx.seed_pair(A, D, 10, 50);

    fx.limit(B, Side::Yes, OrderKind::Buy, 45, 4).unwrap();
    fx.limit(C, Side::Yes, OrderKind::Buy, 40, 2).unwrap();

    let report = fx.market_sell(A, Side::Yes, 10).unwrap();

    assert_eq!(report.shares_filled, 6);
    assert_eq!(report.tokens_received, 4 * 45 + 2 * 40);
    // Unfilled shares are back in the position, unreserved.
    let pos = fx.position(A);
    assert_eq!(pos.yes_shares, 4);
    assert_eq!(pos.yes_reserved, 0);
}

#[test]
fn market_sell_requires_the_shares() {
    let mut fx = funded();
    let err = fx.market_sell(A, Side::Yes, 5).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientShares { needed: 5, available: 0 }));
}

#[test]
fn buy_without_balance_is_rejected_clean() {
    let mut fx = funded();
    let err = fx.limit(A, Side::Yes, OrderKind::Buy, 60, 100).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { needed: 6_000, available: 1_000 }));
    // Nothing changed.
    assert_eq!(fx.balance(A), Balance { available: 1_000, escrow: 0 });
    let snap = fx.engine.snapshot(None);
    assert!(snap.yes.bids.is_empty());
}

#[test]
fn sell_without_reserved_shares_is_rejected() {
    let mut fx = funded();
    fx.seed_pair(A, D, 5, 50);
    // First sell reserves all 5; a second sell has nothing left to back it.
    fx.limit(A, Side::Yes, OrderKind::Sell, 60, 5).unwrap();
    let err = fx.limit(A, Side::Yes, OrderKind::Sell, 60, 5).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientShares { needed: 5, available: 0 }));
}

#[test]
fn invalid_prices_and_quantities_are_rejected() {
    let mut fx = funded();
    assert!(matches!(
        fx.limit(A, Side::Yes, OrderKind::Buy, 0, 5),
        Err(EngineError::InvalidPrice(0))
    ));
    assert!(matches!(
        fx.limit(A, Side::Yes, OrderKind::Buy, 100, 5),
        Err(EngineError::InvalidPrice(100))
    ));
    assert!(matches!(
        fx.limit(A, Side::Yes, OrderKind::Buy, 50, -1),
        Err(EngineError::InvalidQuantity(-1))
    ));
    assert!(matches!(fx.market_buy(A, Side::Yes, 0), Err(EngineError::InvalidBudget(0))));
}

#[test]
fn own_resting_orders_are_never_self_matched() {
    let mut fx = funded();
    fx.seed_pair(A, D, 5, 50);

    fx.limit(A, Side::Yes, OrderKind::Sell, 60, 5).unwrap();
    // A's own ask at 60 is skipped; the buy rests instead of self-filling.
    let report = fx.limit(A, Side::Yes, OrderKind::Buy, 60, 5).unwrap();
    assert!(report.trades.is_empty());
    assert_eq!(report.order.unwrap().status, OrderStatus::Open);
}

#[test]
fn midpoints_track_quotes_and_trades() {
    let mut fx = funded();

    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 10).unwrap();
    let snap = fx.engine.snapshot(None);
    // One-sided book falls back to the default midpoint.
    assert_eq!(snap.yes.midpoint, 50.0);

    fx.limit(B, Side::No, OrderKind::Buy, 30, 10).unwrap();
    let snap = fx.engine.snapshot(None);
    // NO bid 30 implies nothing for YES yet; still no YES ask.
    assert_eq!(snap.no.bids.len(), 1);

    // Mint at YES 60: last-trade fallback moves both midpoints.
    fx.limit(C, Side::No, OrderKind::Buy, 40, 10).unwrap();
    let snap = fx.engine.snapshot(None);
    assert_eq!(snap.yes.midpoint, 60.0);
    assert_eq!(snap.no.midpoint, 40.0);
}
