//! Order and market lifecycle: cancellation refunds, resolution payouts,
//! and the delete-with-refunds error-correction path.

use longshot_engine::testing::{EngineFixture, MARKET_ID, fixture};
use longshot_engine::{Balance, EngineError, MarketStatus, OrderKind, OrderStatus, Side};

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
fn cancelling_a_buy_refunds_remaining_escrow() {
    let mut fx = funded();

    let placed = fx.limit(A, Side::Yes, OrderKind::Buy, 50, 10).unwrap();
    assert_eq!(fx.balance(A), Balance { available: 500, escrow: 500 });

    let report = fx.cancel(A, placed.order.unwrap().id).unwrap();
    assert_eq!(report.refund, 500);
    assert_eq!(report.order.unwrap().status, OrderStatus::Cancelled);
    assert_eq!(fx.balance(A), Balance { available: 1_000, escrow: 0 });
}

#[test]
fn cancelling_a_partially_filled_buy_refunds_the_remainder() {
    let mut fx = funded();
    fx.seed_pair(C, D, 4, 50);

    fx.limit(C, Side::Yes, OrderKind::Sell, 50, 4).unwrap();
    let placed = fx.limit(A, Side::Yes, OrderKind::Buy, 50, 10).unwrap();

    let report = fx.cancel(A, placed.order.unwrap().id).unwrap();
    assert_eq!(report.refund, 6 * 50);
    assert_eq!(fx.balance(A), Balance { available: 800, escrow: 0 });
    assert_eq!(fx.position(A).yes_shares, 4);
}

#[test]
fn cancelling_a_sell_returns_the_reserved_shares() {
    let mut fx = funded();
    fx.seed_pair(A, D, 8, 50);

    let placed = fx.limit(A, Side::Yes, OrderKind::Sell, 60, 8).unwrap();
    assert_eq!(fx.position(A).yes_reserved, 8);

    fx.cancel(A, placed.order.unwrap().id).unwrap();
    let pos = fx.position(A);
    assert_eq!(pos.yes_shares, 8);
    assert_eq!(pos.yes_reserved, 0);
}

#[test]
fn only_the_owner_may_cancel() {
    let mut fx = funded();
    let placed = fx.limit(A, Side::Yes, OrderKind::Buy, 50, 5).unwrap();
    let id = placed.order.unwrap().id;
    assert!(matches!(fx.cancel(B, id), Err(EngineError::NotOrderOwner(_))));
    assert!(matches!(fx.cancel(A, 9_999), Err(EngineError::OrderNotFound(9_999))));
}

#[test]
fn resolution_pays_winning_shares_and_clears_positions() {
    let mut fx = funded();
    fx.seed_pair(C, D, 5, 55);

    // A buys 5 YES at 60 from C's ask; C keeps the proceeds, D holds NO.
    fx.limit(C, Side::Yes, OrderKind::Sell, 60, 5).unwrap();
    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 5).unwrap();
    assert_eq!(fx.balance(A).available, 700);

    fx.resolve(Side::Yes).unwrap();

    // A's 5 winning shares pay one token each.
    assert_eq!(fx.balance(A), Balance { available: 1_200, escrow: 0 });
    // C sold out before resolution; only the sale proceeds remain.
    assert_eq!(fx.balance(C), Balance { available: 1_300, escrow: 0 });
    // D's losing shares are discarded.
    assert_eq!(fx.balance(D), Balance { available: 1_000, escrow: 0 });
    assert!(fx.position(A).is_empty());
    assert!(fx.position(D).is_empty());
    assert_eq!(fx.engine.market().status, MarketStatus::Resolved);
    assert_eq!(fx.engine.market().outcome, Some(Side::Yes));
}

#[test]
fn resolution_cancels_and_refunds_open_orders() {
    let mut fx = funded();
    fx.seed_pair(C, D, 5, 55);

    fx.limit(A, Side::Yes, OrderKind::Buy, 40, 10).unwrap(); // escrow 400
    fx.limit(C, Side::Yes, OrderKind::Sell, 90, 5).unwrap(); // reserves 5 shares

    fx.resolve(Side::No).unwrap();

    // A's escrow comes back; C's shares were released, then discarded as
    // losers; D's NO shares pay out.
    assert_eq!(fx.balance(A), Balance { available: 1_000, escrow: 0 });
    assert_eq!(fx.balance(C), Balance { available: 1_000, escrow: 0 });
    assert_eq!(fx.balance(D), Balance { available: 1_500, escrow: 0 });
}

#[test]
fn resolved_market_rejects_everything() {
    let mut fx = funded();
    fx.resolve(Side::Yes).unwrap();

    assert!(matches!(
        fx.limit(A, Side::Yes, OrderKind::Buy, 50, 1),
        Err(EngineError::MarketClosed(MarketStatus::Resolved))
    ));
    assert!(matches!(
        fx.market_buy(A, Side::Yes, 100),
        Err(EngineError::MarketClosed(MarketStatus::Resolved))
    ));
    assert!(matches!(
        fx.resolve(Side::No),
        Err(EngineError::MarketClosed(MarketStatus::Resolved))
    ));
}

#[test]
fn delete_refunds_open_orders_and_position_costs() {
    let mut fx = funded();

    // A and B mint 3 pairs (A pays 180 at 60, B pays 120 at 40), then A
    // rests another buy.
    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 3).unwrap();
    fx.limit(B, Side::No, OrderKind::Buy, 40, 3).unwrap();
    fx.limit(A, Side::Yes, OrderKind::Buy, 50, 3).unwrap();

    fx.delete().unwrap();

    // Everyone is made whole: open-order escrow and position cost both
    // come back, and all share balances are zeroed.
    assert_eq!(fx.balance(A), Balance { available: 1_000, escrow: 0 });
    assert_eq!(fx.balance(B), Balance { available: 1_000, escrow: 0 });
    assert!(fx.position(A).is_empty());
    assert!(fx.position(B).is_empty());
    assert_eq!(fx.engine.market().status, MarketStatus::Deleted);
    assert_eq!(fx.ledger.share_totals(MARKET_ID), (0, 0));
}

#[test]
fn simple_place_then_cancel_is_a_noop_on_balance() {
    let mut fx = funded();
    let placed = fx.limit(A, Side::Yes, OrderKind::Buy, 50, 10).unwrap();
    fx.cancel(A, placed.order.unwrap().id).unwrap();
    assert_eq!(fx.balance(A), Balance { available: 1_000, escrow: 0 });
}

#[test]
fn volume_accumulates_per_fill() {
    let mut fx = funded();

    fx.limit(A, Side::Yes, OrderKind::Buy, 60, 10).unwrap();
    fx.limit(B, Side::No, OrderKind::Buy, 40, 10).unwrap();
    // One token per minted pair.
    assert_eq!(fx.engine.market().volume, 1_000);

    fx.limit(A, Side::Yes, OrderKind::Sell, 50, 5).unwrap();
    fx.limit(C, Side::Yes, OrderKind::Buy, 50, 5).unwrap();
    assert_eq!(fx.engine.market().volume, 1_000 + 250);
}
