//! Shared fixtures for engine tests: a funded ledger, a deterministic
//! clock, and a single-market engine wired to a no-op store.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::engine::{Command, IdGen, MatchingEngine, Report};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::persistence::NoopPersistence;
use crate::types::{
    Balance, BalanceScope, Cents, Market, MarketStatus, OrderKind, Position, Side, UserId,
};

pub const MARKET_ID: u64 = 1;

/// A directly driven engine for synchronous tests, bypassing the worker
/// queue. The ledger, bus, and clock are exposed for assertions.
pub struct EngineFixture {
    pub ledger: Arc<Ledger>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<ManualClock>,
    pub engine: MatchingEngine,
    scope: BalanceScope,
}

pub fn fixture() -> EngineFixture {
    fixture_with_scope(BalanceScope::Global)
}

pub fn fixture_with_scope(scope: BalanceScope) -> EngineFixture {
    let ledger = Arc::new(Ledger::new());
    let bus = Arc::new(EventBus::new(64));
    let clock = Arc::new(ManualClock::new(1_000));
    let market = Market {
        id: MARKET_ID,
        title: "test market".to_string(),
        description: String::new(),
        scope,
        status: MarketStatus::Active,
        outcome: None,
        volume: 0,
        resolve_at: None,
        created_at: 0,
    };
    let engine = MatchingEngine::new(
        market,
        Arc::clone(&ledger),
        Arc::new(NoopPersistence),
        clock.clone(),
        Arc::clone(&bus),
        Arc::new(IdGen::new()),
        EngineConfig::default(),
    );
    EngineFixture { ledger, bus, clock, engine, scope }
}

impl EngineFixture {
    /// Seed a YES/NO share pair directly in the ledger, keeping the
    /// per-market share totals symmetric.
    pub fn seed_pair(&self, yes_user: UserId, no_user: UserId, qty: i64, yes_price: Cents) {
        let mut txn = self.ledger.begin();
        txn.push(crate::ledger::LedgerOp::MintShares {
            user: yes_user,
            market: MARKET_ID,
            side: Side::Yes,
            qty,
            cost: yes_price * qty,
        });
        txn.push(crate::ledger::LedgerOp::MintShares {
            user: no_user,
            market: MARKET_ID,
            side: Side::No,
            qty,
            cost: (crate::types::TOKEN_CENTS - yes_price) * qty,
        });
        self.ledger.commit(txn).expect("seed commit");
    }

    pub fn fund(&self, user: UserId, cents: Cents) {
        let mut txn = self.ledger.begin();
        txn.credit(user, self.scope, cents);
        self.ledger.commit(txn).expect("funding commit");
    }

    pub fn balance(&self, user: UserId) -> Balance {
        self.ledger.balance(user, self.scope)
    }

    pub fn position(&self, user: UserId) -> Position {
        self.ledger.position(user, MARKET_ID)
    }

    pub fn limit(
        &mut self,
        user: UserId,
        side: Side,
        kind: OrderKind,
        price: Cents,
        quantity: i64,
    ) -> Result<Report> {
        self.clock.advance(1);
        self.engine
            .execute(Command::PlaceLimit { user, side, kind, price, quantity })
    }

    pub fn market_buy(&mut self, user: UserId, side: Side, budget: Cents) -> Result<Report> {
        self.clock.advance(1);
        self.engine.execute(Command::PlaceMarket {
            user,
            side,
            kind: OrderKind::Buy,
            budget: Some(budget),
            quantity: None,
        })
    }

    pub fn market_sell(&mut self, user: UserId, side: Side, quantity: i64) -> Result<Report> {
        self.clock.advance(1);
        self.engine.execute(Command::PlaceMarket {
            user,
            side,
            kind: OrderKind::Sell,
            budget: None,
            quantity: Some(quantity),
        })
    }

    pub fn cancel(&mut self, user: UserId, order_id: u64) -> Result<Report> {
        self.engine.execute(Command::Cancel { user, order_id })
    }

    pub fn resolve(&mut self, outcome: Side) -> Result<Report> {
        self.engine.execute(Command::Resolve { outcome })
    }

    pub fn delete(&mut self) -> Result<Report> {
        self.engine.execute(Command::Delete)
    }
}
