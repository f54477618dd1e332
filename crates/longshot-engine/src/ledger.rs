use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::error::{EngineError, Result};
use crate::types::{Balance, BalanceScope, Cents, MarketId, Position, Side, UserId};

/// One user's holdings across all scopes and markets.
#[derive(Debug, Clone, Default)]
struct Account {
    balances: HashMap<BalanceScope, Balance>,
    positions: HashMap<MarketId, Position>,
}

/// Authoritative in-memory store of balances and positions.
///
/// Each user's account sits behind its own mutex. A [`LedgerTxn`] batches
/// mutations from one engine command; `commit` locks every involved account
/// in ascending user-id order (the deadlock-avoidance rule for cross-market
/// commands that touch the same users), validates every operation against a
/// scratch copy, and only then writes back. A failed commit therefore
/// mutates nothing.
pub struct Ledger {
    accounts: RwLock<HashMap<UserId, Arc<Mutex<Account>>>>,
}

/// A single balance/position mutation inside a transaction.
#[derive(Debug, Clone)]
pub enum LedgerOp {
    /// Move tokens from available to escrow. The only op that can fail on
    /// user funds.
    Reserve { user: UserId, scope: BalanceScope, amount: Cents },
    /// Move tokens from escrow back to available (cancel, price refund).
    Release { user: UserId, scope: BalanceScope, amount: Cents },
    /// Consume escrowed tokens (a fill spending the reservation).
    DebitEscrow { user: UserId, scope: BalanceScope, amount: Cents },
    /// Add tokens to available (sale proceeds, payouts, grants).
    Credit { user: UserId, scope: BalanceScope, amount: Cents },
    /// Lock owned shares behind an open sell order.
    ReserveShares { user: UserId, market: MarketId, side: Side, qty: i64 },
    /// Unlock reserved shares (cancel, unfilled market-sell remainder).
    ReleaseShares { user: UserId, market: MarketId, side: Side, qty: i64 },
    /// Create new shares for a mint fill at the given total cost.
    MintShares { user: UserId, market: MarketId, side: Side, qty: i64, cost: Cents },
    /// Move reserved shares from seller to buyer at the trade price.
    TransferShares {
        from: UserId,
        to: UserId,
        market: MarketId,
        side: Side,
        qty: i64,
        price: Cents,
    },
    /// Destroy shares (resolution payout, deletion). Cost is scaled down
    /// with the shares; an emptied position row is dropped.
    BurnShares { user: UserId, market: MarketId, side: Side, qty: i64 },
}

impl LedgerOp {
    fn users(&self, out: &mut Vec<UserId>) {
        match self {
            LedgerOp::Reserve { user, .. }
            | LedgerOp::Release { user, .. }
            | LedgerOp::DebitEscrow { user, .. }
            | LedgerOp::Credit { user, .. }
            | LedgerOp::ReserveShares { user, .. }
            | LedgerOp::ReleaseShares { user, .. }
            | LedgerOp::MintShares { user, .. }
            | LedgerOp::BurnShares { user, .. } => out.push(*user),
            LedgerOp::TransferShares { from, to, .. } => {
                out.push(*from);
                out.push(*to);
            }
        }
    }
}

/// Batched mutations for one engine command. Dropping an uncommitted
/// transaction is the rollback.
#[derive(Debug, Default)]
pub struct LedgerTxn {
    ops: Vec<LedgerOp>,
}

impl LedgerTxn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push(&mut self, op: LedgerOp) {
        self.ops.push(op);
    }

    pub fn reserve(&mut self, user: UserId, scope: BalanceScope, amount: Cents) {
        self.push(LedgerOp::Reserve { user, scope, amount });
    }

    pub fn release(&mut self, user: UserId, scope: BalanceScope, amount: Cents) {
        if amount > 0 {
            self.push(LedgerOp::Release { user, scope, amount });
        }
    }

    pub fn debit_escrow(&mut self, user: UserId, scope: BalanceScope, amount: Cents) {
        if amount > 0 {
            self.push(LedgerOp::DebitEscrow { user, scope, amount });
        }
    }

    pub fn credit(&mut self, user: UserId, scope: BalanceScope, amount: Cents) {
        if amount > 0 {
            self.push(LedgerOp::Credit { user, scope, amount });
        }
    }

    /// Every user this transaction touches, deduplicated and ascending.
    pub fn users(&self) -> Vec<UserId> {
        let mut users = Vec::new();
        for op in &self.ops {
            op.users(&mut users);
        }
        users.sort_unstable();
        users.dedup();
        users
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self { accounts: RwLock::new(HashMap::new()) }
    }

    /// Rebuild from durable rows at start-up.
    pub fn restore(
        balances: Vec<(UserId, BalanceScope, Balance)>,
        positions: Vec<(UserId, MarketId, Position)>,
    ) -> Self {
        let ledger = Self::new();
        {
            let mut accounts = ledger.accounts.write().expect("fresh lock");
            for (user, scope, balance) in balances {
                let account = accounts.entry(user).or_default();
                let mut guard = account.lock().expect("fresh lock");
                guard.balances.insert(scope, balance);
            }
            for (user, market, position) in positions {
                let account = accounts.entry(user).or_default();
                let mut guard = account.lock().expect("fresh lock");
                guard.positions.insert(market, position);
            }
        }
        ledger
    }

    pub fn begin(&self) -> LedgerTxn {
        LedgerTxn::new()
    }

    /// Apply a whole transaction atomically, or nothing at all.
    pub fn commit(&self, txn: LedgerTxn) -> Result<()> {
        let users = txn.users();
        if users.is_empty() {
            return Ok(());
        }

        let handles = self.handles_for(&users)?;
        // Lock in ascending user-id order; `users` is already sorted.
        let mut guards: Vec<(UserId, MutexGuard<'_, Account>)> = Vec::with_capacity(handles.len());
        for (user, handle) in &handles {
            let guard = handle.lock().map_err(|_| poisoned())?;
            guards.push((*user, guard));
        }

        // Validate against scratch copies before touching live state.
        let mut scratch: HashMap<UserId, Account> =
            guards.iter().map(|(user, guard)| (*user, (**guard).clone())).collect();
        for op in &txn.ops {
            apply_op(&mut scratch, op)?;
        }

        for (user, guard) in guards.iter_mut() {
            **guard = scratch.remove(user).expect("scratch entry for every locked user");
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn balance(&self, user: UserId, scope: BalanceScope) -> Balance {
        self.with_account(user, |account| {
            account.balances.get(&scope).copied().unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn position(&self, user: UserId, market: MarketId) -> Position {
        self.with_account(user, |account| {
            account.positions.get(&market).copied().unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn positions_for_user(&self, user: UserId) -> Vec<(MarketId, Position)> {
        self.with_account(user, |account| {
            let mut out: Vec<_> = account
                .positions
                .iter()
                .filter(|(_, p)| !p.is_empty())
                .map(|(m, p)| (*m, *p))
                .collect();
            out.sort_unstable_by_key(|(m, _)| *m);
            out
        })
        .unwrap_or_default()
    }

    /// Every non-empty position in a market. Used by resolution/deletion
    /// and by the share-symmetry audit.
    pub fn positions_for_market(&self, market: MarketId) -> Vec<(UserId, Position)> {
        let accounts = match self.accounts.read() {
            Ok(a) => a,
            Err(_) => return Vec::new(),
        };
        let mut out = Vec::new();
        for (user, handle) in accounts.iter() {
            if let Ok(guard) = handle.lock()
                && let Some(position) = guard.positions.get(&market)
                && !position.is_empty()
            {
                out.push((*user, *position));
            }
        }
        out.sort_unstable_by_key(|(user, _)| *user);
        out
    }

    /// `(Σ yes_shares, Σ no_shares)` for a market. Minting creates both
    /// sides together, so the two sums must always be equal.
    pub fn share_totals(&self, market: MarketId) -> (i64, i64) {
        self.positions_for_market(market)
            .iter()
            .fold((0, 0), |(yes, no), (_, p)| (yes + p.yes_shares, no + p.no_shares))
    }

    /// Snapshot of all balance rows (used when persisting after a grant).
    pub fn balances_for_user(&self, user: UserId) -> Vec<(BalanceScope, Balance)> {
        self.with_account(user, |account| {
            let mut out: Vec<_> = account.balances.iter().map(|(s, b)| (*s, *b)).collect();
            out.sort_unstable_by_key(|(s, _)| s.as_i64());
            out
        })
        .unwrap_or_default()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn with_account<T>(&self, user: UserId, f: impl FnOnce(&Account) -> T) -> Option<T> {
        let accounts = self.accounts.read().ok()?;
        let handle = accounts.get(&user)?;
        let guard = handle.lock().ok()?;
        Some(f(&guard))
    }

    fn handles_for(&self, users: &[UserId]) -> Result<Vec<(UserId, Arc<Mutex<Account>>)>> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        Ok(users
            .iter()
            .map(|user| (*user, Arc::clone(accounts.entry(*user).or_default())))
            .collect())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> EngineError {
    EngineError::InvariantViolation("ledger lock poisoned".to_string())
}

fn apply_op(scratch: &mut HashMap<UserId, Account>, op: &LedgerOp) -> Result<()> {
    match *op {
        LedgerOp::Reserve { user, scope, amount } => {
            check_amount(amount)?;
            let balance = balance_mut(scratch, user, scope);
            if balance.available < amount {
                return Err(EngineError::InsufficientBalance {
                    needed: amount,
                    available: balance.available,
                });
            }
            balance.available -= amount;
            balance.escrow += amount;
        }
        LedgerOp::Release { user, scope, amount } => {
            check_amount(amount)?;
            let balance = balance_mut(scratch, user, scope);
            if balance.escrow < amount {
                return Err(EngineError::InvariantViolation(format!(
                    "release of {amount} exceeds escrow {} for user {user}",
                    balance.escrow
                )));
            }
            balance.escrow -= amount;
            balance.available += amount;
        }
        LedgerOp::DebitEscrow { user, scope, amount } => {
            check_amount(amount)?;
            let balance = balance_mut(scratch, user, scope);
            if balance.escrow < amount {
                return Err(EngineError::InvariantViolation(format!(
                    "debit of {amount} exceeds escrow {} for user {user}",
                    balance.escrow
                )));
            }
            balance.escrow -= amount;
        }
        LedgerOp::Credit { user, scope, amount } => {
            check_amount(amount)?;
            balance_mut(scratch, user, scope).available += amount;
        }
        LedgerOp::ReserveShares { user, market, side, qty } => {
            check_qty(qty)?;
            let position = position_mut(scratch, user, market);
            let available = position.available(side);
            if available < qty {
                return Err(EngineError::InsufficientShares { needed: qty, available });
            }
            position.add_reserved(side, qty);
        }
        LedgerOp::ReleaseShares { user, market, side, qty } => {
            check_qty(qty)?;
            let position = position_mut(scratch, user, market);
            if position.reserved(side) < qty {
                return Err(EngineError::InvariantViolation(format!(
                    "share release of {qty} exceeds reservation for user {user}"
                )));
            }
            position.sub_reserved(side, qty);
        }
        LedgerOp::MintShares { user, market, side, qty, cost } => {
            check_qty(qty)?;
            check_amount(cost)?;
            position_mut(scratch, user, market).add_shares(side, qty, cost);
        }
        LedgerOp::TransferShares { from, to, market, side, qty, price } => {
            check_qty(qty)?;
            let seller = position_mut(scratch, from, market);
            if seller.reserved(side) < qty || seller.shares(side) < qty {
                return Err(EngineError::InvariantViolation(format!(
                    "transfer of {qty} {side:?} shares exceeds reservation for user {from}"
                )));
            }
            seller.sub_reserved(side, qty);
            seller.remove_shares(side, qty);
            position_mut(scratch, to, market).add_shares(side, qty, price * qty);
        }
        LedgerOp::BurnShares { user, market, side, qty } => {
            check_qty(qty)?;
            let position = position_mut(scratch, user, market);
            if position.shares(side) < qty || position.available(side) < qty {
                return Err(EngineError::InvariantViolation(format!(
                    "burn of {qty} {side:?} shares exceeds holdings for user {user}"
                )));
            }
            position.remove_shares(side, qty);
            if position.is_empty() && position.yes_reserved == 0 && position.no_reserved == 0 {
                scratch
                    .get_mut(&user)
                    .expect("account present")
                    .positions
                    .remove(&market);
            }
        }
    }
    Ok(())
}

fn check_amount(amount: Cents) -> Result<()> {
    if amount < 0 {
        return Err(EngineError::InvariantViolation(format!("negative amount: {amount}")));
    }
    Ok(())
}

fn check_qty(qty: i64) -> Result<()> {
    if qty <= 0 {
        return Err(EngineError::InvariantViolation(format!("non-positive share qty: {qty}")));
    }
    Ok(())
}

fn balance_mut(scratch: &mut HashMap<UserId, Account>, user: UserId, scope: BalanceScope) -> &mut Balance {
    scratch.entry(user).or_default().balances.entry(scope).or_default()
}

fn position_mut(scratch: &mut HashMap<UserId, Account>, user: UserId, market: MarketId) -> &mut Position {
    scratch.entry(user).or_default().positions.entry(market).or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: BalanceScope = BalanceScope::Global;

    fn funded(user: UserId, cents: Cents) -> Ledger {
        let ledger = Ledger::new();
        let mut txn = ledger.begin();
        txn.credit(user, G, cents);
        ledger.commit(txn).unwrap();
        ledger
    }

    #[test]
    fn reserve_moves_available_to_escrow() {
        let ledger = funded(1, 1000);
        let mut txn = ledger.begin();
        txn.reserve(1, G, 600);
        ledger.commit(txn).unwrap();
        assert_eq!(ledger.balance(1, G), Balance { available: 400, escrow: 600 });
    }

    #[test]
    fn overdrawn_reserve_fails_whole_txn() {
        let ledger = funded(1, 1000);
        let mut txn = ledger.begin();
        txn.credit(1, G, 50);
        txn.reserve(1, G, 2000);
        let err = ledger.commit(txn).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { needed: 2000, .. }));
        // The credit before the failing reserve must not have landed.
        assert_eq!(ledger.balance(1, G), Balance { available: 1000, escrow: 0 });
    }

    #[test]
    fn escrow_underrun_is_invariant_violation() {
        let ledger = funded(1, 1000);
        let mut txn = ledger.begin();
        txn.debit_escrow(1, G, 1);
        assert!(matches!(
            ledger.commit(txn),
            Err(EngineError::InvariantViolation(_))
        ));
    }

    #[test]
    fn transfer_requires_reserved_shares() {
        let ledger = funded(2, 0);
        let mut txn = ledger.begin();
        txn.push(LedgerOp::MintShares { user: 1, market: 9, side: Side::Yes, qty: 5, cost: 300 });
        ledger.commit(txn).unwrap();

        // Not reserved yet: transfer must fail.
        let mut txn = ledger.begin();
        txn.push(LedgerOp::TransferShares { from: 1, to: 2, market: 9, side: Side::Yes, qty: 5, price: 60 });
        assert!(ledger.commit(txn).is_err());

        let mut txn = ledger.begin();
        txn.push(LedgerOp::ReserveShares { user: 1, market: 9, side: Side::Yes, qty: 5 });
        txn.push(LedgerOp::TransferShares { from: 1, to: 2, market: 9, side: Side::Yes, qty: 5, price: 60 });
        ledger.commit(txn).unwrap();

        assert_eq!(ledger.position(1, 9).yes_shares, 0);
        let bought = ledger.position(2, 9);
        assert_eq!(bought.yes_shares, 5);
        assert_eq!(bought.yes_cost, 300);
    }

    #[test]
    fn org_scope_is_independent_of_global() {
        let ledger = funded(1, 1000);
        let mut txn = ledger.begin();
        txn.credit(1, BalanceScope::Org(7), 250);
        ledger.commit(txn).unwrap();

        let mut txn = ledger.begin();
        txn.reserve(1, BalanceScope::Org(7), 1000);
        assert!(ledger.commit(txn).is_err());
        assert_eq!(ledger.balance(1, G).available, 1000);
        assert_eq!(ledger.balance(1, BalanceScope::Org(7)).available, 250);
    }

    #[test]
    fn share_totals_stay_symmetric() {
        let ledger = Ledger::new();
        let mut txn = ledger.begin();
        txn.push(LedgerOp::MintShares { user: 1, market: 3, side: Side::Yes, qty: 10, cost: 600 });
        txn.push(LedgerOp::MintShares { user: 2, market: 3, side: Side::No, qty: 10, cost: 400 });
        ledger.commit(txn).unwrap();
        assert_eq!(ledger.share_totals(3), (10, 10));
    }

    #[test]
    fn burning_all_shares_drops_the_position_row() {
        let ledger = Ledger::new();
        let mut txn = ledger.begin();
        txn.push(LedgerOp::MintShares { user: 1, market: 3, side: Side::Yes, qty: 10, cost: 600 });
        ledger.commit(txn).unwrap();

        let mut txn = ledger.begin();
        txn.push(LedgerOp::BurnShares { user: 1, market: 3, side: Side::Yes, qty: 10 });
        ledger.commit(txn).unwrap();
        assert!(ledger.position(1, 3).is_empty());
        assert!(ledger.positions_for_market(3).is_empty());
    }

    #[test]
    fn burn_cannot_exceed_holdings_or_touch_reserved_shares() {
        let ledger = Ledger::new();
        let mut txn = ledger.begin();
        txn.push(LedgerOp::MintShares { user: 1, market: 3, side: Side::Yes, qty: 10, cost: 600 });
        txn.push(LedgerOp::ReserveShares { user: 1, market: 3, side: Side::Yes, qty: 4 });
        ledger.commit(txn).unwrap();

        let mut txn = ledger.begin();
        txn.push(LedgerOp::BurnShares { user: 1, market: 3, side: Side::Yes, qty: 8 });
        assert!(matches!(
            ledger.commit(txn),
            Err(EngineError::InvariantViolation(_))
        ));
    }
}
