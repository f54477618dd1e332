use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::book::OrderbookSnapshot;
use crate::bus::{EventBus, MarketEvent};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::{Command, IdGen, MatchingEngine, Report};
use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::persistence::Persistence;
use crate::types::{BalanceScope, Market, MarketId, MarketStatus, Order};

/// Work item for a market worker. Reads go through the same queue as
/// trades, so external snapshot readers never race the matching loop.
enum EngineRequest {
    Execute { cmd: Command, reply: oneshot::Sender<Result<Report>> },
    Snapshot { depth: Option<usize>, reply: oneshot::Sender<OrderbookSnapshot> },
    Market { reply: oneshot::Sender<Market> },
}

struct MarketHandle {
    cmd_tx: mpsc::Sender<EngineRequest>,
    worker: JoinHandle<()>,
}

/// Owns one serial worker per market and routes commands to them.
///
/// Commands for one market are linearised through its bounded channel; the
/// worker consumes them one at a time on the blocking pool (matching and
/// persistence are synchronous by design). Workers for different markets
/// run in parallel; the shared [`Ledger`] is the only cross-market state.
pub struct MarketRegistry {
    ledger: Arc<Ledger>,
    store: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    ids: Arc<IdGen>,
    config: EngineConfig,
    markets: RwLock<HashMap<MarketId, MarketHandle>>,
}

impl MarketRegistry {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        ids: Arc<IdGen>,
        config: EngineConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.event_capacity));
        Self {
            ledger,
            store,
            clock,
            bus,
            ids,
            config,
            markets: RwLock::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Create a market, persist it, and start its worker.
    pub fn create_market(
        &self,
        title: String,
        description: String,
        scope: BalanceScope,
        resolve_at: Option<u64>,
    ) -> Result<Market> {
        let market = Market {
            id: self.ids.next_market_id(),
            title,
            description,
            scope,
            status: MarketStatus::Active,
            outcome: None,
            volume: 0,
            resolve_at,
            created_at: self.clock.now_millis(),
        };
        self.store
            .save_market(&market)
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        self.spawn_worker(market.clone(), Vec::new());
        Ok(market)
    }

    /// Rebuild workers for every persisted active market, restoring each
    /// book from its resting orders. Returns how many markets came back.
    pub fn recover(&self) -> Result<usize> {
        let markets = self
            .store
            .load_markets()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        let mut recovered = 0;
        for market in markets {
            if market.status != MarketStatus::Active {
                continue;
            }
            let orders = self
                .store
                .load_open_orders(market.id)
                .map_err(|e| EngineError::Unavailable(e.to_string()))?;
            self.spawn_worker(market, orders);
            recovered += 1;
        }
        if recovered > 0 {
            log::info!("recovered {recovered} active markets");
        }
        Ok(recovered)
    }

    /// Run a command on a market's worker. If its queue cannot accept the
    /// command within `deadline` the command is never enqueued and
    /// [`EngineError::Timeout`] is returned; once enqueued it runs to
    /// completion.
    pub async fn execute(&self, market_id: MarketId, cmd: Command, deadline: Duration) -> Result<Report> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(market_id, EngineRequest::Execute { cmd, reply: reply_tx }, deadline)
            .await?;
        reply_rx.await.map_err(|_| EngineError::WorkerGone)?
    }

    /// Aggregated depth + midpoints, serviced by the market's own worker.
    pub async fn snapshot(
        &self,
        market_id: MarketId,
        depth: Option<usize>,
        deadline: Duration,
    ) -> Result<OrderbookSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(market_id, EngineRequest::Snapshot { depth, reply: reply_tx }, deadline)
            .await?;
        reply_rx.await.map_err(|_| EngineError::WorkerGone)
    }

    /// Current market record (status, outcome, volume) from the worker.
    pub async fn market(&self, market_id: MarketId, deadline: Duration) -> Result<Market> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(market_id, EngineRequest::Market { reply: reply_tx }, deadline)
            .await?;
        reply_rx.await.map_err(|_| EngineError::WorkerGone)
    }

    /// Subscribe to a market's event stream.
    pub fn subscribe(&self, market_id: MarketId) -> Result<tokio::sync::broadcast::Receiver<MarketEvent>> {
        let markets = self.markets.read().expect("registry lock poisoned");
        if !markets.contains_key(&market_id) {
            return Err(EngineError::MarketNotFound(market_id));
        }
        Ok(self.bus.subscribe(market_id))
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        let markets = self.markets.read().expect("registry lock poisoned");
        let mut ids: Vec<MarketId> = markets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Close all command channels and wait for the workers to drain.
    pub async fn shutdown(&self) {
        let handles: Vec<MarketHandle> = {
            let mut markets = self.markets.write().expect("registry lock poisoned");
            markets.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            drop(handle.cmd_tx);
            if let Err(err) = handle.worker.await {
                log::warn!("market worker join failed: {err}");
            }
        }
    }

    async fn send(&self, market_id: MarketId, req: EngineRequest, deadline: Duration) -> Result<()> {
        let cmd_tx = {
            let markets = self.markets.read().expect("registry lock poisoned");
            markets
                .get(&market_id)
                .map(|handle| handle.cmd_tx.clone())
                .ok_or(EngineError::MarketNotFound(market_id))?
        };
        match cmd_tx.send_timeout(req, deadline).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(EngineError::Timeout),
            Err(SendTimeoutError::Closed(_)) => Err(EngineError::WorkerGone),
        }
    }

    fn spawn_worker(&self, market: Market, restore: Vec<Order>) {
        let market_id = market.id;
        let mut engine = MatchingEngine::new(
            market,
            Arc::clone(&self.ledger),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.bus),
            Arc::clone(&self.ids),
            self.config.clone(),
        );
        engine.restore_book(restore);

        let (cmd_tx, rx) = mpsc::channel(self.config.command_queue_depth);
        let worker = tokio::task::spawn_blocking(move || run_worker(engine, rx));
        let mut markets = self.markets.write().expect("registry lock poisoned");
        markets.insert(market_id, MarketHandle { cmd_tx, worker });
    }
}

/// Serial command loop for one market. Stays up after the market turns
/// terminal so late commands get a proper `MARKET_CLOSED` and snapshot
/// reads keep working; exits when the registry drops the channel.
fn run_worker(mut engine: MatchingEngine, mut rx: mpsc::Receiver<EngineRequest>) {
    let market_id = engine.market().id;
    log::debug!("market {market_id}: worker started");
    while let Some(req) = rx.blocking_recv() {
        match req {
            EngineRequest::Execute { cmd, reply } => {
                let _ = reply.send(engine.execute(cmd));
            }
            EngineRequest::Snapshot { depth, reply } => {
                let _ = reply.send(engine.snapshot(depth));
            }
            EngineRequest::Market { reply } => {
                let _ = reply.send(engine.market().clone());
            }
        }
    }
    log::debug!("market {market_id}: worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::NoopPersistence;
    use crate::types::{OrderKind, Side};

    const DEADLINE: Duration = Duration::from_secs(1);

    fn registry() -> MarketRegistry {
        MarketRegistry::new(
            Arc::new(Ledger::new()),
            Arc::new(NoopPersistence),
            Arc::new(ManualClock::new(1_000)),
            Arc::new(IdGen::new()),
            EngineConfig::default(),
        )
    }

    fn fund(registry: &MarketRegistry, user: u64, cents: i64) {
        let mut txn = registry.ledger().begin();
        txn.credit(user, BalanceScope::Global, cents);
        registry.ledger().commit(txn).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commands_route_to_the_right_market() {
        let registry = registry();
        fund(&registry, 1, 10_000);
        let market = registry
            .create_market("Will it rain?".into(), String::new(), BalanceScope::Global, None)
            .unwrap();

        let report = registry
            .execute(
                market.id,
                Command::PlaceLimit { user: 1, side: Side::Yes, kind: OrderKind::Buy, price: 60, quantity: 10 },
                DEADLINE,
            )
            .await
            .unwrap();
        assert_eq!(report.order.as_ref().unwrap().quantity, 10);

        let snap = registry.snapshot(market.id, None, DEADLINE).await.unwrap();
        assert_eq!(snap.yes.bids.len(), 1);

        registry.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_market_is_not_found() {
        let registry = registry();
        let err = registry.snapshot(404, None, DEADLINE).await.unwrap_err();
        assert!(matches!(err, EngineError::MarketNotFound(404)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminal_market_rejects_trading_commands() {
        let registry = registry();
        fund(&registry, 1, 10_000);
        let market = registry
            .create_market("One and done".into(), String::new(), BalanceScope::Global, None)
            .unwrap();

        registry
            .execute(market.id, Command::Resolve { outcome: Side::Yes }, DEADLINE)
            .await
            .unwrap();

        let err = registry
            .execute(
                market.id,
                Command::PlaceLimit { user: 1, side: Side::Yes, kind: OrderKind::Buy, price: 50, quantity: 1 },
                DEADLINE,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketClosed(MarketStatus::Resolved)));

        // Snapshots still served for terminal markets.
        let snap = registry.snapshot(market.id, None, DEADLINE).await.unwrap();
        assert!(snap.yes.bids.is_empty());

        registry.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_see_trades() {
        let registry = registry();
        fund(&registry, 1, 10_000);
        fund(&registry, 2, 10_000);
        let market = registry
            .create_market("Subscribed".into(), String::new(), BalanceScope::Global, None)
            .unwrap();
        let mut rx = registry.subscribe(market.id).unwrap();

        registry
            .execute(
                market.id,
                Command::PlaceLimit { user: 1, side: Side::Yes, kind: OrderKind::Buy, price: 60, quantity: 5 },
                DEADLINE,
            )
            .await
            .unwrap();
        registry
            .execute(
                market.id,
                Command::PlaceLimit { user: 2, side: Side::No, kind: OrderKind::Buy, price: 40, quantity: 5 },
                DEADLINE,
            )
            .await
            .unwrap();

        let mut saw_trade = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, MarketEvent::TradeExecuted { minted: true, .. }) {
                saw_trade = true;
            }
        }
        assert!(saw_trade);

        registry.shutdown().await;
    }
}
