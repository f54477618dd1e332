use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::book::OrderbookSnapshot;
use crate::types::{Balance, MarketId, Position, Side, Trade, TradeKind, UserId};

/// Events published per market after each committed command.
///
/// `PortfolioUpdate` is targeted: the gateway delivers it only to the
/// sinks of the user it names.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    OrderbookUpdate {
        snapshot: OrderbookSnapshot,
    },
    TradeExecuted {
        market_id: MarketId,
        trade: Trade,
        minted: bool,
    },
    PortfolioUpdate {
        market_id: MarketId,
        user_id: UserId,
        balance: Balance,
        position: Position,
    },
    MarketResolved {
        market_id: MarketId,
        outcome: Side,
    },
    MarketDeleted {
        market_id: MarketId,
    },
}

impl MarketEvent {
    pub fn trade(market_id: MarketId, trade: Trade) -> Self {
        let minted = trade.kind == TradeKind::Mint;
        MarketEvent::TradeExecuted { market_id, trade, minted }
    }

    /// The user this event is addressed to, if it is not a broadcast.
    pub fn target_user(&self) -> Option<UserId> {
        match self {
            MarketEvent::PortfolioUpdate { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn market_id(&self) -> MarketId {
        match self {
            MarketEvent::OrderbookUpdate { snapshot } => snapshot.market_id,
            MarketEvent::TradeExecuted { market_id, .. }
            | MarketEvent::PortfolioUpdate { market_id, .. }
            | MarketEvent::MarketResolved { market_id, .. }
            | MarketEvent::MarketDeleted { market_id } => *market_id,
        }
    }
}

/// In-process pub/sub keyed by market id.
///
/// Each market gets a broadcast channel created on first use. Publishing
/// never blocks the engine: a send to a channel with no subscribers is a
/// no-op, and lagged subscribers lose the oldest events. Subscribers run
/// their receive loops on their own tasks, so slow consumers stay off the
/// matching path.
pub struct EventBus {
    capacity: usize,
    channels: RwLock<HashMap<MarketId, broadcast::Sender<MarketEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, channels: RwLock::new(HashMap::new()) }
    }

    /// The market's sender, creating the channel on demand.
    pub fn channel(&self, market_id: MarketId) -> broadcast::Sender<MarketEvent> {
        if let Some(tx) = self
            .channels
            .read()
            .ok()
            .and_then(|map| map.get(&market_id).cloned())
        {
            return tx;
        }
        let mut map = self.channels.write().expect("bus lock poisoned");
        map.entry(market_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, market_id: MarketId) -> broadcast::Receiver<MarketEvent> {
        self.channel(market_id).subscribe()
    }

    /// Best-effort publish; delivery failures only mean nobody is listening.
    pub fn publish(&self, event: MarketEvent) {
        let _ = self.channel(event.market_id()).send(event);
    }

    /// Drop a terminal market's channel. Existing receivers finish draining
    /// and then observe a closed stream.
    pub fn remove(&self, market_id: MarketId) {
        if let Ok(mut map) = self.channels.write() {
            map.remove(&market_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe(5);
        bus.publish(MarketEvent::MarketDeleted { market_id: 5 });
        match rx.recv().await.unwrap() {
            MarketEvent::MarketDeleted { market_id } => assert_eq!(market_id, 5),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        bus.publish(MarketEvent::MarketDeleted { market_id: 1 });
    }

    #[tokio::test]
    async fn events_are_scoped_per_market() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe(1);
        let mut rx_b = bus.subscribe(2);
        bus.publish(MarketEvent::MarketDeleted { market_id: 2 });
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            MarketEvent::MarketDeleted { market_id: 2 }
        ));
    }

    #[test]
    fn portfolio_updates_are_targeted() {
        let event = MarketEvent::PortfolioUpdate {
            market_id: 1,
            user_id: 9,
            balance: Balance::default(),
            position: Position::default(),
        };
        assert_eq!(event.target_user(), Some(9));
        assert_eq!(
            MarketEvent::MarketDeleted { market_id: 1 }.target_user(),
            None
        );
    }
}
