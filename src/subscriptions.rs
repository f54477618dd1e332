//! Relays market event streams to connected clients.
//!
//! Each subscription runs its own receiver task, so a slow client only
//! lags itself. Portfolio updates are delivered solely to the sink whose
//! user they name. Disconnected sinks are detected lazily: the first
//! failed delivery tears the subscription down.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use longshot_engine::{MarketEvent, MarketId, MarketRegistry, UserId};

/// One connected client's outbound channel. `deliver` returns false once
/// the peer is gone; the subscription is then dropped.
pub trait ClientSink: Send + Sync {
    fn deliver(&self, event: &MarketEvent) -> bool;
}

/// A sink backed by an unbounded channel, used by tests and embeddings
/// that pump events into their own transport.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<MarketEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<MarketEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClientSink for ChannelSink {
    fn deliver(&self, event: &MarketEvent) -> bool {
        self.tx.send(event.clone()).is_ok()
    }
}

pub type SubscriptionId = u64;

pub struct SubscriptionManager {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), tasks: Mutex::new(HashMap::new()) }
    }

    /// Attach a sink to a market's event stream. `user` scopes portfolio
    /// delivery; anonymous subscribers get only the broadcast events.
    pub fn subscribe(
        &self,
        registry: &MarketRegistry,
        market_id: MarketId,
        user: Option<UserId>,
        sink: Box<dyn ClientSink>,
    ) -> longshot_engine::Result<SubscriptionId> {
        let mut rx = registry.subscribe(market_id)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        match event.target_user() {
                            Some(target) if Some(target) != user => continue,
                            _ => {}
                        }
                        if !sink.deliver(&event) {
                            log::debug!("subscriber {id} gone, dropping subscription");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("subscriber {id} lagged, skipped {missed} events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.tasks
            .lock()
            .expect("subscription lock poisoned")
            .insert(id, task);
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(task) = self
            .tasks
            .lock()
            .expect("subscription lock poisoned")
            .remove(&id)
        {
            task.abort();
        }
    }

    pub fn active(&self) -> usize {
        self.tasks.lock().expect("subscription lock poisoned").len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
