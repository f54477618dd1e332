use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use longshot_engine::{
    Cents, EngineConfig, EngineError, IdGen, Ledger, MarketRegistry, Persistence, SystemClock,
};
use longshot_store::{SharedStore, StoreError};

use crate::gateway::Gateway;

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration, persisted as JSON next to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tokens granted to every new account, in cents.
    pub starting_balance_cents: Cents,
    /// Bearer-token lifetime.
    pub session_ttl_secs: u64,
    /// How long the gateway waits for a market worker to accept a command.
    pub command_timeout_ms: u64,
    /// Accounts registered with these emails become admins.
    pub admin_emails: Vec<String>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            starting_balance_cents: 100_000, // 1000 tokens
            session_ttl_secs: 7 * 24 * 3_600,
            command_timeout_ms: 5_000,
            admin_emails: Vec::new(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from a JSON file, falling back to defaults if the file
    /// is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("invalid config at {}: {e}; using defaults", path.display());
                    AppConfig::default()
                }
            },
            Err(_) => AppConfig::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self).expect("config serialises");
        std::fs::write(path, raw)
    }
}

// ============================================================================
// App wiring
// ============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The assembled platform: store, ledger, market workers, and gateway.
///
/// `open` performs the full recovery path — balances and positions are
/// restored into the ledger, id counters resume past the highest stored
/// ids, and each active market's book is rebuilt from its resting orders.
pub struct App {
    pub store: Arc<SharedStore>,
    pub registry: Arc<MarketRegistry>,
    pub gateway: Gateway,
}

impl App {
    pub fn open(db_path: &str, config: AppConfig) -> Result<App, AppError> {
        Self::build(SharedStore::open(db_path)?, config)
    }

    pub fn open_in_memory(config: AppConfig) -> Result<App, AppError> {
        Self::build(SharedStore::open_in_memory()?, config)
    }

    fn build(store: SharedStore, config: AppConfig) -> Result<App, AppError> {
        let store = Arc::new(store);

        let balances = store.with(|s| s.all_balances())?;
        let positions = store.with(|s| s.all_positions())?;
        let ledger = Arc::new(Ledger::restore(balances, positions));

        let (max_order, max_trade, max_market) = store.with(|s| s.max_ids())?;
        let ids = Arc::new(IdGen::resume(max_order, max_trade, max_market));

        let persistence: Arc<dyn Persistence> = store.clone();
        let registry = Arc::new(MarketRegistry::new(
            ledger,
            persistence,
            Arc::new(SystemClock),
            ids,
            config.engine.clone(),
        ));
        registry.recover()?;

        let gateway = Gateway::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::new(SystemClock),
            config,
        );
        Ok(App { store, registry, gateway })
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.starting_balance_cents, 100_000);
        assert!(config.admin_emails.is_empty());
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.admin_emails.push("root@example.com".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.admin_emails, vec!["root@example.com".to_string()]);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let loaded = AppConfig::load(Path::new("/nonexistent/config.json"));
        assert_eq!(loaded.command_timeout_ms, AppConfig::default().command_timeout_ms);
    }
}
