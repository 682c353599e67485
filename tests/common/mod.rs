#![allow(dead_code)]

pub mod fake_registry;

use std::sync::Arc;
use std::time::Duration;

use regsync::config::{RegistryConfig, SyncConfig};
use regsync::registry::RegistryManager;
use regsync::store::{SqliteStore, Store};
use regsync::sync::{Scheduler, SyncEngine};
use tempfile::TempDir;

pub use fake_registry::FakeRegistry;

/// A database in a temp dir plus an engine wired to the given registries.
pub struct TestSync {
    _temp: TempDir,
    pub store: Arc<SqliteStore>,
    pub configs: Vec<RegistryConfig>,
    pub engine: SyncEngine,
    scheduler: Scheduler,
}

impl TestSync {
    pub fn new(configs: Vec<RegistryConfig>) -> Self {
        let temp = TempDir::new().unwrap();
        let config = SyncConfig {
            database_path: temp.path().join("regsync.db"),
            request_timeout: Duration::from_secs(5),
            ..SyncConfig::default()
        };
        let store = Arc::new(SqliteStore::new(&config.database_path).unwrap());
        store.initialize().unwrap();

        let manager = Arc::new(RegistryManager::from_configs(&configs, config.request_timeout).unwrap());
        let scheduler = Scheduler::new(store.clone(), manager.clone(), config.max_attempts);
        let engine = SyncEngine::new(store.clone(), manager, &config);

        Self {
            _temp: temp,
            store,
            configs,
            engine,
            scheduler,
        }
    }

    pub fn single(base_url: &str) -> Self {
        Self::new(vec![RegistryConfig::new("default", base_url)])
    }

    pub fn schedule(&self) {
        self.scheduler.schedule(&self.configs).unwrap();
    }

    /// Schedules a full pass and drains the queue.
    pub fn run(&self) {
        self.schedule();
        self.engine.drain().unwrap();
    }
}
