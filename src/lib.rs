//! # regsync
//!
//! Mirrors the metadata of one or more container registries (repositories,
//! tags, manifests and layers) into a local SQLite database, keeping it
//! current with differential syncs driven by a persistent job queue.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! regsync = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use regsync::config::{RegistryConfig, SyncConfig};
//! use regsync::registry::RegistryManager;
//! use regsync::store::{SqliteStore, Store};
//! use regsync::sync::{Scheduler, SyncEngine};
//!
//! let config = SyncConfig::from_env()?;
//! let registries = RegistryConfig::load_from_env()?;
//!
//! let store = Arc::new(SqliteStore::new(&config.database_path)?);
//! store.initialize()?;
//! let manager = Arc::new(RegistryManager::from_configs(&registries, config.request_timeout)?);
//!
//! Scheduler::new(store.clone(), manager.clone(), config.max_attempts).schedule(&registries)?;
//! SyncEngine::new(store, manager, &config).drain()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `regsync` binary. Disable with `default-features = false`.

pub mod config;
pub mod error;
pub mod registry;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{Error, Result};
