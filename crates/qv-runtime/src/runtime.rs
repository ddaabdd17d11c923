//! # Runtime Bootstrap
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Lock the data directory (durable storage only)
//! 3. Open storage
//! 4. Build the HTTP gateway
//! 5. Construct the service

use std::sync::Arc;

use anyhow::{Context, Result};
use qv_visit_verification::{
    InMemoryKVStore, KeyValueStore, SystemTimeSource, VisitVerificationService,
};
use tracing::{info, warn};

use crate::adapters::remote::HttpVisitGateway;
use crate::adapters::storage::DatabaseLock;
use crate::config::RuntimeConfig;

/// Storage backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMode {
    /// RocksDB under the configured data directory
    Durable,
    /// Process-local memory; everything is lost on exit
    InMemory,
}

/// A running pipeline and the resources it owns.
pub struct Runtime {
    // Declared before the lock so storage closes first
    service: Arc<VisitVerificationService>,
    _lock: Option<DatabaseLock>,
}

impl Runtime {
    pub fn open(config: &RuntimeConfig, mode: StorageMode) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let (store, lock) = open_store(config, mode)?;
        let gateway = HttpVisitGateway::new(&config.remote, config.service.submit_timeout())
            .context("Failed to build HTTP client")?;
        info!(url = gateway.url(), "Remote authority gateway ready");

        let service = VisitVerificationService::new(
            store,
            Arc::new(gateway),
            Arc::new(SystemTimeSource),
            config.service.clone(),
        )?;

        Ok(Self {
            service: Arc::new(service),
            _lock: lock,
        })
    }

    pub fn service(&self) -> &Arc<VisitVerificationService> {
        &self.service
    }
}

type OpenedStore = (Arc<dyn KeyValueStore>, Option<DatabaseLock>);

#[cfg(feature = "rocksdb")]
fn open_store(config: &RuntimeConfig, mode: StorageMode) -> Result<OpenedStore> {
    use crate::adapters::storage::{RocksDbConfig, RocksDbStore};

    if mode == StorageMode::InMemory {
        return Ok(in_memory());
    }

    let lock = DatabaseLock::acquire(&config.storage.data_dir)
        .context("Failed to lock data directory")?;
    let store = RocksDbStore::open(RocksDbConfig::from_storage(&config.storage))
        .context("Failed to open visit database")?;
    Ok((Arc::new(store), Some(lock)))
}

#[cfg(not(feature = "rocksdb"))]
fn open_store(_config: &RuntimeConfig, mode: StorageMode) -> Result<OpenedStore> {
    if mode == StorageMode::Durable {
        warn!("Built without the rocksdb feature; falling back to in-memory storage");
    }
    Ok(in_memory())
}

fn in_memory() -> OpenedStore {
    warn!("Using in-memory storage: visits and ledger state are lost on exit");
    (Arc::new(InMemoryKVStore::new()), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use qv_visit_verification::VisitVerificationApi;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RuntimeConfig {
        RuntimeConfig {
            storage: StorageConfig {
                data_dir: dir.path().to_path_buf(),
                sync_writes: false,
            },
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.remote.endpoint = "localhost".into();
        assert!(Runtime::open(&config, StorageMode::InMemory).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_runtime_issues_and_scans() {
        let temp = TempDir::new().unwrap();
        let runtime = Runtime::open(&config(&temp), StorageMode::InMemory).unwrap();
        let service = runtime.service();

        let raw = service.issue_token("C1", "B1").await.unwrap().encode();
        assert!(service.validate_scan(&raw).await.is_accepted());
        assert_eq!(service.pending_count().await.unwrap(), 1);
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn test_durable_runtime_holds_directory_lock() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);

        let first = Runtime::open(&config, StorageMode::Durable).unwrap();
        let second = Runtime::open(&config, StorageMode::Durable);
        assert!(second.is_err());

        drop(first);
        assert!(Runtime::open(&config, StorageMode::Durable).is_ok());
    }
}
