//! # Production Storage Adapters
//!
//! Enable the `rocksdb` feature (on by default) for durable storage:
//!
//! ```toml
//! qv-runtime = { path = "...", features = ["rocksdb"] }
//! ```
//!
//! Every store opened here is guarded by a [`DatabaseLock`] on its data
//! directory: the replay ledger's serialization point is per process, so two
//! processes must never share one ledger.

pub mod lock;

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

pub use lock::{DatabaseLock, LockError};

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbStore};

// Re-export the in-memory adapter for demos and tests
pub use qv_visit_verification::adapters::InMemoryKVStore;
