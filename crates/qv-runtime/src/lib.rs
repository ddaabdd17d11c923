//! # Visit Verification Runtime
//!
//! Hosts the `qv-visit-verification` pipeline on production adapters.
//!
//! ## Modular Structure
//!
//! - `config` - `RuntimeConfig` loaded from `QV_*` environment variables
//! - `adapters/storage` - RocksDB store and data directory lock
//! - `adapters/remote` - HTTP gateway to the remote visit authority
//! - `runtime` - startup wiring

pub mod adapters;
pub mod config;
pub mod runtime;

pub use config::{load_config, RuntimeConfig, RuntimeConfigError};
pub use runtime::{Runtime, StorageMode};
