//! # Runtime Adapters
//!
//! - `storage/` - RocksDB store and data directory lock
//! - `remote/` - HTTP gateway to the remote visit authority

pub mod remote;
pub mod storage;
