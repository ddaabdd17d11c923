//! # Adapters
//!
//! In-process implementations of the outbound ports.
//!
//! Production storage (RocksDB) and the HTTP gateway live in `qv-runtime`;
//! the adapters here back unit/integration tests and embedded use.

pub mod clock;
pub mod memory;
pub mod remote;

pub use clock::ManualTimeSource;
pub use memory::InMemoryKVStore;
pub use remote::InMemoryRemoteAuthority;
