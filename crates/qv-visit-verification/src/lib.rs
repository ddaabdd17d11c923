//! # Visit Verification (qv)
//!
//! QR visit verification with local anti-replay and offline-first sync.
//!
//! A customer device shows a short-lived QR token; an admin device scans it,
//! checks it locally, records the visit durably, and later pushes it to the
//! remote authority.
//!
//! ## Architecture
//!
//! ```text
//! Customer ──issue_token──→ ReplayLedger (ACTIVE, supersedes previous)
//!                                │
//!                          QR payload  "branch|issuedAt|nonce|digest"
//!                                ↓
//! Admin ──validate_scan──→ ScanValidator ──→ ReplayLedger (CONSUMED)
//!                                │              + PENDING visit, one batch
//!                                ↓
//!                         VisitRecordStore ──→ SyncEngine ──→ remote authority
//!                                                (idempotency key = visit id)
//! ```
//!
//! ## Domain Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | At-most-once redemption | A token string is consumed at most once, even under concurrent scans |
//! | Single active token | Issuing a token supersedes the client's previous one |
//! | Inclusive validity window | `now - issued_at <= 300s` passes, `301s` is expired |
//! | Local first | An accepted scan creates a PENDING visit before any network I/O |
//! | Idempotent sync | Re-sending a visit never credits it twice |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Entities, codec, outcomes and errors
//! - `ports/` - Inbound API and outbound SPI (storage, clock, remote)
//! - `adapters/` - In-memory store, manual clock, in-process remote authority
//! - `ledger/` - Replay ledger
//! - `visits/` - Visit record store
//! - `validator.rs` - Scan pipeline
//! - `sync/` - Drain engine and scheduler
//! - `service.rs` - Application service implementing the API
//!
//! ## Usage
//!
//! ```ignore
//! use qv_visit_verification::{VisitVerificationApi, VisitVerificationService};
//!
//! let service = VisitVerificationService::new(store, gateway, clock, config)?;
//! let token = service.issue_token("C1", "B1").await?;
//! let outcome = service.validate_scan(&token.encode()).await;
//! let report = service.trigger_sync().await;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod ports;
pub mod service;
pub mod sync;
pub mod validator;
pub mod visits;

// Re-export key types for convenience
pub use adapters::{InMemoryKVStore, InMemoryRemoteAuthority, ManualTimeSource};
pub use config::{ConfigError, VisitVerificationConfig};
pub use domain::*;
pub use ledger::ReplayLedger;
pub use ports::inbound::VisitVerificationApi;
pub use ports::outbound::{
    BatchOperation, KeyValueStore, RemoteError, RemoteVisitGateway, SubmissionReceipt,
    SystemTimeSource, TimeSource, VisitSubmission,
};
pub use service::VisitVerificationService;
pub use sync::{SyncEngine, SyncScheduler};
pub use validator::ScanValidator;
pub use visits::VisitRecordStore;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
