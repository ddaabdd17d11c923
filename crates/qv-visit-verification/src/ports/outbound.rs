//! # Outbound Ports (Driven Ports)
//!
//! Dependencies the pipeline needs from its host:
//! - `KeyValueStore`: durable storage with atomic batches
//! - `TimeSource`: wall clock, abstracted for deterministic tests
//! - `RemoteVisitGateway`: the remote authority that credits visits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BranchId, ClientId, KVStoreError, Timestamp, VisitId, VisitRecord};

// =============================================================================
// STORAGE
// =============================================================================

/// Abstract interface for key-value database operations.
///
/// Production: `RocksDbStore` (qv-runtime/adapters/storage/rocksdb_adapter.rs)
/// Testing: `InMemoryKVStore` (adapters/memory.rs)
///
/// Implementations are shared between the replay ledger and the visit store
/// behind an `Arc`, so every method takes `&self`.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch are applied, or NONE are.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Iterate over keys with a prefix, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

// =============================================================================
// TIME
// =============================================================================

/// Time source for consistent timestamp handling.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since the unix epoch.
    fn now_millis(&self) -> Timestamp;

    /// Current time in whole seconds since the unix epoch.
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1_000
    }
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

// =============================================================================
// REMOTE AUTHORITY
// =============================================================================

/// Request sent to the remote authority for one visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitSubmission {
    /// `visit_id` of the local record; stable across retries
    pub idempotency_key: VisitId,
    pub client_id: ClientId,
    pub branch_id: BranchId,
    /// ms since epoch
    pub occurred_at: Timestamp,
    pub origin: String,
}

impl From<&VisitRecord> for VisitSubmission {
    fn from(visit: &VisitRecord) -> Self {
        Self {
            idempotency_key: visit.visit_id,
            client_id: visit.client_id.clone(),
            branch_id: visit.branch_id.clone(),
            occurred_at: visit.occurred_at,
            origin: visit.origin.clone(),
        }
    }
}

/// Confirmed acceptance of a submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Opaque progress/summary payload, passed through unchanged
    pub summary: Option<String>,
}

/// Errors from the remote authority.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The authority explicitly refused the visit. Terminal for the record.
    #[error("Rejected by remote: {reason}")]
    Rejected { reason: String },

    /// The authority already holds this idempotency key, i.e. an earlier
    /// attempt was applied even though its acknowledgement was lost.
    #[error("Duplicate idempotency key")]
    DuplicateKey { summary: Option<String> },

    /// No decided outcome was received. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No answer within the submission timeout. Retryable.
    #[error("Submission timed out")]
    Timeout,
}

impl RemoteError {
    /// Whether the submission outcome is undecided and may be re-sent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::Timeout)
    }
}

/// Gateway to the remote visit authority.
#[async_trait]
pub trait RemoteVisitGateway: Send + Sync {
    /// Submit one visit, keyed by its idempotency key.
    ///
    /// # Errors
    /// * `RemoteError::Rejected` - permanent refusal
    /// * `RemoteError::DuplicateKey` - key already applied remotely
    /// * `RemoteError::Transport` / `RemoteError::Timeout` - undecided
    async fn submit_visit(
        &self,
        submission: VisitSubmission,
    ) -> Result<SubmissionReceipt, RemoteError>;
}
