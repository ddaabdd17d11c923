//! # Domain Entities
//!
//! Core data structures of the visit-verification pipeline.
//!
//! ```text
//! QrToken ──issue──→ ReplayRecord[ACTIVE] ──scan──→ ReplayRecord[CONSUMED]
//!                           │                               │
//!                           └──re-issue──→ [SUPERSEDED]     └──→ VisitRecord[PENDING]
//!
//! VisitRecord: [PENDING] ──ack──→ [SENT]
//!                 │  ↑
//!                 │  └──retry── [ERROR]
//!                 └──reject/exhausted──→ [ERROR]
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer identifier (opaque, assigned by the loyalty backend).
pub type ClientId = String;

/// Store branch identifier ("sucursal").
pub type BranchId = String;

/// Lowercase hex SHA-256 of the full encoded token string.
pub type ContentHash = String;

/// Locally generated visit identifier, doubles as the remote idempotency key.
pub type VisitId = Uuid;

/// Milliseconds since the unix epoch.
pub type Timestamp = u64;

/// Inclusive validity window of an issued token (5 minutes).
pub const VALIDITY_WINDOW_SECS: u64 = 300;

/// Default retention of settled replay records (30 days).
pub const DEFAULT_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;

/// Origin tag stamped on every visit created by a QR scan.
pub const ORIGIN_QR: &str = "QR";

// =============================================================================
// QR TOKEN
// =============================================================================

/// A visit-claim token as carried in a QR code.
///
/// `client_id` is known at issuance only. The wire format does not carry it;
/// a decoded token has `client_id == None` and the owner is recovered from
/// the replay ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrToken {
    /// Owning client (issuance side only)
    pub client_id: Option<ClientId>,
    /// Branch the visit is claimed at
    pub branch_id: BranchId,
    /// Issue time in unix seconds
    pub issued_at: u64,
    /// Opaque per-token nonce
    pub nonce: String,
    /// Hex digest over `branch|issued_at|nonce`
    pub digest: String,
}

// =============================================================================
// REPLAY LEDGER
// =============================================================================

/// Lifecycle of an issued token inside the replay ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenState {
    /// Issued and redeemable.
    Active,
    /// Redeemed by a successful scan.
    Consumed,
    /// Replaced by a newer token for the same client.
    Superseded,
}

/// Persistent anti-replay entry, keyed by content hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub content_hash: ContentHash,
    pub state: TokenState,
    pub owner_client_id: ClientId,
    pub branch_id: BranchId,
    /// Issue time in unix seconds (copied from the token)
    pub issued_at: u64,
    /// Last state change, ms since epoch
    pub updated_at: Timestamp,
}

impl ReplayRecord {
    pub fn is_active(&self) -> bool {
        self.state == TokenState::Active
    }
}

// =============================================================================
// VISIT RECORDS
// =============================================================================

/// Sync status of a visit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisitStatus {
    /// Durable locally, awaiting remote confirmation.
    Pending,
    /// Confirmed by the remote authority.
    Sent,
    /// Rejected remotely or out of transport attempts.
    Error,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Pending => "PENDING",
            VisitStatus::Sent => "SENT",
            VisitStatus::Error => "ERROR",
        }
    }

    /// Whether the sync engine may move a record from `self` to `next`.
    pub fn can_transition_to(&self, next: VisitStatus) -> bool {
        matches!(
            (self, next),
            (VisitStatus::Pending, VisitStatus::Sent)
                | (VisitStatus::Pending, VisitStatus::Error)
                | (VisitStatus::Error, VisitStatus::Pending)
        )
    }
}

impl std::fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offline-first record of a redeemed visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub visit_id: VisitId,
    pub client_id: ClientId,
    pub branch_id: BranchId,
    /// When the scan was accepted, ms since epoch
    pub occurred_at: Timestamp,
    /// Always [`ORIGIN_QR`] for scanned visits
    pub origin: String,
    /// Content hash of the redeemed token
    pub token_hash: ContentHash,
    pub status: VisitStatus,
    /// Submission attempts that ended without a decided outcome
    pub attempts: u32,
    /// Reason of the last failed attempt, if any
    pub last_error: Option<String>,
    /// Opaque summary returned by the remote on acceptance
    pub remote_summary: Option<String>,
    pub updated_at: Timestamp,
}

impl VisitRecord {
    /// Create a fresh PENDING record for an accepted scan.
    pub fn pending(
        client_id: ClientId,
        branch_id: BranchId,
        token_hash: ContentHash,
        occurred_at: Timestamp,
    ) -> Self {
        Self {
            visit_id: Uuid::new_v4(),
            client_id,
            branch_id,
            occurred_at,
            origin: ORIGIN_QR.to_string(),
            token_hash,
            status: VisitStatus::Pending,
            attempts: 0,
            last_error: None,
            remote_summary: None,
            updated_at: occurred_at,
        }
    }
}

/// Per-status record counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitStats {
    pub pending: usize,
    pub sent: usize,
    pub error: usize,
}

impl VisitStats {
    pub fn total(&self) -> usize {
        self.pending + self.sent + self.error
    }
}
