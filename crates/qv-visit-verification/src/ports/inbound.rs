//! # Inbound Port - VisitVerificationApi
//!
//! Primary driving port used by the customer and admin screens.
//!
//! | Method | Caller |
//! |--------|--------|
//! | `issue_token` | Customer "show my visit code" screen |
//! | `validate_scan` | Admin camera pipeline, once per decoded string |
//! | `pending_count`, `visits`, `stats` | Admin dashboards |
//! | `trigger_sync`, `retry_errors` | App foreground / manual retry |
//!
//! Callers must suppress further decodes of one physical scan session until
//! `validate_scan` resolves; the validator does not de-duplicate frames.

use async_trait::async_trait;

use crate::domain::{
    DrainReport, QrToken, ScanOutcome, ServiceError, VisitId, VisitRecord, VisitStats,
    VisitStatus,
};

/// Caller-facing API of the visit-verification pipeline.
///
/// No method panics or propagates storage failures: those are logged and
/// reported as `ServiceError::Internal`, `RejectReason::InternalError` or
/// `DrainStatus::Failed`.
#[async_trait]
pub trait VisitVerificationApi: Send + Sync {
    /// Issue a fresh token for `client_id`, superseding any active one.
    async fn issue_token(&self, client_id: &str, branch_id: &str)
        -> Result<QrToken, ServiceError>;

    /// Run one decoded payload through the scan pipeline.
    async fn validate_scan(&self, raw: &str) -> ScanOutcome;

    /// Number of visits awaiting remote confirmation.
    async fn pending_count(&self) -> Result<usize, ServiceError>;

    /// Run a drain pass now (skipped if one is already in flight).
    async fn trigger_sync(&self) -> DrainReport;

    /// Re-enqueue ERROR visits as PENDING. Returns how many were moved.
    async fn retry_errors(&self) -> Result<usize, ServiceError>;

    /// Look up one visit.
    async fn visit(&self, visit_id: VisitId) -> Result<VisitRecord, ServiceError>;

    /// List visits, optionally filtered by status, oldest first.
    async fn visits(&self, status: Option<VisitStatus>) -> Result<Vec<VisitRecord>, ServiceError>;

    /// Per-status counts.
    async fn stats(&self) -> Result<VisitStats, ServiceError>;

    /// Drop replay records past the retention window. Returns how many.
    async fn purge_expired_tokens(&self) -> Result<usize, ServiceError>;
}
