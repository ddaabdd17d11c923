//! Result types of the ledger, the scan validator and the sync engine.

use serde::{Deserialize, Serialize};

use super::entities::{VisitId, VisitRecord};

/// Outcome of a replay-ledger consumption attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumeResult {
    /// The token was ACTIVE and is now CONSUMED.
    Consumed,
    /// The token was redeemed earlier.
    AlreadyConsumed,
    /// A newer token was issued for the same client.
    Superseded,
    /// No token with this content hash was ever issued (or it was purged).
    NotFound,
}

/// Why a scan was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    InvalidFormat,
    Expired,
    BadDigest,
    AlreadyUsed,
    Superseded,
    UnknownCode,
    /// Storage failure while checking or committing; logged at the validator.
    InternalError,
}

impl RejectReason {
    /// Stable reason code for UI display.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidFormat => "invalid-format",
            RejectReason::Expired => "expired",
            RejectReason::BadDigest => "bad-digest",
            RejectReason::AlreadyUsed => "already-used",
            RejectReason::Superseded => "superseded",
            RejectReason::UnknownCode => "unknown-code",
            RejectReason::InternalError => "internal-error",
        }
    }

    /// Map a non-consuming ledger result to its rejection reason.
    pub fn from_consume(result: ConsumeResult) -> Option<Self> {
        match result {
            ConsumeResult::Consumed => None,
            ConsumeResult::AlreadyConsumed => Some(RejectReason::AlreadyUsed),
            ConsumeResult::Superseded => Some(RejectReason::Superseded),
            ConsumeResult::NotFound => Some(RejectReason::UnknownCode),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Final state of one scan attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Token redeemed; the PENDING visit has been persisted.
    Accepted(VisitRecord),
    Rejected(RejectReason),
}

impl ScanOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ScanOutcome::Accepted(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ScanOutcome::Rejected(reason) => Some(*reason),
            ScanOutcome::Accepted(_) => None,
        }
    }
}

/// How a drain pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainStatus {
    /// Every PENDING record was attempted.
    Completed,
    /// Another pass was in flight; nothing was attempted.
    AlreadyRunning,
    /// Pending records could not be listed; nothing was attempted.
    Failed,
}

/// Remote summary passed through for one accepted visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedVisit {
    pub visit_id: VisitId,
    pub summary: Option<String>,
}

/// Result of one drain pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub status: DrainStatus,
    /// Records moved to SENT
    pub sent: usize,
    /// Records moved to ERROR, or whose local update failed
    pub failed: usize,
    /// Records left PENDING after a transport failure
    pub deferred: usize,
    /// Summaries of records moved to SENT, in submission order
    pub submitted: Vec<SubmittedVisit>,
}

impl DrainReport {
    pub fn with_status(status: DrainStatus) -> Self {
        Self {
            status,
            sent: 0,
            failed: 0,
            deferred: 0,
            submitted: Vec::new(),
        }
    }

    pub fn attempted(&self) -> usize {
        self.sent + self.failed + self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_codes() {
        assert_eq!(RejectReason::InvalidFormat.code(), "invalid-format");
        assert_eq!(RejectReason::Expired.code(), "expired");
        assert_eq!(RejectReason::BadDigest.code(), "bad-digest");
        assert_eq!(RejectReason::AlreadyUsed.code(), "already-used");
        assert_eq!(RejectReason::Superseded.code(), "superseded");
        assert_eq!(RejectReason::UnknownCode.code(), "unknown-code");
        assert_eq!(RejectReason::InternalError.to_string(), "internal-error");
    }

    #[test]
    fn test_from_consume() {
        assert_eq!(RejectReason::from_consume(ConsumeResult::Consumed), None);
        assert_eq!(
            RejectReason::from_consume(ConsumeResult::AlreadyConsumed),
            Some(RejectReason::AlreadyUsed)
        );
        assert_eq!(
            RejectReason::from_consume(ConsumeResult::Superseded),
            Some(RejectReason::Superseded)
        );
        assert_eq!(
            RejectReason::from_consume(ConsumeResult::NotFound),
            Some(RejectReason::UnknownCode)
        );
    }

    #[test]
    fn test_empty_report() {
        let report = DrainReport::with_status(DrainStatus::AlreadyRunning);
        assert_eq!(report.attempted(), 0);
        assert!(report.submitted.is_empty());
    }
}
