//! # Scan Validator
//!
//! Admin-side pipeline run once per decoded QR payload.
//!
//! ```text
//! Decode ──→ Expiry ──→ Digest ──→ Ledger ──→ Accepted (+ PENDING visit)
//!   │           │          │          │
//!   ↓           ↓          ↓          ↓
//! invalid-   expired   bad-digest  already-used | superseded
//! format                           | unknown-code | internal-error
//! ```
//!
//! Stages run strictly in order and stop at the first failure. Every
//! rejection is side-effect free. On acceptance the ledger transition and the
//! new visit record are committed in one atomic batch.
//!
//! The validator keeps no state of its own and does not de-duplicate frames:
//! callers debounce decodes of one physical scan session.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::domain::{
    decode, validate_digest, ConsumeResult, LedgerError, RejectReason, ScanOutcome, VisitRecord,
};
use crate::ledger::ReplayLedger;
use crate::ports::outbound::TimeSource;
use crate::visits::VisitRecordStore;

/// Checks of a scan attempt, in execution order. A rejection names the
/// check that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanStage {
    Decode,
    Expiry,
    Digest,
    Ledger,
}

/// Stateless scan pipeline over the ledger and the visit store.
pub struct ScanValidator {
    ledger: Arc<ReplayLedger>,
    visits: Arc<VisitRecordStore>,
    clock: Arc<dyn TimeSource>,
    validity_window_secs: u64,
}

impl ScanValidator {
    pub fn new(
        ledger: Arc<ReplayLedger>,
        visits: Arc<VisitRecordStore>,
        clock: Arc<dyn TimeSource>,
        validity_window_secs: u64,
    ) -> Self {
        Self {
            ledger,
            visits,
            clock,
            validity_window_secs,
        }
    }

    /// Run `raw` through every stage.
    pub fn validate(&self, raw: &str) -> ScanOutcome {
        match self.run(raw) {
            Ok(visit) => {
                info!(
                    visit_id = %visit.visit_id,
                    client_id = %visit.client_id,
                    branch_id = %visit.branch_id,
                    "Scan accepted"
                );
                ScanOutcome::Accepted(visit)
            }
            Err((stage, reason)) => {
                debug!(?stage, reason = reason.code(), "Scan rejected");
                ScanOutcome::Rejected(reason)
            }
        }
    }

    fn run(&self, raw: &str) -> Result<VisitRecord, (ScanStage, RejectReason)> {
        let token = decode(raw).map_err(|e| {
            debug!(error = %e, "Undecodable payload");
            (ScanStage::Decode, RejectReason::InvalidFormat)
        })?;

        // Future-dated tokens pass: the window only bounds age
        let now = self.clock.now_secs();
        if now.saturating_sub(token.issued_at) > self.validity_window_secs {
            return Err((ScanStage::Expiry, RejectReason::Expired));
        }

        if !validate_digest(&token) {
            return Err((ScanStage::Digest, RejectReason::BadDigest));
        }

        let occurred_at = self.clock.now_millis();
        let visits = &self.visits;
        let consumed = self.ledger.consume_with(raw, |record| {
            let visit = VisitRecord::pending(
                record.owner_client_id.clone(),
                record.branch_id.clone(),
                record.content_hash.clone(),
                occurred_at,
            );
            let ops = visits
                .stage_create(&visit)
                .map_err(|e| LedgerError::Staging(e.to_string()))?;
            Ok((visit, ops))
        });

        match consumed {
            Ok((ConsumeResult::Consumed, Some(visit))) => Ok(visit),
            Ok((ConsumeResult::Consumed, None)) => {
                error!("Ledger reported consumption without a staged visit");
                Err((ScanStage::Ledger, RejectReason::InternalError))
            }
            Ok((result, _)) => Err((
                ScanStage::Ledger,
                RejectReason::from_consume(result).unwrap_or(RejectReason::InternalError),
            )),
            Err(e) => {
                error!(error = %e, "Ledger failure during scan");
                Err((ScanStage::Ledger, RejectReason::InternalError))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryKVStore, ManualTimeSource};
    use crate::domain::{compute_digest, VisitStatus, DIGEST_HEX_LEN};

    struct Fixture {
        validator: ScanValidator,
        ledger: Arc<ReplayLedger>,
        visits: Arc<VisitRecordStore>,
        kv: Arc<InMemoryKVStore>,
        clock: Arc<ManualTimeSource>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(InMemoryKVStore::new());
        let clock = Arc::new(ManualTimeSource::at_secs(1_700_000_000));
        let ledger = Arc::new(ReplayLedger::new(kv.clone(), clock.clone()));
        let visits = Arc::new(VisitRecordStore::new(kv.clone(), clock.clone()));
        let validator = ScanValidator::new(ledger.clone(), visits.clone(), clock.clone(), 300);
        Fixture {
            validator,
            ledger,
            visits,
            kv,
            clock,
        }
    }

    #[test]
    fn test_accepts_fresh_token_and_persists_pending_visit() {
        let f = fixture();
        let token = f.ledger.issue("C1", "B1").unwrap();

        let outcome = f.validator.validate(&token.encode());
        let visit = match outcome {
            ScanOutcome::Accepted(visit) => visit,
            other => panic!("expected acceptance, got {:?}", other),
        };
        assert_eq!(visit.client_id, "C1");
        assert_eq!(visit.branch_id, "B1");
        assert_eq!(visit.status, VisitStatus::Pending);
        assert_eq!(visit.token_hash, token.content_hash());
        assert_eq!(f.visits.get(&visit.visit_id).unwrap(), Some(visit));
    }

    #[test]
    fn test_second_scan_already_used() {
        let f = fixture();
        let raw = f.ledger.issue("C1", "B1").unwrap().encode();

        assert!(f.validator.validate(&raw).is_accepted());
        assert_eq!(
            f.validator.validate(&raw).reject_reason(),
            Some(RejectReason::AlreadyUsed)
        );
        assert_eq!(f.visits.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_format() {
        let f = fixture();
        assert_eq!(
            f.validator.validate("not a token").reject_reason(),
            Some(RejectReason::InvalidFormat)
        );
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let f = fixture();
        let at_limit = f.ledger.issue("C1", "B1").unwrap().encode();
        let past_limit = f.ledger.issue("C2", "B1").unwrap().encode();

        f.clock.advance_secs(300);
        assert!(f.validator.validate(&at_limit).is_accepted());

        f.clock.advance_secs(1);
        assert_eq!(
            f.validator.validate(&past_limit).reject_reason(),
            Some(RejectReason::Expired)
        );
    }

    #[test]
    fn test_expired_scan_leaves_token_active() {
        let f = fixture();
        let token = f.ledger.issue("C1", "B1").unwrap();
        f.clock.advance_secs(301);

        assert_eq!(
            f.validator.validate(&token.encode()).reject_reason(),
            Some(RejectReason::Expired)
        );
        assert!(f.ledger.active_record("C1").unwrap().is_some());
        assert!(f.visits.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_expiry_checked_before_digest() {
        let f = fixture();
        let issued_at = f.clock.now_secs() - 1_000;
        let raw = format!("B1|{}|nonce|{}", issued_at, "0".repeat(DIGEST_HEX_LEN));
        assert_eq!(
            f.validator.validate(&raw).reject_reason(),
            Some(RejectReason::Expired)
        );
    }

    #[test]
    fn test_every_single_digest_char_flip_is_detected() {
        let f = fixture();
        let token = f.ledger.issue("C1", "B1").unwrap();
        let raw = token.encode();
        let digest_start = raw.len() - DIGEST_HEX_LEN;

        for i in 0..DIGEST_HEX_LEN {
            let mut bytes = raw.clone().into_bytes();
            let original = bytes[digest_start + i];
            bytes[digest_start + i] = if original == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(bytes).unwrap();

            assert_eq!(
                f.validator.validate(&tampered).reject_reason(),
                Some(RejectReason::BadDigest),
                "flip at digest position {}",
                i
            );
        }
        // Rejections did not consume the genuine token
        assert!(f.validator.validate(&raw).is_accepted());
    }

    #[test]
    fn test_well_formed_unknown_token() {
        let f = fixture();
        let issued_at = f.clock.now_secs();
        let digest = compute_digest("B1", issued_at, "made-up");
        let raw = format!("B1|{}|made-up|{}", issued_at, digest);

        assert_eq!(
            f.validator.validate(&raw).reject_reason(),
            Some(RejectReason::UnknownCode)
        );
    }

    #[test]
    fn test_superseded_token_rejected() {
        let f = fixture();
        let first = f.ledger.issue("C1", "B1").unwrap().encode();
        f.clock.advance_secs(1);
        let second = f.ledger.issue("C1", "B1").unwrap().encode();

        assert_eq!(
            f.validator.validate(&first).reject_reason(),
            Some(RejectReason::Superseded)
        );
        assert!(f.validator.validate(&second).is_accepted());
    }

    #[test]
    fn test_storage_failure_is_internal_error_and_rolls_back() {
        let f = fixture();
        let raw = f.ledger.issue("C1", "B1").unwrap().encode();

        f.kv.set_fail_writes(true);
        assert_eq!(
            f.validator.validate(&raw).reject_reason(),
            Some(RejectReason::InternalError)
        );
        assert!(f.visits.list(None).unwrap().is_empty());
        assert!(f.ledger.active_record("C1").unwrap().is_some());

        f.kv.set_fail_writes(false);
        assert!(f.validator.validate(&raw).is_accepted());
    }

    #[test]
    fn test_rejections_do_not_write() {
        let f = fixture();
        let raw = f.ledger.issue("C1", "B1").unwrap().encode();
        assert!(f.validator.validate(&raw).is_accepted());
        let writes = f.kv.write_count();

        f.validator.validate("garbage");
        f.validator.validate(&raw);
        f.validator.validate(&format!("B1|1|n|{}", "a".repeat(DIGEST_HEX_LEN)));

        assert_eq!(f.kv.write_count(), writes);
    }

    fn failed_stage(f: &Fixture, raw: &str) -> ScanStage {
        match f.validator.run(raw) {
            Err((stage, _)) => stage,
            Ok(visit) => panic!("expected rejection, accepted {}", visit.visit_id),
        }
    }

    #[test]
    fn test_rejection_names_failing_stage() {
        let f = fixture();
        let now = f.clock.now_secs();

        assert_eq!(failed_stage(&f, "not a token"), ScanStage::Decode);

        let stale = format!("B1|{}|nonce|{}", now - 1_000, "0".repeat(DIGEST_HEX_LEN));
        assert_eq!(failed_stage(&f, &stale), ScanStage::Expiry);

        let forged = format!("B1|{}|nonce|{}", now, "0".repeat(DIGEST_HEX_LEN));
        assert_eq!(failed_stage(&f, &forged), ScanStage::Digest);

        let raw = f.ledger.issue("C1", "B1").unwrap().encode();
        f.kv.set_fail_writes(true);
        assert_eq!(failed_stage(&f, &raw), ScanStage::Ledger);
        f.kv.set_fail_writes(false);

        assert!(f.validator.validate(&raw).is_accepted());
        assert_eq!(failed_stage(&f, &raw), ScanStage::Ledger);
    }
}
