//! # Visit Record Store
//!
//! Durable, offline-first queue of redeemed visits.
//!
//! Records are created by the scan validator as part of the ledger's
//! consumption batch (`stage_create`), and afterwards only the sync engine
//! moves them between statuses. Mutating methods are therefore crate-private.
//!
//! ```text
//! visit/<visitId> -> bincode(VisitRecord)
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{VisitId, VisitRecord, VisitStats, VisitStatus, VisitStoreError};
use crate::ports::outbound::{BatchOperation, KeyValueStore, TimeSource};

const VISIT_PREFIX: &str = "visit/";

fn visit_key(visit_id: &VisitId) -> Vec<u8> {
    format!("{}{}", VISIT_PREFIX, visit_id).into_bytes()
}

/// Visit records over a shared key-value store.
pub struct VisitRecordStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn TimeSource>,
    /// Serializes read-modify-write status updates.
    update_lock: Mutex<()>,
}

impl VisitRecordStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            store,
            clock,
            update_lock: Mutex::new(()),
        }
    }

    /// Operations that persist a new record; committed by the caller.
    pub(crate) fn stage_create(
        &self,
        visit: &VisitRecord,
    ) -> Result<Vec<BatchOperation>, VisitStoreError> {
        Ok(vec![BatchOperation::put(
            visit_key(&visit.visit_id),
            encode(visit)?,
        )])
    }

    pub fn get(&self, visit_id: &VisitId) -> Result<Option<VisitRecord>, VisitStoreError> {
        self.store
            .get(&visit_key(visit_id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// All records, optionally filtered by status, oldest first.
    ///
    /// Undecodable rows are logged and skipped so one bad row cannot stall
    /// the sync queue.
    pub fn list(&self, status: Option<VisitStatus>) -> Result<Vec<VisitRecord>, VisitStoreError> {
        let mut visits: Vec<VisitRecord> = self
            .store
            .prefix_scan(VISIT_PREFIX.as_bytes())?
            .into_iter()
            .filter_map(|(key, value)| match decode(&value) {
                Ok(visit) => Some(visit),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "Skipping undecodable visit record");
                    None
                }
            })
            .filter(|visit| status.map_or(true, |s| visit.status == s))
            .collect();
        visits.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.visit_id.cmp(&b.visit_id))
        });
        Ok(visits)
    }

    pub fn pending(&self) -> Result<Vec<VisitRecord>, VisitStoreError> {
        self.list(Some(VisitStatus::Pending))
    }

    pub fn count(&self, status: VisitStatus) -> Result<usize, VisitStoreError> {
        Ok(self.list(Some(status))?.len())
    }

    pub fn stats(&self) -> Result<VisitStats, VisitStoreError> {
        let mut stats = VisitStats::default();
        for visit in self.list(None)? {
            match visit.status {
                VisitStatus::Pending => stats.pending += 1,
                VisitStatus::Sent => stats.sent += 1,
                VisitStatus::Error => stats.error += 1,
            }
        }
        Ok(stats)
    }

    /// Compare-and-set status transition.
    ///
    /// Fails with `StatusConflict` if the record is no longer in `from`, and
    /// with `IllegalTransition` for edges outside the lifecycle.
    pub(crate) fn transition<F>(
        &self,
        visit_id: &VisitId,
        from: VisitStatus,
        to: VisitStatus,
        mutate: F,
    ) -> Result<VisitRecord, VisitStoreError>
    where
        F: FnOnce(&mut VisitRecord),
    {
        if !from.can_transition_to(to) {
            return Err(VisitStoreError::IllegalTransition { from, to });
        }
        self.update(visit_id, from, |visit| {
            visit.status = to;
            mutate(visit);
        })
    }

    /// Record an undecided submission attempt; the status stays PENDING.
    pub(crate) fn record_deferral(
        &self,
        visit_id: &VisitId,
        error: &str,
    ) -> Result<VisitRecord, VisitStoreError> {
        self.update(visit_id, VisitStatus::Pending, |visit| {
            visit.attempts = visit.attempts.saturating_add(1);
            visit.last_error = Some(error.to_string());
        })
    }

    /// Remove a record regardless of status (manual purge).
    pub(crate) fn remove(&self, visit_id: &VisitId) -> Result<bool, VisitStoreError> {
        let _guard = self.update_lock.lock();
        if self.get(visit_id)?.is_none() {
            return Ok(false);
        }
        self.store.delete(&visit_key(visit_id))?;
        Ok(true)
    }

    fn update<F>(
        &self,
        visit_id: &VisitId,
        expected: VisitStatus,
        mutate: F,
    ) -> Result<VisitRecord, VisitStoreError>
    where
        F: FnOnce(&mut VisitRecord),
    {
        let _guard = self.update_lock.lock();
        let mut visit = self
            .get(visit_id)?
            .ok_or(VisitStoreError::NotFound(*visit_id))?;
        if visit.status != expected {
            return Err(VisitStoreError::StatusConflict {
                visit_id: *visit_id,
                expected,
                actual: visit.status,
            });
        }

        mutate(&mut visit);
        visit.updated_at = self.clock.now_millis();
        self.store.put(&visit_key(visit_id), &encode(&visit)?)?;
        debug!(visit_id = %visit_id, status = %visit.status, attempts = visit.attempts, "Visit updated");
        Ok(visit)
    }
}

fn encode(visit: &VisitRecord) -> Result<Vec<u8>, VisitStoreError> {
    bincode::serialize(visit).map_err(|e| VisitStoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<VisitRecord, VisitStoreError> {
    bincode::deserialize(bytes).map_err(|e| VisitStoreError::Serialization(e.to_string()))
}
