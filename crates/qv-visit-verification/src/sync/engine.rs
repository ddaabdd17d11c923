//! Drain pass implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::{
    DrainReport, DrainStatus, SubmittedVisit, VisitId, VisitRecord, VisitStatus, VisitStoreError,
};
use crate::ports::outbound::{RemoteError, RemoteVisitGateway, VisitSubmission};
use crate::visits::VisitRecordStore;

/// Releases the in-flight flag when the pass ends or its future is dropped.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Sync engine: owner of every visit status transition.
pub struct SyncEngine {
    visits: Arc<VisitRecordStore>,
    gateway: Arc<dyn RemoteVisitGateway>,
    in_flight: AtomicBool,
    submit_timeout: Duration,
    max_transport_attempts: Option<u32>,
}

impl SyncEngine {
    pub fn new(
        visits: Arc<VisitRecordStore>,
        gateway: Arc<dyn RemoteVisitGateway>,
        submit_timeout: Duration,
        max_transport_attempts: Option<u32>,
    ) -> Self {
        Self {
            visits,
            gateway,
            in_flight: AtomicBool::new(false),
            submit_timeout,
            max_transport_attempts,
        }
    }

    /// Whether a drain pass is currently running.
    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit every PENDING visit, oldest first.
    ///
    /// Returns immediately with `AlreadyRunning` if another pass holds the
    /// in-flight guard. Store reads and writes run on the blocking pool; only
    /// the submissions are awaited on the calling task.
    pub async fn drain_pending(&self) -> DrainReport {
        let _guard = match InFlightGuard::acquire(&self.in_flight) {
            Some(guard) => guard,
            None => {
                debug!("Drain pass already in flight, skipping");
                return DrainReport::with_status(DrainStatus::AlreadyRunning);
            }
        };

        let pending = match self.on_store(|visits| visits.pending()).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to list pending visits");
                return DrainReport::with_status(DrainStatus::Failed);
            }
        };

        let mut report = DrainReport::with_status(DrainStatus::Completed);
        if pending.is_empty() {
            return report;
        }
        info!(pending = pending.len(), "Draining pending visits");

        for visit in pending {
            let submission = VisitSubmission::from(&visit);
            let outcome = tokio::time::timeout(
                self.submit_timeout,
                self.gateway.submit_visit(submission),
            )
            .await
            .unwrap_or(Err(RemoteError::Timeout));

            match outcome {
                Ok(receipt) => self.mark_sent(&visit, receipt.summary, &mut report).await,
                Err(RemoteError::DuplicateKey { summary }) => {
                    debug!(visit_id = %visit.visit_id, "Remote already holds visit");
                    self.mark_sent(&visit, summary, &mut report).await
                }
                Err(e) if e.is_retryable() => self.defer(&visit, &e, &mut report).await,
                Err(RemoteError::Rejected { reason }) => {
                    self.mark_error(&visit, format!("rejected: {}", reason), &mut report)
                        .await
                }
                Err(e) => self.mark_error(&visit, e.to_string(), &mut report).await,
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            deferred = report.deferred,
            "Drain pass finished"
        );
        report
    }

    /// Move every ERROR visit back to PENDING. Returns how many moved.
    pub async fn retry_errors(&self) -> Result<usize, VisitStoreError> {
        let moved = self
            .on_store(|visits| {
                let mut moved = 0;
                for visit in visits.list(Some(VisitStatus::Error))? {
                    match visits.transition(
                        &visit.visit_id,
                        VisitStatus::Error,
                        VisitStatus::Pending,
                        |v| v.attempts = 0,
                    ) {
                        Ok(_) => moved += 1,
                        Err(VisitStoreError::StatusConflict { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(moved)
            })
            .await?;
        if moved > 0 {
            info!(moved, "Re-enqueued failed visits");
        }
        Ok(moved)
    }

    /// Drop a visit from the queue regardless of status.
    pub async fn purge(&self, visit_id: VisitId) -> Result<bool, VisitStoreError> {
        let removed = self.on_store(move |visits| visits.remove(&visit_id)).await?;
        if removed {
            warn!(visit_id = %visit_id, "Visit purged manually");
        }
        Ok(removed)
    }

    /// Run `op` against the visit store on the blocking pool.
    async fn on_store<T, F>(&self, op: F) -> Result<T, VisitStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&VisitRecordStore) -> Result<T, VisitStoreError> + Send + 'static,
    {
        let visits = self.visits.clone();
        tokio::task::spawn_blocking(move || op(&visits))
            .await
            .map_err(|e| VisitStoreError::TaskFailed(e.to_string()))?
    }

    async fn mark_sent(
        &self,
        visit: &VisitRecord,
        summary: Option<String>,
        report: &mut DrainReport,
    ) {
        let visit_id = visit.visit_id;
        let stored_summary = summary.clone();
        let updated = self
            .on_store(move |visits| {
                visits.transition(&visit_id, VisitStatus::Pending, VisitStatus::Sent, |v| {
                    v.remote_summary = stored_summary;
                    v.last_error = None;
                })
            })
            .await;
        match updated {
            Ok(_) => {
                report.sent += 1;
                report.submitted.push(SubmittedVisit { visit_id, summary });
            }
            Err(e) => {
                // Credited remotely; the next pass re-sends and gets DuplicateKey
                error!(visit_id = %visit_id, error = %e, "Failed to mark visit as sent");
                report.failed += 1;
            }
        }
    }

    async fn mark_error(&self, visit: &VisitRecord, reason: String, report: &mut DrainReport) {
        let visit_id = visit.visit_id;
        warn!(visit_id = %visit_id, reason = %reason, "Visit refused");
        let updated = self
            .on_store(move |visits| {
                visits.transition(&visit_id, VisitStatus::Pending, VisitStatus::Error, |v| {
                    v.last_error = Some(reason)
                })
            })
            .await;
        if let Err(e) = updated {
            error!(visit_id = %visit_id, error = %e, "Failed to mark visit as error");
        }
        report.failed += 1;
    }

    async fn defer(&self, visit: &VisitRecord, cause: &RemoteError, report: &mut DrainReport) {
        let visit_id = visit.visit_id;
        let message = cause.to_string();
        let updated = match self
            .on_store(move |visits| visits.record_deferral(&visit_id, &message))
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                error!(visit_id = %visit_id, error = %e, "Failed to record deferral");
                report.failed += 1;
                return;
            }
        };

        match self.max_transport_attempts {
            Some(limit) if updated.attempts >= limit => {
                let reason = format!("exhausted {} transport attempts: {}", limit, cause);
                self.mark_error(&updated, reason, report).await;
            }
            _ => {
                debug!(
                    visit_id = %visit_id,
                    attempts = updated.attempts,
                    error = %cause,
                    "Submission undecided, keeping visit pending"
                );
                report.deferred += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryKVStore, InMemoryRemoteAuthority, ManualTimeSource};
    use crate::domain::KVStoreError;
    use crate::ports::outbound::{BatchOperation, KeyValueStore};
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        engine: Arc<SyncEngine>,
        visits: Arc<VisitRecordStore>,
        remote: Arc<InMemoryRemoteAuthority>,
        kv: Arc<InMemoryKVStore>,
    }

    fn fixture(max_attempts: Option<u32>) -> Fixture {
        let kv = Arc::new(InMemoryKVStore::new());
        let clock = Arc::new(ManualTimeSource::new(1_000));
        let visits = Arc::new(VisitRecordStore::new(kv.clone(), clock));
        let remote = Arc::new(InMemoryRemoteAuthority::new());
        let engine = Arc::new(SyncEngine::new(
            visits.clone(),
            remote.clone(),
            Duration::from_millis(250),
            max_attempts,
        ));
        Fixture {
            engine,
            visits,
            remote,
            kv,
        }
    }

    fn add_pending(f: &Fixture, client: &str, at: u64) -> VisitRecord {
        let visit = VisitRecord::pending(client.into(), "B1".into(), "h".into(), at);
        f.kv.atomic_batch_write(f.visits.stage_create(&visit).unwrap())
            .unwrap();
        visit
    }

    fn status(f: &Fixture, visit: &VisitRecord) -> VisitStatus {
        f.visits.get(&visit.visit_id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_drain_marks_sent_and_passes_summary_through() {
        let f = fixture(None);
        let a = add_pending(&f, "C1", 1);
        let b = add_pending(&f, "C2", 2);

        let report = f.engine.drain_pending().await;
        assert_eq!(report.status, DrainStatus::Completed);
        assert_eq!(report.sent, 2);
        assert_eq!(report.submitted[0].visit_id, a.visit_id);
        assert!(report.submitted[0]
            .summary
            .as_deref()
            .unwrap()
            .contains("C1"));

        assert_eq!(status(&f, &a), VisitStatus::Sent);
        assert_eq!(status(&f, &b), VisitStatus::Sent);
        assert_eq!(
            f.visits.get(&a.visit_id).unwrap().unwrap().remote_summary,
            report.submitted[0].summary
        );
        assert_eq!(f.remote.credited_keys(), vec![a.visit_id, b.visit_id]);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let f = fixture(None);
        let report = f.engine.drain_pending().await;
        assert_eq!(report.status, DrainStatus::Completed);
        assert_eq!(report.attempted(), 0);
        assert_eq!(f.remote.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let f = fixture(None);
        f.remote.reject_client("C9");
        let visit = add_pending(&f, "C9", 1);

        let report = f.engine.drain_pending().await;
        assert_eq!(report.failed, 1);
        assert_eq!(status(&f, &visit), VisitStatus::Error);
        let stored = f.visits.get(&visit.visit_id).unwrap().unwrap();
        assert!(stored.last_error.unwrap().contains("not enrolled"));

        // Not retried automatically
        let report = f.engine.drain_pending().await;
        assert_eq!(report.attempted(), 0);
        assert_eq!(f.remote.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_pending() {
        let f = fixture(None);
        let visit = add_pending(&f, "C1", 1);
        f.remote.set_unreachable(true);

        for _ in 0..3 {
            let report = f.engine.drain_pending().await;
            assert_eq!(report.deferred, 1);
        }
        let stored = f.visits.get(&visit.visit_id).unwrap().unwrap();
        assert_eq!(stored.status, VisitStatus::Pending);
        assert_eq!(stored.attempts, 3);

        f.remote.set_unreachable(false);
        let report = f.engine.drain_pending().await;
        assert_eq!(report.sent, 1);
        assert_eq!(status(&f, &visit), VisitStatus::Sent);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transport_failure() {
        let f = fixture(None);
        let visit = add_pending(&f, "C1", 1);
        f.remote.set_latency(Duration::from_secs(1));

        let report = f.engine.drain_pending().await;
        assert_eq!(report.deferred, 1);
        let stored = f.visits.get(&visit.visit_id).unwrap().unwrap();
        assert_eq!(stored.status, VisitStatus::Pending);
        assert!(stored.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_lost_ack_resend_is_idempotent() {
        let f = fixture(None);
        let visit = add_pending(&f, "C1", 1);
        f.remote.lose_next_ack();

        let first = f.engine.drain_pending().await;
        assert_eq!(first.deferred, 1);
        assert_eq!(status(&f, &visit), VisitStatus::Pending);

        let second = f.engine.drain_pending().await;
        assert_eq!(second.sent, 1);
        assert_eq!(status(&f, &visit), VisitStatus::Sent);
        assert_eq!(f.remote.credits_for("C1"), 1);
        assert_eq!(f.remote.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_transport_attempts_move_to_error() {
        let f = fixture(Some(2));
        let visit = add_pending(&f, "C1", 1);
        f.remote.set_unreachable(true);

        let first = f.engine.drain_pending().await;
        assert_eq!(first.deferred, 1);
        let second = f.engine.drain_pending().await;
        assert_eq!(second.failed, 1);

        let stored = f.visits.get(&visit.visit_id).unwrap().unwrap();
        assert_eq!(stored.status, VisitStatus::Error);
        assert!(stored.last_error.unwrap().contains("exhausted 2"));
    }

    #[tokio::test]
    async fn test_retry_errors_reenqueues() {
        let f = fixture(None);
        f.remote.fail_next(RemoteError::Rejected {
            reason: "maintenance".into(),
        });
        let visit = add_pending(&f, "C1", 1);

        f.engine.drain_pending().await;
        assert_eq!(status(&f, &visit), VisitStatus::Error);

        assert_eq!(f.engine.retry_errors().await.unwrap(), 1);
        assert_eq!(status(&f, &visit), VisitStatus::Pending);
        assert_eq!(f.engine.retry_errors().await.unwrap(), 0);

        let report = f.engine.drain_pending().await;
        assert_eq!(report.sent, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_drains_are_rejected() {
        let f = fixture(None);
        add_pending(&f, "C1", 1);
        f.remote.set_latency(Duration::from_millis(100));

        let first = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.drain_pending().await })
        };
        while !f.engine.is_draining() {
            tokio::task::yield_now().await;
        }
        let second = f.engine.drain_pending().await;
        assert_eq!(second.status, DrainStatus::AlreadyRunning);

        let first = first.await.unwrap();
        assert_eq!(first.sent, 1);
        assert_eq!(f.remote.submission_count(), 1);
        assert!(!f.engine.is_draining());
    }

    #[tokio::test]
    async fn test_undecodable_rows_do_not_stall_drain() {
        let f = fixture(None);
        add_pending(&f, "C1", 1);
        f.kv.put(b"visit/x", b"not bincode").unwrap();

        let report = f.engine.drain_pending().await;
        assert_eq!(report.status, DrainStatus::Completed);
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn test_local_update_failure_is_counted_and_recovers() {
        let f = fixture(None);
        let visit = add_pending(&f, "C1", 1);
        f.kv.set_fail_writes(true);

        let report = f.engine.drain_pending().await;
        assert_eq!(report.failed, 1);
        assert_eq!(status(&f, &visit), VisitStatus::Pending);

        f.kv.set_fail_writes(false);
        let report = f.engine.drain_pending().await;
        assert_eq!(report.sent, 1);
        assert_eq!(f.remote.credits_for("C1"), 1);
    }

    #[tokio::test]
    async fn test_purge() {
        let f = fixture(None);
        let visit = add_pending(&f, "C1", 1);
        assert!(f.engine.purge(visit.visit_id).await.unwrap());
        assert!(!f.engine.purge(visit.visit_id).await.unwrap());
        assert_eq!(f.engine.drain_pending().await.attempted(), 0);
    }

    /// Memory store whose single-key writes stall like a synced disk.
    struct SlowWrites {
        inner: InMemoryKVStore,
        delay: Duration,
    }

    impl KeyValueStore for SlowWrites {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
            std::thread::sleep(self.delay);
            self.inner.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
            self.inner.delete(key)
        }

        fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
            self.inner.atomic_batch_write(operations)
        }

        fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
            self.inner.prefix_scan(prefix)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_store_writes_do_not_stall_executor() {
        let kv = Arc::new(SlowWrites {
            inner: InMemoryKVStore::new(),
            delay: Duration::from_millis(300),
        });
        let visits = Arc::new(VisitRecordStore::new(
            kv.clone(),
            Arc::new(ManualTimeSource::new(1_000)),
        ));
        let engine = SyncEngine::new(
            visits.clone(),
            Arc::new(InMemoryRemoteAuthority::new()),
            Duration::from_millis(250),
            None,
        );
        let visit = VisitRecord::pending("C1".into(), "B1".into(), "h".into(), 1);
        kv.atomic_batch_write(visits.stage_create(&visit).unwrap())
            .unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let report = engine.drain_pending().await;
        ticker.abort();

        assert_eq!(report.sent, 1);
        assert_eq!(
            visits.get(&visit.visit_id).unwrap().unwrap().status,
            VisitStatus::Sent
        );
        let advanced = ticks.load(Ordering::Relaxed);
        assert!(advanced >= 5, "executor stalled: {} ticks", advanced);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_retry_errors_runs_off_the_executor() {
        let kv = Arc::new(SlowWrites {
            inner: InMemoryKVStore::new(),
            delay: Duration::from_millis(200),
        });
        let visits = Arc::new(VisitRecordStore::new(
            kv.clone(),
            Arc::new(ManualTimeSource::new(1_000)),
        ));
        let remote = Arc::new(InMemoryRemoteAuthority::new());
        remote.reject_client("C9");
        let engine = SyncEngine::new(visits.clone(), remote, Duration::from_millis(250), None);
        let visit = VisitRecord::pending("C9".into(), "B1".into(), "h".into(), 1);
        kv.atomic_batch_write(visits.stage_create(&visit).unwrap())
            .unwrap();
        engine.drain_pending().await;

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        assert_eq!(engine.retry_errors().await.unwrap(), 1);
        ticker.abort();
        assert!(ticks.load(Ordering::Relaxed) >= 3);
    }
}
