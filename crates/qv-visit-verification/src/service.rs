//! # Visit Verification Service
//!
//! Wires the replay ledger, visit store, scan validator and sync engine over
//! one shared key-value store and implements [`VisitVerificationApi`].
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────────────────────────────────┐
//!  issue_token ────→│ ReplayLedger ─┐                      │
//!  validate_scan ──→│ ScanValidator ┴─→ KeyValueStore ←─┐  │
//!  visits / stats ─→│ VisitRecordStore ─────────────────┘  │
//!  trigger_sync ───→│ SyncEngine ──→ RemoteVisitGateway    │
//!                   └──────────────────────────────────────┘
//! ```
//!
//! Ledger and store work runs on tokio's blocking pool. Dropping a returned
//! future does not abort that work; it still runs to a decided outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::{ConfigError, VisitVerificationConfig};
use crate::domain::{
    DrainReport, LedgerError, QrToken, RejectReason, ScanOutcome, ServiceError, VisitId,
    VisitRecord, VisitStats, VisitStatus,
};
use crate::ledger::ReplayLedger;
use crate::ports::inbound::VisitVerificationApi;
use crate::ports::outbound::{KeyValueStore, RemoteVisitGateway, TimeSource};
use crate::sync::{SyncEngine, SyncScheduler};
use crate::validator::ScanValidator;
use crate::visits::VisitRecordStore;

/// The visit verification service.
pub struct VisitVerificationService {
    ledger: Arc<ReplayLedger>,
    visits: Arc<VisitRecordStore>,
    validator: Arc<ScanValidator>,
    engine: Arc<SyncEngine>,
    clock: Arc<dyn TimeSource>,
    config: VisitVerificationConfig,
}

impl VisitVerificationService {
    /// Create the service with the given dependencies.
    ///
    /// The store must not be shared with another service instance: the
    /// ledger's serialization point is per process.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn RemoteVisitGateway>,
        clock: Arc<dyn TimeSource>,
        config: VisitVerificationConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let ledger = Arc::new(ReplayLedger::new(store.clone(), clock.clone()));
        let visits = Arc::new(VisitRecordStore::new(store, clock.clone()));
        let validator = Arc::new(ScanValidator::new(
            ledger.clone(),
            visits.clone(),
            clock.clone(),
            config.validity_window_secs,
        ));
        let engine = Arc::new(SyncEngine::new(
            visits.clone(),
            gateway,
            config.submit_timeout(),
            config.max_transport_attempts,
        ));

        info!(
            validity_window_secs = config.validity_window_secs,
            retention_secs = config.retention_secs,
            "Visit verification service created"
        );

        Ok(Self {
            ledger,
            visits,
            validator,
            engine,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &VisitVerificationConfig {
        &self.config
    }

    /// Start periodic draining with the configured interval.
    pub fn spawn_scheduler(&self) -> SyncScheduler {
        SyncScheduler::spawn(
            self.engine.clone(),
            self.config.sync_interval(),
            self.config.retry_errors_on_schedule,
        )
    }

    /// Drop one visit from the local queue regardless of status.
    pub async fn purge_visit(&self, visit_id: VisitId) -> Result<bool, ServiceError> {
        self.engine
            .purge(visit_id)
            .await
            .map_err(internal("purge_visit"))
    }
}

#[async_trait]
impl VisitVerificationApi for VisitVerificationService {
    async fn issue_token(
        &self,
        client_id: &str,
        branch_id: &str,
    ) -> Result<QrToken, ServiceError> {
        let ledger = self.ledger.clone();
        let (client_id, branch_id) = (client_id.to_string(), branch_id.to_string());
        blocking("issue_token", move || {
            ledger
                .issue(&client_id, &branch_id)
                .map_err(|e| match e {
                    LedgerError::Format(e) => ServiceError::InvalidInput(e.to_string()),
                    other => internal("issue_token")(other),
                })
        })
        .await
    }

    async fn validate_scan(&self, raw: &str) -> ScanOutcome {
        let validator = self.validator.clone();
        let raw = raw.to_string();
        match tokio::task::spawn_blocking(move || validator.validate(&raw)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Scan validation task failed");
                ScanOutcome::Rejected(RejectReason::InternalError)
            }
        }
    }

    async fn pending_count(&self) -> Result<usize, ServiceError> {
        let visits = self.visits.clone();
        blocking("pending_count", move || {
            visits
                .count(VisitStatus::Pending)
                .map_err(internal("pending_count"))
        })
        .await
    }

    async fn trigger_sync(&self) -> DrainReport {
        self.engine.drain_pending().await
    }

    async fn retry_errors(&self) -> Result<usize, ServiceError> {
        self.engine
            .retry_errors()
            .await
            .map_err(internal("retry_errors"))
    }

    async fn visit(&self, visit_id: VisitId) -> Result<VisitRecord, ServiceError> {
        let visits = self.visits.clone();
        blocking("visit", move || {
            visits
                .get(&visit_id)
                .map_err(internal("visit"))?
                .ok_or(ServiceError::NotFound(visit_id))
        })
        .await
    }

    async fn visits(&self, status: Option<VisitStatus>) -> Result<Vec<VisitRecord>, ServiceError> {
        let visits = self.visits.clone();
        blocking("visits", move || visits.list(status).map_err(internal("visits"))).await
    }

    async fn stats(&self) -> Result<VisitStats, ServiceError> {
        let visits = self.visits.clone();
        blocking("stats", move || visits.stats().map_err(internal("stats"))).await
    }

    async fn purge_expired_tokens(&self) -> Result<usize, ServiceError> {
        let ledger = self.ledger.clone();
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(self.config.retention_secs.saturating_mul(1_000));
        let purged = blocking("purge_expired_tokens", move || {
            ledger
                .purge_older_than(cutoff)
                .map_err(internal("purge_expired_tokens"))
        })
        .await?;
        if purged > 0 {
            info!(purged, cutoff, "Purged replay records past retention");
        }
        Ok(purged)
    }
}

/// Run `op` on the blocking pool.
async fn blocking<T, F>(name: &'static str, op: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result,
        Err(e) => {
            error!(operation = name, error = %e, "Blocking task failed");
            Err(ServiceError::Internal)
        }
    }
}

/// Log `e` and downgrade it to `ServiceError::Internal`.
fn internal<E: std::fmt::Display>(name: &'static str) -> impl FnOnce(E) -> ServiceError {
    move |e| {
        warn!(operation = name, error = %e, "Service operation failed");
        ServiceError::Internal
    }
}
