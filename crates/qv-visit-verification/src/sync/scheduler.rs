//! Periodic and on-demand drain passes.
//!
//! ```text
//!   interval tick ──┐
//!                   ├──→ drain_pending() ──→ latest report (watch)
//!   trigger() ──────┘
//!   shutdown() ─────→ loop exits after the current pass
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use crate::domain::DrainReport;

/// Background task driving a [`SyncEngine`].
pub struct SyncScheduler {
    trigger: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    reports: watch::Receiver<Option<DrainReport>>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the scheduler on the current tokio runtime.
    ///
    /// With `retry_errors` set, ERROR visits are re-enqueued before every
    /// scheduled pass (not before triggered ones).
    pub fn spawn(engine: Arc<SyncEngine>, interval: Duration, retry_errors: bool) -> Self {
        let trigger = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (report_tx, reports) = watch::channel(None);

        let handle = tokio::spawn(run(
            engine,
            interval,
            retry_errors,
            trigger.clone(),
            shutdown_rx,
            report_tx,
        ));
        info!(interval_secs = interval.as_secs(), "Sync scheduler started");

        Self {
            trigger,
            shutdown_tx,
            reports,
            handle,
        }
    }

    /// Request a pass now. Coalesces with a pending request.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Receiver for the report of the most recent pass.
    pub fn reports(&self) -> watch::Receiver<Option<DrainReport>> {
        self.reports.clone()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sync scheduler task ended abnormally");
        }
        info!("Sync scheduler stopped");
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    interval: Duration,
    retry_errors: bool,
    trigger: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
    report_tx: watch::Sender<Option<DrainReport>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let scheduled = tokio::select! {
            _ = ticker.tick() => true,
            _ = trigger.notified() => false,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Sync scheduler shutdown signal received");
                    break;
                }
                continue;
            }
        };

        if scheduled && retry_errors {
            if let Err(e) = engine.retry_errors().await {
                warn!(error = %e, "Failed to re-enqueue errored visits");
            }
        }

        let report = engine.drain_pending().await;
        report_tx.send_replace(Some(report));
    }
}
