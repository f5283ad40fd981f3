//! Periodic notification upkeep.
//!
//! Each sweep re-broadcasts failed notifications that still have retry
//! budget, stores `expired` on notifications past `expires_at`, and purges
//! read or dismissed notifications older than the retention period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use waybill_core::error::CoreError;
use waybill_core::types::{now_ts, PulId, Timestamp};
use waybill_db::repositories::NotificationRepo;

use crate::lifecycle::Worker;
use crate::service::NotificationService;

/// Default retention for read/dismissed notifications.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// How often the sweep runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Rows handled per category per sweep.
const SWEEP_BATCH: i64 = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retried: usize,
    pub expired: u64,
    pub purged: u64,
}

pub struct NotificationMaintenance {
    service: NotificationService,
    retention_days: i64,
    interval: Duration,
    failed_sweeps: AtomicU64,
    worker: Worker,
}

impl NotificationMaintenance {
    pub fn new(service: NotificationService) -> Self {
        Self {
            service,
            retention_days: DEFAULT_RETENTION_DAYS,
            interval: DEFAULT_SWEEP_INTERVAL,
            failed_sweeps: AtomicU64::new(0),
            worker: Worker::new("notification_maintenance"),
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one sweep. Each step runs even if an earlier one failed; the
    /// first error is returned after all three.
    pub async fn sweep_once(&self, now: Timestamp) -> Result<SweepReport, CoreError> {
        let mut report = SweepReport::default();
        let mut first_error: Option<CoreError> = None;

        match self.retry_failed().await {
            Ok(retried) => report.retried = retried,
            Err(e) => {
                tracing::error!(error = %e, "Notification retry sweep failed");
                first_error.get_or_insert(e);
            }
        }

        match self.expire().await {
            Ok(expired) => report.expired = expired,
            Err(e) => {
                tracing::error!(error = %e, "Notification expiry sweep failed");
                first_error.get_or_insert(e);
            }
        }

        let cutoff = now - self.retention_days * 86_400;
        match NotificationRepo::delete_older_than(self.service.pool(), cutoff).await {
            Ok(purged) => report.purged = purged,
            Err(e) => {
                tracing::error!(error = %e, "Notification purge failed");
                first_error.get_or_insert(e.into());
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                retried = report.retried,
                expired = report.expired,
                purged = report.purged,
                "Notification maintenance sweep",
            );
        } else {
            tracing::debug!("Notification maintenance: nothing to do");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn retry_failed(&self) -> Result<usize, CoreError> {
        let pool = self.service.pool();
        let candidates = NotificationRepo::pending_retries(pool, SWEEP_BATCH).await?;

        let mut delivered = 0;
        for notification in &candidates {
            if !NotificationRepo::record_retry(pool, &notification.id).await? {
                continue;
            }
            match self.service.redeliver(notification).await {
                Ok(()) => {
                    NotificationRepo::mark_delivered(pool, &notification.id, now_ts()).await?;
                    delivered += 1;
                }
                Err(e) => tracing::warn!(
                    notification_id = %notification.id,
                    retry_count = notification.retry_count + 1,
                    error = %e,
                    "Notification redelivery failed",
                ),
            }
        }
        Ok(delivered)
    }

    async fn expire(&self) -> Result<u64, CoreError> {
        let pool = self.service.pool();
        let expired = NotificationRepo::expired(pool, SWEEP_BATCH).await?;
        let ids: Vec<PulId> = expired.into_iter().map(|n| n.id).collect();
        Ok(NotificationRepo::mark_expired(pool, &ids).await?)
    }

    /// Scheduled sweeps that returned an error since start.
    pub fn failed_sweeps(&self) -> u64 {
        self.failed_sweeps.load(Ordering::Relaxed)
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        tracing::info!(
            retention_days = self.retention_days,
            interval_secs = self.interval.as_secs(),
            "Notification maintenance starting",
        );
        self.worker.start(move |cancel| async move {
            let mut interval = tokio::time::interval(this.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = this.sweep_once(now_ts()).await {
                            let failed = this.failed_sweeps.fetch_add(1, Ordering::Relaxed) + 1;
                            tracing::warn!(
                                error = %e,
                                failed_sweeps = failed,
                                "Notification maintenance sweep incomplete",
                            );
                        }
                    }
                }
            }
        })
    }

    pub async fn stop(&self) {
        self.worker.stop().await;
    }
}
