//! Per-user batching of audit notifications into periodic summaries.
//!
//! [`BatchProcessor`] queues notifications for users whose preference asks
//! for batching and, on every tick, flushes each queue whose oldest entry
//! has waited at least the user's batch interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use waybill_core::batch_summary::summarize;
use waybill_core::error::CoreError;
use waybill_core::notification::{event_types, sources, NotificationAction, Priority, RelatedEntity};
use waybill_core::types::{now_ts, PulId, Timestamp};
use waybill_db::models::notification::CreateNotification;
use waybill_db::repositories::NotificationPreferenceRepo;

use crate::lifecycle::Worker;
use crate::service::NotificationService;

/// Default flush check period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// A notification held back for a summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub user_id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub related_entities: Vec<RelatedEntity>,
    pub queued_at: Timestamp,
}

impl PendingNotification {
    /// Hold back the content of `notification`, which must target a user.
    pub fn from_notification(notification: &CreateNotification, queued_at: Timestamp) -> Option<Self> {
        Some(Self {
            user_id: notification.target_user_id.clone()?,
            organization_id: notification.organization_id.clone(),
            business_unit_id: notification.business_unit_id.clone(),
            event_type: notification.event_type.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            data: notification.data.clone(),
            related_entities: notification.related_entities.clone(),
            queued_at,
        })
    }
}

// ---------------------------------------------------------------------------
// BatchProcessor
// ---------------------------------------------------------------------------

pub struct BatchProcessor {
    service: NotificationService,
    tick: Duration,
    pending: Mutex<HashMap<String, Vec<PendingNotification>>>,
    worker: Worker,
}

impl BatchProcessor {
    pub fn new(service: NotificationService) -> Self {
        Self {
            service,
            tick: DEFAULT_TICK,
            pending: Mutex::new(HashMap::new()),
            worker: Worker::new("batch_processor"),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Queue a notification. Returns the user's queue length.
    pub async fn add_to_batch(&self, item: PendingNotification) -> usize {
        let user_id = item.user_id.clone();
        let mut pending = self.pending.lock().await;
        let queue = pending.entry(user_id.to_string()).or_default();
        queue.push(item);
        let size = queue.len();
        tracing::debug!(user_id = %user_id, size, "Notification added to batch");
        size
    }

    pub async fn pending_count(&self, user_id: &PulId) -> usize {
        self.pending
            .lock()
            .await
            .get(user_id.as_str())
            .map_or(0, Vec::len)
    }

    /// Flush every queue that is due at `now`. Returns the number of
    /// summaries sent.
    pub async fn process_batches(&self, now: Timestamp) -> usize {
        let candidates: Vec<(String, PulId, PulId, Timestamp)> = {
            let pending = self.pending.lock().await;
            pending
                .iter()
                .filter_map(|(key, queue)| {
                    let first = queue.first()?;
                    let oldest = queue.iter().map(|p| p.queued_at).min()?;
                    Some((
                        key.clone(),
                        first.user_id.clone(),
                        first.organization_id.clone(),
                        oldest,
                    ))
                })
                .collect()
        };

        let mut flushed = 0;
        for (key, user_id, organization_id, oldest) in candidates {
            match self.is_due(&user_id, &organization_id, oldest, now).await {
                Ok(true) => {
                    if self.flush_user(&key).await {
                        flushed += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to load batch preferences");
                }
            }
        }
        if flushed > 0 {
            tracing::info!(flushed, "Processed notification batches");
        }
        flushed
    }

    /// Send every non-empty queue regardless of interval.
    pub async fn flush_all(&self) -> usize {
        let keys: Vec<String> = self.pending.lock().await.keys().cloned().collect();
        let mut flushed = 0;
        for key in keys {
            if self.flush_user(&key).await {
                flushed += 1;
            }
        }
        tracing::info!(flushed, "Flushed all notification batches");
        flushed
    }

    /// The first active preference with batching on defines the interval;
    /// without one the queue is flushed right away.
    async fn is_due(
        &self,
        user_id: &PulId,
        organization_id: &PulId,
        oldest: Timestamp,
        now: Timestamp,
    ) -> Result<bool, CoreError> {
        let preferences =
            NotificationPreferenceRepo::list_active_for_user(self.service.pool(), user_id, organization_id)
                .await?;
        Ok(match preferences.iter().find_map(|p| p.batch_interval_secs()) {
            Some(interval) => now - oldest >= interval,
            None => true,
        })
    }

    /// Send one user's queue as a summary. A failed send puts the items
    /// back in front of anything queued meanwhile.
    async fn flush_user(&self, key: &str) -> bool {
        let Some(batch) = self.pending.lock().await.remove(key) else {
            return false;
        };
        if batch.is_empty() {
            return false;
        }

        let count = batch.len();
        let Some(summary) = summary_notification(&batch) else {
            return false;
        };
        match self.service.send_notification(summary).await {
            Ok(notification) => {
                tracing::info!(
                    user_id = key,
                    count,
                    notification_id = %notification.id,
                    "Sent batch summary",
                );
                true
            }
            Err(e) => {
                tracing::error!(user_id = key, count, error = %e, "Failed to send batch summary");
                let mut pending = self.pending.lock().await;
                let queue = pending.entry(key.to_string()).or_default();
                let newer = std::mem::replace(queue, batch);
                queue.extend(newer);
                false
            }
        }
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.worker.start(move |cancel| async move {
            let mut interval = tokio::time::interval(this.tick);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        this.process_batches(now_ts()).await;
                    }
                }
            }
        })
    }

    /// Flush everything, then stop the ticker.
    pub async fn stop(&self) {
        self.flush_all().await;
        self.worker.stop().await;
    }
}

/// Summary notification for one user's batch.
pub fn summary_notification(batch: &[PendingNotification]) -> Option<CreateNotification> {
    let first = batch.first()?;
    let summary = summarize(batch.iter().map(|p| p.event_type.as_str()));

    Some(
        CreateNotification::for_user(
            first.organization_id.clone(),
            first.business_unit_id.clone(),
            first.user_id.clone(),
            event_types::BATCH_SUMMARY,
            summary.title,
            summary.message,
        )
        .with_priority(Priority::Medium)
        .with_source(sources::BATCH_PROCESSOR)
        .with_action(NotificationAction::link("view_all", "View All", "/notifications"))
        .with_data(json!({
            "notifications": batch,
            "count": batch.len(),
            "types": summary.types,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use waybill_core::types::prefixes;

    fn pending(user: &PulId, org: &PulId, event_type: &str, queued_at: Timestamp) -> PendingNotification {
        PendingNotification {
            user_id: user.clone(),
            organization_id: org.clone(),
            business_unit_id: None,
            event_type: event_type.into(),
            title: "Shipment Updated".into(),
            message: "Ann updated Shipment".into(),
            data: json!({}),
            related_entities: Vec::new(),
            queued_at,
        }
    }

    #[test]
    fn summary_counts_types() {
        let user = PulId::new(prefixes::USER);
        let org = PulId::new(prefixes::ORGANIZATION);
        let batch = vec![
            pending(&user, &org, "shipment.status_change", 1),
            pending(&user, &org, "shipment.status_change", 2),
            pending(&user, &org, "worker.assignment", 3),
        ];

        let n = summary_notification(&batch).unwrap();
        assert_eq!(n.title, "You have 3 updates");
        assert_eq!(n.event_type, event_types::BATCH_SUMMARY);
        assert_eq!(n.target_user_id, Some(user));
        assert_eq!(n.data["count"], 3);
        assert_eq!(n.data["types"]["shipment.status_change"], 2);
        assert_eq!(n.data["notifications"].as_array().unwrap().len(), 3);
        assert_eq!(n.data["notifications"][0]["queuedAt"], 1);
        assert_eq!(n.actions[0].id, "view_all");
        assert_eq!(n.actions[0].endpoint, "/notifications");
    }

    #[test]
    fn empty_batch_has_no_summary() {
        assert!(summary_notification(&[]).is_none());
    }

    #[test]
    fn pending_requires_a_user_target() {
        let org = PulId::new(prefixes::ORGANIZATION);
        let user = PulId::new(prefixes::USER);
        let direct = CreateNotification::for_user(org.clone(), None, user.clone(), "e", "T", "M");
        let item = PendingNotification::from_notification(&direct, 42).unwrap();
        assert_eq!(item.user_id, user);
        assert_eq!(item.queued_at, 42);

        let broadcast = CreateNotification::for_org(org, "e", "T", "M");
        assert!(PendingNotification::from_notification(&broadcast, 42).is_none());
    }
}
