//! Turns audited updates into notifications for the record's creator.
//!
//! [`AuditListener`] polls the audit log on a fixed ticker. Every tick reads
//! the `Update` entries recorded since the previous tick, works out who
//! created each record, and runs the creator's preference for that resource
//! through the notify cascade: active, updater not excluded, outside quiet
//! hours, update type wanted. Survivors are sent right away or queued on the
//! [`BatchProcessor`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use waybill_core::audit_changes::{detect_update_type, display_name, resource_url, summarize_changes};
use waybill_core::error::CoreError;
use waybill_core::notification::{sources, NotificationAction, RelatedEntity};
use waybill_core::preference::{is_in_quiet_hours, parse_timezone, UpdateType};
use waybill_core::types::{PulId, Timestamp};
use waybill_db::models::audit::{AuditCursor, AuditEntry};
use waybill_db::models::notification::CreateNotification;
use waybill_db::models::preference::NotificationPreference;
use waybill_db::repositories::{AuditRepo, NotificationPreferenceRepo, UserRepo};

use crate::batch::{BatchProcessor, PendingNotification};
use crate::lifecycle::Worker;
use crate::service::NotificationService;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Audit entries handled per tick.
pub const MAX_ENTRIES_PER_TICK: i64 = 100;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub entries: usize,
    pub sent: usize,
    pub batched: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct AuditListener {
    service: NotificationService,
    batcher: Arc<BatchProcessor>,
    poll_interval: Duration,
    cursor: Mutex<AuditCursor>,
    worker: Worker,
}

impl AuditListener {
    /// Watch updates recorded from now on.
    pub fn new(service: NotificationService, batcher: Arc<BatchProcessor>) -> Self {
        Self {
            service,
            batcher,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cursor: Mutex::new(AuditCursor::at(Utc::now().timestamp())),
            worker: Worker::new("audit_listener"),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start watching from `since` instead of now.
    pub fn since(self, since: Timestamp) -> Self {
        self.set_cursor(AuditCursor::at(since));
        self
    }

    pub fn last_check(&self) -> Timestamp {
        self.cursor().timestamp
    }

    pub fn cursor(&self) -> AuditCursor {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_cursor(&self, value: AuditCursor) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Run one tick.
    ///
    /// When the per-tick cap is hit the cursor stops on the last entry read,
    /// id included, so the rest of that second is picked up by the next tick.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<TickReport, CoreError> {
        let cursor = self.cursor();
        let entries =
            AuditRepo::recent_updates(self.service.pool(), &cursor, MAX_ENTRIES_PER_TICK).await?;

        let mut report = TickReport {
            entries: entries.len(),
            ..TickReport::default()
        };
        for entry in &entries {
            if let Err(e) = self.process_entry(entry, now, &mut report).await {
                report.failed += 1;
                tracing::error!(
                    audit_entry_id = %entry.id,
                    resource = %entry.resource,
                    error = %e,
                    "Failed to process audit entry",
                );
            }
        }

        let next = match entries.last() {
            Some(last) if entries.len() as i64 >= MAX_ENTRIES_PER_TICK => AuditCursor::after(last),
            _ => AuditCursor::at(now.timestamp()),
        };
        self.set_cursor(next);

        if report.entries > 0 {
            tracing::debug!(
                entries = report.entries,
                sent = report.sent,
                batched = report.batched,
                skipped = report.skipped,
                failed = report.failed,
                "Audit tick processed",
            );
        }
        Ok(report)
    }

    async fn process_entry(
        &self,
        entry: &AuditEntry,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), CoreError> {
        let pool = self.service.pool();

        let Some(creator) = AuditRepo::find_creator(
            pool,
            &entry.resource,
            &entry.resource_id,
            &entry.organization_id,
        )
        .await?
        else {
            tracing::debug!(
                resource = %entry.resource,
                resource_id = %entry.resource_id,
                "No creator on record, skipping",
            );
            report.skipped += 1;
            return Ok(());
        };
        if creator == entry.user_id {
            report.skipped += 1;
            return Ok(());
        }

        let preferences = NotificationPreferenceRepo::list_active_for_resource(
            pool,
            &creator,
            &entry.organization_id,
            &entry.resource,
        )
        .await?;

        let changes = entry.changed_fields();
        let update_type = detect_update_type(&entry.resource, &changes);
        let mut updater_name: Option<String> = None;

        for preference in &preferences {
            if !passes_cascade(preference, entry.user_id.as_str(), update_type, now) {
                report.skipped += 1;
                continue;
            }

            let name = match &updater_name {
                Some(name) => name.clone(),
                None => {
                    let name = UserRepo::display_name(pool, &entry.user_id).await?;
                    updater_name = Some(name.clone());
                    name
                }
            };
            let notification = build_notification(entry, &creator, &name, update_type, &changes);

            if preference.batch_notifications {
                if let Some(item) = PendingNotification::from_notification(&notification, now.timestamp()) {
                    self.batcher.add_to_batch(item).await;
                    report.batched += 1;
                }
            } else {
                match self.service.send_notification(notification).await {
                    Ok(_) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(
                            audit_entry_id = %entry.id,
                            user_id = %creator,
                            error = %e,
                            "Failed to send update notification",
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.worker.start(move |cancel| async move {
            let mut interval = tokio::time::interval(this.poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = this.poll_once(Utc::now()).await {
                            tracing::error!(error = %e, "Audit poll failed");
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

/// Per-preference gate. Any failed check skips only this preference.
fn passes_cascade(
    preference: &NotificationPreference,
    updater_id: &str,
    update_type: UpdateType,
    now: DateTime<Utc>,
) -> bool {
    if !preference.is_active {
        return false;
    }
    if !preference.should_notify_user(updater_id) {
        tracing::debug!(preference_id = %preference.id, "Updater excluded by preference");
        return false;
    }
    if preference.quiet_hours_enabled && in_quiet_hours(preference, now) {
        tracing::debug!(preference_id = %preference.id, "In quiet hours, notification suppressed");
        return false;
    }
    if !preference.notify_on_all_updates && !preference.is_update_type_enabled(update_type) {
        return false;
    }
    true
}

fn in_quiet_hours(preference: &NotificationPreference, now: DateTime<Utc>) -> bool {
    let tz = parse_timezone(&preference.timezone).unwrap_or_else(|| {
        tracing::warn!(
            preference_id = %preference.id,
            timezone = %preference.timezone,
            "Unknown timezone, using UTC",
        );
        chrono_tz::UTC
    });
    is_in_quiet_hours(
        now,
        tz,
        preference.quiet_hours_start.as_deref().unwrap_or_default(),
        preference.quiet_hours_end.as_deref().unwrap_or_default(),
    )
}

/// Notification telling `creator` that `updater_name` changed their record.
pub fn build_notification(
    entry: &AuditEntry,
    creator: &PulId,
    updater_name: &str,
    update_type: UpdateType,
    changes: &Map<String, Value>,
) -> CreateNotification {
    let display = display_name(&entry.resource, entry.current_state.as_ref());
    let url = resource_url(&entry.resource, &entry.resource_id);
    let message = match summarize_changes(changes) {
        Some(summary) => format!("{updater_name} updated {display}: {summary}"),
        None => format!("{updater_name} updated {display}"),
    };
    let business_unit_id = (!entry.business_unit_id.is_nil()).then(|| entry.business_unit_id.clone());

    CreateNotification::for_user(
        entry.organization_id.clone(),
        business_unit_id,
        creator.clone(),
        format!("{}.{}", entry.resource, update_type.as_str()),
        format!("{display} Updated"),
        message,
    )
    .with_source(sources::AUDIT_LISTENER)
    .with_correlation_id(entry.id.to_string())
    .with_related_entity(RelatedEntity {
        entity_type: entry.resource.clone(),
        id: entry.resource_id.clone(),
        name: display,
        url: url.clone(),
    })
    .with_action(NotificationAction::link("view", "View", url))
    .with_data(json!({
        "resource": entry.resource,
        "resourceId": entry.resource_id,
        "updateType": update_type.as_str(),
        "updatedBy": entry.user_id,
        "changes": changes,
        "auditEntryId": entry.id,
    }))
}
