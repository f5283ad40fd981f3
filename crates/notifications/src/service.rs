//! Notification ingress: persist, fan out, then record delivery.

use std::sync::Arc;

use waybill_core::error::{CoreError, FieldError};
use waybill_core::notification::Channel;
use waybill_core::rooms::resolve_target;
use waybill_core::types::{now_ts, PulId};
use waybill_db::models::notification::{
    CreateNotification, Notification, NotificationPage, NotificationQuery, NotificationScope,
};
use waybill_db::repositories::NotificationRepo;
use waybill_db::DbPool;

use crate::broadcaster::Broadcaster;

/// Creates notifications and pushes them to connected clients.
#[derive(Clone)]
pub struct NotificationService {
    pool: DbPool,
    broadcaster: Arc<dyn Broadcaster>,
}

impl NotificationService {
    pub fn new(pool: DbPool, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { pool, broadcaster }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Persist a notification and broadcast it.
    ///
    /// The delivered status is written only after the broadcast succeeded,
    /// and in the background. A failed broadcast leaves the row `failed` for
    /// the maintenance sweep to retry and is reported to the caller.
    pub async fn send_notification(
        &self,
        input: CreateNotification,
    ) -> Result<Notification, CoreError> {
        validate_targeting(&input)?;

        let notification = NotificationRepo::create(&self.pool, &input).await?;
        tracing::debug!(
            notification_id = %notification.id,
            event_type = %notification.event_type,
            channel = notification.channel.as_str(),
            "Notification created",
        );

        if let Err(e) = self.broadcast(&notification).await {
            tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to broadcast notification",
            );
            if let Err(mark_err) = NotificationRepo::mark_failed(&self.pool, &notification.id).await
            {
                tracing::error!(
                    notification_id = %notification.id,
                    error = %mark_err,
                    "Failed to record delivery failure",
                );
            }
            return Err(e);
        }

        let pool = self.pool.clone();
        let id = notification.id.clone();
        tokio::spawn(async move {
            if let Err(e) = NotificationRepo::mark_delivered(&pool, &id, now_ts()).await {
                tracing::error!(notification_id = %id, error = %e, "Failed to mark delivered");
            }
        });

        tracing::info!(
            notification_id = %notification.id,
            event_type = %notification.event_type,
            "Notification sent",
        );
        Ok(notification)
    }

    /// Broadcast an already-stored notification again.
    pub async fn redeliver(&self, notification: &Notification) -> Result<(), CoreError> {
        self.broadcast(notification).await
    }

    async fn broadcast(&self, notification: &Notification) -> Result<(), CoreError> {
        let (target, target_id) = resolve_target(
            notification.channel,
            notification.organization_id.as_str(),
            notification.business_unit_id.as_ref().map(PulId::as_str),
            notification.target_user_id.as_ref().map(PulId::as_str),
            notification.target_role_id.as_ref().map(PulId::as_str),
        );
        let content = serde_json::to_value(notification)
            .map_err(|e| CoreError::Internal(format!("failed to encode notification: {e}")))?;
        self.broadcaster
            .broadcast(target, &target_id, content)
            .await
            .map_err(CoreError::from)
    }

    pub async fn mark_as_read(
        &self,
        notification_id: &PulId,
        scope: &NotificationScope,
    ) -> Result<(), CoreError> {
        NotificationRepo::mark_read(&self.pool, notification_id, scope).await?;
        tracing::debug!(
            notification_id = %notification_id,
            user_id = %scope.user_id,
            "Notification marked read",
        );
        Ok(())
    }

    pub async fn mark_as_dismissed(
        &self,
        notification_id: &PulId,
        scope: &NotificationScope,
    ) -> Result<(), CoreError> {
        NotificationRepo::mark_dismissed(&self.pool, notification_id, scope).await?;
        tracing::debug!(
            notification_id = %notification_id,
            user_id = %scope.user_id,
            "Notification dismissed",
        );
        Ok(())
    }

    /// Mark every visible unread notification read. Returns the count.
    pub async fn read_all(&self, scope: &NotificationScope) -> Result<u64, CoreError> {
        let updated = NotificationRepo::read_all(&self.pool, scope).await?;
        tracing::info!(user_id = %scope.user_id, updated, "Marked all notifications read");
        Ok(updated)
    }

    pub async fn unread_count(
        &self,
        user_id: &PulId,
        organization_id: &PulId,
    ) -> Result<i64, CoreError> {
        Ok(NotificationRepo::unread_count(&self.pool, user_id, organization_id).await?)
    }

    pub async fn user_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<NotificationPage, CoreError> {
        let page = NotificationRepo::list_for_user(&self.pool, query).await?;
        tracing::debug!(
            user_id = %query.scope.user_id,
            returned = page.items.len(),
            total = page.total,
            "Listed notifications",
        );
        Ok(page)
    }
}

/// Reject notifications that could never reach anyone.
fn validate_targeting(input: &CreateNotification) -> Result<(), CoreError> {
    let mut errors = Vec::new();
    if input.organization_id.is_nil() {
        errors.push(FieldError::new("organizationId", "is required"));
    }
    if input.title.trim().is_empty() {
        errors.push(FieldError::new("title", "is required"));
    }
    if input.event_type.trim().is_empty() {
        errors.push(FieldError::new("eventType", "is required"));
    }
    let missing = |id: &Option<PulId>| id.as_ref().filter(|v| !v.is_nil()).is_none();
    match input.channel {
        Channel::User if missing(&input.target_user_id) => {
            errors.push(FieldError::new("targetUserId", "is required for user notifications"));
        }
        Channel::Role => {
            if missing(&input.target_role_id) {
                errors.push(FieldError::new("targetRoleId", "is required for role notifications"));
            }
            if missing(&input.business_unit_id) {
                errors.push(FieldError::new(
                    "businessUnitId",
                    "is required for role notifications",
                ));
            }
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidFields(errors))
    }
}
