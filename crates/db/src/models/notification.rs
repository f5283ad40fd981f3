//! Notification entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use waybill_core::notification::{
    Channel, DeliveryStatus, NotificationAction, Priority, RelatedEntity, DEFAULT_MAX_RETRIES,
};
use waybill_core::types::{PulId, Timestamp};

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub target_user_id: Option<PulId>,
    pub target_role_id: Option<PulId>,
    pub event_type: String,
    pub priority: Priority,
    pub channel: Channel,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub related_entities: Json<Vec<RelatedEntity>>,
    pub actions: Json<Vec<NotificationAction>>,
    pub source: String,
    pub job_id: Option<String>,
    pub correlation_id: Option<String>,
    pub tags: Vec<String>,
    pub expires_at: Option<Timestamp>,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub dismissed_at: Option<Timestamp>,
    pub delivery_status: DeliveryStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Notification {
    /// Stored status, overridden to `expired` once `expires_at` has passed.
    pub fn effective_status(&self, now: Timestamp) -> DeliveryStatus {
        self.delivery_status.effective(self.expires_at, now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.effective_status(now) == DeliveryStatus::Expired
    }
}

/// DTO for inserting a notification.
#[derive(Debug, Clone)]
pub struct CreateNotification {
    /// Nil means "assign a fresh id".
    pub id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub target_user_id: Option<PulId>,
    pub target_role_id: Option<PulId>,
    pub event_type: String,
    pub priority: Priority,
    pub channel: Channel,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub related_entities: Vec<RelatedEntity>,
    pub actions: Vec<NotificationAction>,
    pub source: String,
    pub job_id: Option<String>,
    pub correlation_id: Option<String>,
    pub tags: Vec<String>,
    pub expires_at: Option<Timestamp>,
    pub max_retries: i32,
}

impl CreateNotification {
    fn base(
        organization_id: PulId,
        business_unit_id: Option<PulId>,
        channel: Channel,
        event_type: String,
        title: String,
        message: String,
    ) -> Self {
        Self {
            id: PulId::nil(),
            organization_id,
            business_unit_id,
            target_user_id: None,
            target_role_id: None,
            event_type,
            priority: Priority::Medium,
            channel,
            title,
            message,
            data: serde_json::Value::Object(Default::default()),
            related_entities: Vec::new(),
            actions: Vec::new(),
            source: String::new(),
            job_id: None,
            correlation_id: None,
            tags: Vec::new(),
            expires_at: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// A user-channel notification with empty content extras.
    pub fn for_user(
        organization_id: PulId,
        business_unit_id: Option<PulId>,
        user_id: PulId,
        event_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut n = Self::base(
            organization_id,
            business_unit_id,
            Channel::User,
            event_type.into(),
            title.into(),
            message.into(),
        );
        n.target_user_id = Some(user_id);
        n
    }

    /// An organization-wide notification.
    pub fn for_org(
        organization_id: PulId,
        event_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::base(
            organization_id,
            None,
            Channel::Global,
            event_type.into(),
            title.into(),
            message.into(),
        )
    }

    /// A notification for everyone holding `role_id` in the business unit.
    pub fn for_role(
        organization_id: PulId,
        business_unit_id: PulId,
        role_id: PulId,
        event_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut n = Self::base(
            organization_id,
            Some(business_unit_id),
            Channel::Role,
            event_type.into(),
            title.into(),
            message.into(),
        );
        n.target_role_id = Some(role_id);
        n
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_related_entity(mut self, entity: RelatedEntity) -> Self {
        self.related_entities.push(entity);
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn expires_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Visibility scope of a user's notification queries.
#[derive(Debug, Clone)]
pub struct NotificationScope {
    pub user_id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
}

/// Paged query over a user's visible notifications.
#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub scope: NotificationScope,
    pub limit: i64,
    pub offset: i64,
    pub unread_only: bool,
}

/// One page of notifications plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: i64,
}
