//! Notification classification enums and content shapes.
//!
//! The enum values must match the Postgres enum types created by the
//! notifications migration.

use serde::{Deserialize, Serialize};

/// Default number of delivery retries for a new notification.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "notification_priority", rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Targeting class of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "notification_channel", rename_all = "lowercase")]
pub enum Channel {
    /// Every user in the organization.
    Global,
    /// A single user.
    User,
    /// Users holding a role within a business unit.
    Role,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::User => "user",
            Self::Role => "role",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "global" => Some(Self::Global),
            "user" => Some(Self::User),
            "role" => Some(Self::Role),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Expired,
}

impl DeliveryStatus {
    /// Stored status adjusted for expiry: anything past `expires_at` is expired.
    pub fn effective(self, expires_at: Option<i64>, now: i64) -> Self {
        match expires_at {
            Some(exp) if exp <= now => Self::Expired,
            _ => self,
        }
    }
}

/// A record the notification refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    pub name: String,
    pub url: String,
}

/// A call-to-action rendered alongside the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub style: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl NotificationAction {
    /// A primary `link` action pointing at `endpoint`.
    pub fn link(id: &str, label: &str, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            action_type: "link".to_string(),
            style: "primary".to_string(),
            endpoint: endpoint.into(),
            payload: None,
        }
    }
}

/// Well-known event-type tags emitted by the dispatchers.
pub mod event_types {
    pub const BATCH_SUMMARY: &str = "batch_summary";
    pub const CONFIGURATION_COPIED: &str = "configuration.copied";
    pub const REPORT_EXPORT_READY: &str = "report.export_ready";
    pub const OWNERSHIP_TRANSFERRED: &str = "entity.ownership_transferred";
    pub const SHIPMENT_HOLD_RELEASED: &str = "shipment.hold_released";
    pub const COMMENT_MENTION: &str = "comment.mention";
}

/// Well-known `source` values.
pub mod sources {
    pub const AUDIT_LISTENER: &str = "audit_listener";
    pub const BATCH_PROCESSOR: &str = "batch_processor";
    pub const JOB_SYSTEM: &str = "job_system";
    pub const SYSTEM: &str = "system";
    pub const WEBSOCKET: &str = "websocket";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_overrides_stored_status() {
        assert_eq!(
            DeliveryStatus::Delivered.effective(Some(100), 100),
            DeliveryStatus::Expired
        );
        assert_eq!(
            DeliveryStatus::Pending.effective(Some(200), 100),
            DeliveryStatus::Pending
        );
        assert_eq!(
            DeliveryStatus::Failed.effective(None, 100),
            DeliveryStatus::Failed
        );
    }

    #[test]
    fn content_shapes_use_type_key() {
        let entity = RelatedEntity {
            entity_type: "shipment".into(),
            id: "shp_1".into(),
            name: "Shipment S1".into(),
            url: "/shipments/shp_1".into(),
        };
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "shipment");

        let action = NotificationAction::link("view", "View", "/x");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "link");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn channel_parses_known_names() {
        assert_eq!(Channel::parse("user"), Some(Channel::User));
        assert_eq!(Channel::parse("everyone"), None);
        assert_eq!(Priority::High.as_str(), "high");
    }
}
