//! Notification preference entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use waybill_core::preference::{self, PreferenceDraft, UpdateType};
use waybill_core::types::{PulId, Timestamp};

/// A row from the `notification_preferences` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    pub id: PulId,
    pub user_id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: PulId,
    pub resource: String,
    pub update_types: Vec<String>,
    pub notify_on_all_updates: bool,
    pub excluded_user_ids: Vec<String>,
    pub preferred_channels: Vec<String>,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub timezone: String,
    pub batch_notifications: bool,
    pub batch_interval_minutes: i32,
    pub is_active: bool,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl NotificationPreference {
    pub fn is_update_type_enabled(&self, update_type: UpdateType) -> bool {
        preference::is_update_type_enabled(
            self.notify_on_all_updates,
            &self.update_types,
            update_type,
        )
    }

    /// False when `updater_id` is excluded.
    pub fn should_notify_user(&self, updater_id: &str) -> bool {
        preference::should_notify_user(&self.excluded_user_ids, updater_id)
    }

    /// Batching interval in seconds, when batching is on.
    pub fn batch_interval_secs(&self) -> Option<i64> {
        (self.batch_notifications && self.batch_interval_minutes > 0)
            .then(|| i64::from(self.batch_interval_minutes) * 60)
    }
}

/// Editable preference fields, shared by create and update.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSettings {
    pub resource: String,
    #[serde(default)]
    pub update_types: Vec<String>,
    #[serde(default)]
    pub notify_on_all_updates: bool,
    #[serde(default)]
    pub excluded_user_ids: Vec<String>,
    #[serde(default = "default_channels")]
    pub preferred_channels: Vec<String>,
    #[serde(default)]
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub batch_notifications: bool,
    #[serde(default = "default_batch_interval")]
    pub batch_interval_minutes: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_channels() -> Vec<String> {
    vec!["user".to_string()]
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_batch_interval() -> i32 {
    15
}

fn default_true() -> bool {
    true
}

impl PreferenceSettings {
    pub fn draft(&self) -> PreferenceDraft<'_> {
        PreferenceDraft {
            resource: &self.resource,
            notify_on_all_updates: self.notify_on_all_updates,
            update_types: &self.update_types,
            excluded_user_ids: &self.excluded_user_ids,
            preferred_channels: &self.preferred_channels,
            quiet_hours_enabled: self.quiet_hours_enabled,
            quiet_hours_start: self.quiet_hours_start.as_deref(),
            quiet_hours_end: self.quiet_hours_end.as_deref(),
            timezone: &self.timezone,
            batch_notifications: self.batch_notifications,
            batch_interval_minutes: self.batch_interval_minutes,
        }
    }
}

/// DTO for creating a preference.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationPreference {
    pub user_id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: PulId,
    #[serde(flatten)]
    pub settings: PreferenceSettings,
}

/// DTO for replacing a preference's editable fields.
///
/// `user_id` and `organization_id` are accepted only so immutability can be
/// enforced; they are never written.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotificationPreference {
    pub user_id: Option<PulId>,
    pub organization_id: Option<PulId>,
    pub version: i64,
    #[serde(flatten)]
    pub settings: PreferenceSettings,
}

/// List filter for preferences.
#[derive(Debug, Clone, Default)]
pub struct PreferenceFilter {
    pub organization_id: PulId,
    pub user_id: Option<PulId>,
    pub business_unit_id: Option<PulId>,
    pub resource: Option<String>,
    pub is_active: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}
