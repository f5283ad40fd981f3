//! Audit log models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use waybill_core::types::{PulId, Timestamp};

/// A row from the `audit_entries` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: PulId,
    pub user_id: PulId,
    pub resource: String,
    pub resource_id: String,
    pub action: String,
    pub changes: serde_json::Value,
    pub previous_state: Option<serde_json::Value>,
    pub current_state: Option<serde_json::Value>,
    pub comment: Option<String>,
    pub timestamp: Timestamp,
}

impl AuditEntry {
    /// Changed fields as a map; anything that is not a JSON object is empty.
    pub fn changed_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        self.changes.as_object().cloned().unwrap_or_default()
    }
}

/// Read position in the audit log.
///
/// Entries are ordered by `(timestamp, id)`. With `after_id` set the cursor
/// sits on that entry and same-second entries with a greater id are still
/// ahead of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditCursor {
    pub timestamp: Timestamp,
    pub after_id: Option<PulId>,
}

impl AuditCursor {
    /// Everything recorded strictly after `timestamp`.
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            after_id: None,
        }
    }

    /// Just past `entry`.
    pub fn after(entry: &AuditEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            after_id: Some(entry.id.clone()),
        }
    }
}

/// DTO for writing an audit entry.
#[derive(Debug, Clone)]
pub struct CreateAuditEntry {
    pub organization_id: PulId,
    pub business_unit_id: PulId,
    pub user_id: PulId,
    pub resource: String,
    pub resource_id: String,
    pub action: String,
    pub changes: serde_json::Value,
    pub previous_state: Option<serde_json::Value>,
    pub current_state: Option<serde_json::Value>,
    pub comment: Option<String>,
    /// `None` stamps the current time.
    pub timestamp: Option<Timestamp>,
}
