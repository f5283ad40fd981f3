//! Room naming, broadcast targets and the external key layout shared by the
//! hub, the pub/sub bus and the presence store.

use serde::{Deserialize, Serialize};

use crate::notification::Channel;

/// Pattern the hub subscribes to on the pub/sub bus.
pub const BROADCAST_PATTERN: &str = "broadcast:*";

/// Derived room name for a notification targeting tuple.
///
/// - global: `org_<org>`
/// - user: `user_<org>_<user>`
/// - role: `role_<org>_<bu>_<role>`
pub fn room_name(
    channel: Channel,
    org_id: &str,
    bu_id: Option<&str>,
    user_id: Option<&str>,
    role_id: Option<&str>,
) -> String {
    match channel {
        Channel::Global => format!("org_{org_id}"),
        Channel::User => format!("user_{org_id}_{}", user_id.unwrap_or_default()),
        Channel::Role => format!(
            "role_{org_id}_{}_{}",
            bu_id.unwrap_or_default(),
            role_id.unwrap_or_default()
        ),
    }
}

/// Index a broadcast addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastTarget {
    User,
    Org,
    Room,
}

impl BroadcastTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Org => "org",
            Self::Room => "room",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "org" => Some(Self::Org),
            "room" => Some(Self::Room),
            _ => None,
        }
    }

    /// Pub/sub channel carrying broadcasts for `target_id`.
    pub fn bus_channel(self, target_id: &str) -> String {
        format!("broadcast:{}:{target_id}", self.as_str())
    }
}

/// Resolve where a notification is delivered.
///
/// User notifications go to the user index, global notifications to the
/// organization index, role notifications to the derived role room.
pub fn resolve_target(
    channel: Channel,
    org_id: &str,
    bu_id: Option<&str>,
    user_id: Option<&str>,
    role_id: Option<&str>,
) -> (BroadcastTarget, String) {
    match channel {
        Channel::User => (
            BroadcastTarget::User,
            user_id.unwrap_or_default().to_string(),
        ),
        Channel::Global => (BroadcastTarget::Org, org_id.to_string()),
        Channel::Role => (
            BroadcastTarget::Room,
            room_name(channel, org_id, bu_id, user_id, role_id),
        ),
    }
}

/// Presence set keys.
pub mod presence_keys {
    /// Remote addresses of a user's live connections.
    pub fn user_connections(user_id: &str) -> String {
        format!("user:{user_id}:connections")
    }

    /// Users with at least one live connection in the organization.
    pub fn org_clients(org_id: &str) -> String {
        format!("org:{org_id}:clients")
    }

    /// Users with at least one live connection in the room.
    pub fn room_users(room_id: &str) -> String {
        format!("room:{room_id}:users")
    }
}
