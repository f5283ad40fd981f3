//! Caller identity and capability checks.

use crate::types::PulId;

/// Role name that implies every capability.
pub const ROLE_ADMIN: &str = "admin";

/// Manage other users' settings (including notification preferences).
pub const USER_MANAGE: &str = "user:manage";

/// The authenticated caller of a service operation.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: PulId,
    pub role: String,
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Whether the caller holds `permission` within `organization_id`.
    ///
    /// Capabilities never cross tenants.
    pub fn can_in(&self, permission: &str, organization_id: &PulId) -> bool {
        if &self.organization_id != organization_id {
            return false;
        }
        self.is_admin() || self.permissions.iter().any(|p| p == permission)
    }

    /// Owner access, or `user:manage` in the owner's organization.
    pub fn can_act_for(&self, user_id: &PulId, organization_id: &PulId) -> bool {
        (&self.user_id == user_id && &self.organization_id == organization_id)
            || self.can_in(USER_MANAGE, organization_id)
    }
}
