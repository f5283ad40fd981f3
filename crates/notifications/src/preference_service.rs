//! Preference CRUD with validation, authorization and auditing.

use serde_json::Value;
use waybill_core::audit_changes::{actions, diff_objects};
use waybill_core::error::{CoreError, FieldError};
use waybill_core::permissions::{Principal, USER_MANAGE};
use waybill_core::preference::validate_preference;
use waybill_core::types::PulId;
use waybill_db::models::audit::CreateAuditEntry;
use waybill_db::models::preference::{
    CreateNotificationPreference, NotificationPreference, PreferenceFilter,
    UpdateNotificationPreference,
};
use waybill_db::repositories::{AuditRepo, NotificationPreferenceRepo};
use waybill_db::DbPool;

/// Resource name under which preference changes are audited.
pub const AUDIT_RESOURCE: &str = "notification_preference";

/// Bookkeeping fields left out of audit diffs.
const DIFF_IGNORED: &[&str] = &["version", "createdAt", "updatedAt"];

/// Largest page the list operation returns.
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct PreferenceService {
    pool: DbPool,
}

impl PreferenceService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        actor: &Principal,
        input: CreateNotificationPreference,
    ) -> Result<NotificationPreference, CoreError> {
        authorize(actor, &input.user_id, &input.organization_id)?;
        validate_preference(&input.settings.draft())?;

        if input.settings.is_active
            && NotificationPreferenceRepo::active_exists(
                &self.pool,
                &input.user_id,
                &input.organization_id,
                &input.settings.resource,
                None,
            )
            .await?
        {
            return Err(duplicate(&input.settings.resource));
        }

        let created = NotificationPreferenceRepo::create(&self.pool, &input)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    duplicate(&input.settings.resource)
                } else {
                    CoreError::from(e)
                }
            })?;

        tracing::info!(
            preference_id = %created.id,
            user_id = %created.user_id,
            resource = %created.resource,
            actor_id = %actor.user_id,
            "Notification preference created",
        );
        self.audit(actor, &created, actions::CREATE, None, Some(&created))
            .await;
        Ok(created)
    }

    pub async fn get(
        &self,
        actor: &Principal,
        id: &PulId,
    ) -> Result<NotificationPreference, CoreError> {
        let preference = self.load(actor, id).await?;
        authorize(actor, &preference.user_id, &preference.organization_id)?;
        Ok(preference)
    }

    /// Replace a preference's editable fields.
    ///
    /// The owner and tenant are immutable; the duplicate check only runs
    /// when the resource changes.
    pub async fn update(
        &self,
        actor: &Principal,
        id: &PulId,
        input: UpdateNotificationPreference,
    ) -> Result<NotificationPreference, CoreError> {
        let existing = self.load(actor, id).await?;
        authorize(actor, &existing.user_id, &existing.organization_id)?;

        let mut immutable = Vec::new();
        if input.user_id.as_ref().is_some_and(|u| *u != existing.user_id) {
            immutable.push(FieldError::new("userId", "cannot be changed"));
        }
        if input
            .organization_id
            .as_ref()
            .is_some_and(|o| *o != existing.organization_id)
        {
            immutable.push(FieldError::new("organizationId", "cannot be changed"));
        }
        if !immutable.is_empty() {
            return Err(CoreError::InvalidFields(immutable));
        }

        validate_preference(&input.settings.draft())?;

        if input.settings.is_active
            && input.settings.resource != existing.resource
            && NotificationPreferenceRepo::active_exists(
                &self.pool,
                &existing.user_id,
                &existing.organization_id,
                &input.settings.resource,
                Some(&existing.id),
            )
            .await?
        {
            return Err(duplicate(&input.settings.resource));
        }

        let updated = NotificationPreferenceRepo::update(
            &self.pool,
            &existing.id,
            &existing.organization_id,
            input.version,
            &input.settings,
        )
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                duplicate(&input.settings.resource)
            } else {
                CoreError::from(e)
            }
        })?;

        tracing::info!(
            preference_id = %updated.id,
            version = updated.version,
            actor_id = %actor.user_id,
            "Notification preference updated",
        );
        self.audit(actor, &updated, actions::UPDATE, Some(&existing), Some(&updated))
            .await;
        Ok(updated)
    }

    pub async fn delete(&self, actor: &Principal, id: &PulId) -> Result<(), CoreError> {
        let existing = self.load(actor, id).await?;
        authorize(actor, &existing.user_id, &existing.organization_id)?;

        if !NotificationPreferenceRepo::delete(&self.pool, id, &existing.organization_id).await? {
            return Err(CoreError::not_found("NotificationPreference", id));
        }
        tracing::info!(preference_id = %id, actor_id = %actor.user_id, "Notification preference deleted");
        self.audit(actor, &existing, actions::DELETE, Some(&existing), None)
            .await;
        Ok(())
    }

    /// Paginated listing within the caller's organization.
    ///
    /// Callers without `user:manage` only ever see their own preferences.
    pub async fn list(
        &self,
        actor: &Principal,
        mut filter: PreferenceFilter,
    ) -> Result<(Vec<NotificationPreference>, i64), CoreError> {
        filter.organization_id = actor.organization_id.clone();
        if !actor.can_in(USER_MANAGE, &actor.organization_id) {
            filter.user_id = Some(actor.user_id.clone());
        }
        filter.limit = filter.limit.clamp(1, MAX_PAGE_SIZE);
        filter.offset = filter.offset.max(0);

        Ok(NotificationPreferenceRepo::list(&self.pool, &filter).await?)
    }

    /// Every preference of `user_id` in the caller's organization.
    pub async fn list_for_user(
        &self,
        actor: &Principal,
        user_id: &PulId,
    ) -> Result<Vec<NotificationPreference>, CoreError> {
        authorize(actor, user_id, &actor.organization_id)?;
        Ok(
            NotificationPreferenceRepo::list_for_user(&self.pool, user_id, &actor.organization_id)
                .await?,
        )
    }

    async fn load(
        &self,
        actor: &Principal,
        id: &PulId,
    ) -> Result<NotificationPreference, CoreError> {
        NotificationPreferenceRepo::find_by_id(&self.pool, id, &actor.organization_id)
            .await?
            .ok_or_else(|| CoreError::not_found("NotificationPreference", id))
    }

    /// Record a mutation. The mutation has already happened, so a failed
    /// write is logged rather than returned.
    async fn audit(
        &self,
        actor: &Principal,
        preference: &NotificationPreference,
        action: &str,
        before: Option<&NotificationPreference>,
        after: Option<&NotificationPreference>,
    ) {
        let before = before.and_then(|p| serde_json::to_value(p).ok());
        let after = after.and_then(|p| serde_json::to_value(p).ok());
        let changes = diff_objects(
            before.as_ref().unwrap_or(&Value::Null),
            after.as_ref().unwrap_or(&Value::Null),
            DIFF_IGNORED,
        );

        let entry = CreateAuditEntry {
            organization_id: preference.organization_id.clone(),
            business_unit_id: preference.business_unit_id.clone(),
            user_id: actor.user_id.clone(),
            resource: AUDIT_RESOURCE.to_string(),
            resource_id: preference.id.to_string(),
            action: action.to_string(),
            changes: Value::Object(changes),
            previous_state: before,
            current_state: after,
            comment: None,
            timestamp: None,
        };
        if let Err(e) = AuditRepo::create(&self.pool, &entry).await {
            tracing::error!(
                preference_id = %preference.id,
                action,
                error = %e,
                "Failed to write audit entry",
            );
        }
    }
}

fn authorize(actor: &Principal, user_id: &PulId, organization_id: &PulId) -> Result<(), CoreError> {
    if actor.can_act_for(user_id, organization_id) {
        Ok(())
    } else {
        tracing::warn!(
            actor_id = %actor.user_id,
            target_user_id = %user_id,
            "Preference access denied",
        );
        Err(CoreError::Forbidden(
            "managing another user's notification preferences requires user:manage".into(),
        ))
    }
}

fn duplicate(resource: &str) -> CoreError {
    CoreError::Conflict(format!(
        "an active notification preference for '{resource}' already exists"
    ))
}
