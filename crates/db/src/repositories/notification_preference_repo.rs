//! Repository for the `notification_preferences` table.

use sqlx::PgPool;
use waybill_core::types::{now_ts, prefixes, PulId};

use crate::error::DbError;
use crate::models::preference::{
    CreateNotificationPreference, NotificationPreference, PreferenceFilter, PreferenceSettings,
};

/// Column list for `notification_preferences` queries.
const COLUMNS: &str = "id, user_id, organization_id, business_unit_id, resource, update_types, \
    notify_on_all_updates, excluded_user_ids, preferred_channels, quiet_hours_enabled, \
    quiet_hours_start, quiet_hours_end, timezone, batch_notifications, batch_interval_minutes, \
    is_active, version, created_at, updated_at";

/// Provides CRUD operations for notification preferences.
pub struct NotificationPreferenceRepo;

impl NotificationPreferenceRepo {
    /// Insert a preference.
    ///
    /// A second active preference for the same (user, org, resource) fails
    /// with a unique violation on `uq_notification_preferences_active`.
    pub async fn create(
        pool: &PgPool,
        input: &CreateNotificationPreference,
    ) -> Result<NotificationPreference, DbError> {
        let s = &input.settings;
        let query = format!(
            "INSERT INTO notification_preferences \
                (id, user_id, organization_id, business_unit_id, resource, update_types, \
                 notify_on_all_updates, excluded_user_ids, preferred_channels, \
                 quiet_hours_enabled, quiet_hours_start, quiet_hours_end, timezone, \
                 batch_notifications, batch_interval_minutes, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $17) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(PulId::new(prefixes::PREFERENCE))
            .bind(&input.user_id)
            .bind(&input.organization_id)
            .bind(&input.business_unit_id)
            .bind(&s.resource)
            .bind(&s.update_types)
            .bind(s.notify_on_all_updates)
            .bind(&s.excluded_user_ids)
            .bind(&s.preferred_channels)
            .bind(s.quiet_hours_enabled)
            .bind(&s.quiet_hours_start)
            .bind(&s.quiet_hours_end)
            .bind(&s.timezone)
            .bind(s.batch_notifications)
            .bind(s.batch_interval_minutes)
            .bind(s.is_active)
            .bind(now_ts())
            .fetch_one(pool)
            .await?;
        Ok(row)
    }

    /// Replace the editable fields if `expected_version` still matches.
    ///
    /// `user_id` and `organization_id` are never touched.
    pub async fn update(
        pool: &PgPool,
        id: &PulId,
        organization_id: &PulId,
        expected_version: i64,
        s: &PreferenceSettings,
    ) -> Result<NotificationPreference, DbError> {
        let query = format!(
            "UPDATE notification_preferences SET \
                resource = $4, update_types = $5, notify_on_all_updates = $6, \
                excluded_user_ids = $7, preferred_channels = $8, quiet_hours_enabled = $9, \
                quiet_hours_start = $10, quiet_hours_end = $11, timezone = $12, \
                batch_notifications = $13, batch_interval_minutes = $14, is_active = $15, \
                version = version + 1, updated_at = $16 \
             WHERE id = $1 AND organization_id = $2 AND version = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(id)
            .bind(organization_id)
            .bind(expected_version)
            .bind(&s.resource)
            .bind(&s.update_types)
            .bind(s.notify_on_all_updates)
            .bind(&s.excluded_user_ids)
            .bind(&s.preferred_channels)
            .bind(s.quiet_hours_enabled)
            .bind(&s.quiet_hours_start)
            .bind(&s.quiet_hours_end)
            .bind(&s.timezone)
            .bind(s.batch_notifications)
            .bind(s.batch_interval_minutes)
            .bind(s.is_active)
            .bind(now_ts())
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::VersionConflict {
                entity: "NotificationPreference",
                id: id.to_string(),
                expected: expected_version,
            })
    }

    /// Find a preference by id within an organization.
    pub async fn find_by_id(
        pool: &PgPool,
        id: &PulId,
        organization_id: &PulId,
    ) -> Result<Option<NotificationPreference>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE id = $1 AND organization_id = $2"
        );
        let row = sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Filtered, paginated listing with the unpaged total.
    pub async fn list(
        pool: &PgPool,
        filter: &PreferenceFilter,
    ) -> Result<(Vec<NotificationPreference>, i64), DbError> {
        let where_clause = "organization_id = $1 \
            AND ($2::text IS NULL OR user_id = $2) \
            AND ($3::text IS NULL OR business_unit_id = $3) \
            AND ($4::text IS NULL OR resource = $4) \
            AND ($5::boolean IS NULL OR is_active = $5)";

        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT $6 OFFSET $7"
        );
        let rows = sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(&filter.organization_id)
            .bind(&filter.user_id)
            .bind(&filter.business_unit_id)
            .bind(&filter.resource)
            .bind(filter.is_active)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(pool)
            .await?;

        let count_query =
            format!("SELECT COUNT(*) FROM notification_preferences WHERE {where_clause}");
        let total: i64 = sqlx::query_scalar(&count_query)
            .bind(&filter.organization_id)
            .bind(&filter.user_id)
            .bind(&filter.business_unit_id)
            .bind(&filter.resource)
            .bind(filter.is_active)
            .fetch_one(pool)
            .await?;

        Ok((rows, total))
    }

    /// All preferences belonging to a user within an organization.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: &PulId,
        organization_id: &PulId,
    ) -> Result<Vec<NotificationPreference>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND organization_id = $2 \
             ORDER BY resource, created_at"
        );
        let rows = sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .bind(organization_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Active preferences of a user for one resource.
    pub async fn list_active_for_resource(
        pool: &PgPool,
        user_id: &PulId,
        organization_id: &PulId,
        resource: &str,
    ) -> Result<Vec<NotificationPreference>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND organization_id = $2 AND resource = $3 AND is_active \
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .bind(organization_id)
            .bind(resource)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Active preferences of a user across every resource in the tenant.
    pub async fn list_active_for_user(
        pool: &PgPool,
        user_id: &PulId,
        organization_id: &PulId,
    ) -> Result<Vec<NotificationPreference>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND organization_id = $2 AND is_active \
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .bind(organization_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Whether another active preference exists for (user, org, resource).
    pub async fn active_exists(
        pool: &PgPool,
        user_id: &PulId,
        organization_id: &PulId,
        resource: &str,
        exclude_id: Option<&PulId>,
    ) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
                SELECT 1 FROM notification_preferences \
                WHERE user_id = $1 AND organization_id = $2 AND resource = $3 AND is_active \
                  AND ($4::text IS NULL OR id <> $4))",
        )
        .bind(user_id)
        .bind(organization_id)
        .bind(resource)
        .bind(exclude_id)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Delete a preference. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: &PulId, organization_id: &PulId) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM notification_preferences WHERE id = $1 AND organization_id = $2",
        )
        .bind(id)
        .bind(organization_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
