//! Repository for the `notifications` table.

use sqlx::types::Json;
use sqlx::PgPool;
use waybill_core::types::{now_ts, prefixes, PulId, Timestamp};

use crate::error::DbError;
use crate::models::notification::{
    CreateNotification, Notification, NotificationPage, NotificationQuery, NotificationScope,
};

/// Column list for `notifications` queries.
const COLUMNS: &str = "id, organization_id, business_unit_id, target_user_id, target_role_id, \
    event_type, priority, channel, title, message, data, related_entities, actions, source, \
    job_id, correlation_id, tags, expires_at, delivered_at, read_at, dismissed_at, \
    delivery_status, retry_count, max_retries, version, created_at, updated_at";

/// Rows a user may see: org-wide broadcasts of their organization, plus
/// notifications addressed to them. `$1` = user, `$2` = org, `$3` = now.
const VISIBLE_TO_USER: &str = "((channel = 'global' AND organization_id = $2) \
    OR (channel = 'user' AND target_user_id = $1 AND organization_id = $2)) \
    AND (expires_at IS NULL OR expires_at > $3)";

/// Provides CRUD and lifecycle operations for notifications.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert a notification, assigning an id when the input carries nil.
    pub async fn create(pool: &PgPool, input: &CreateNotification) -> Result<Notification, DbError> {
        let id = if input.id.is_nil() {
            PulId::new(prefixes::NOTIFICATION)
        } else {
            input.id.clone()
        };
        let now = now_ts();

        let query = format!(
            "INSERT INTO notifications \
                (id, organization_id, business_unit_id, target_user_id, target_role_id, \
                 event_type, priority, channel, title, message, data, related_entities, \
                 actions, source, job_id, correlation_id, tags, expires_at, max_retries, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                     $16, $17, $18, $19, $20, $20) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, Notification>(&query)
            .bind(&id)
            .bind(&input.organization_id)
            .bind(&input.business_unit_id)
            .bind(&input.target_user_id)
            .bind(&input.target_role_id)
            .bind(&input.event_type)
            .bind(input.priority)
            .bind(input.channel)
            .bind(&input.title)
            .bind(&input.message)
            .bind(&input.data)
            .bind(Json(&input.related_entities))
            .bind(Json(&input.actions))
            .bind(&input.source)
            .bind(&input.job_id)
            .bind(&input.correlation_id)
            .bind(&input.tags)
            .bind(input.expires_at)
            .bind(input.max_retries)
            .bind(now)
            .fetch_one(pool)
            .await?;
        Ok(row)
    }

    /// Persist the mutable fields of `notification` if its version still
    /// matches the stored one. Returns the row at `version + 1`.
    pub async fn update(pool: &PgPool, notification: &Notification) -> Result<Notification, DbError> {
        let query = format!(
            "UPDATE notifications SET \
                priority = $3, title = $4, message = $5, data = $6, related_entities = $7, \
                actions = $8, tags = $9, expires_at = $10, delivered_at = $11, read_at = $12, \
                dismissed_at = $13, delivery_status = $14, retry_count = $15, \
                version = version + 1, updated_at = $16 \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(&notification.id)
            .bind(notification.version)
            .bind(notification.priority)
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(&notification.data)
            .bind(&notification.related_entities)
            .bind(&notification.actions)
            .bind(&notification.tags)
            .bind(notification.expires_at)
            .bind(notification.delivered_at)
            .bind(notification.read_at)
            .bind(notification.dismissed_at)
            .bind(notification.delivery_status)
            .bind(notification.retry_count)
            .bind(now_ts())
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::VersionConflict {
                entity: "Notification",
                id: notification.id.to_string(),
                expected: notification.version,
            })
    }

    /// Find a notification by id.
    pub async fn find_by_id(pool: &PgPool, id: &PulId) -> Result<Option<Notification>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        let row = sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// One page of the user's visible, unexpired notifications, newest first,
    /// with the unpaged total.
    pub async fn list_for_user(
        pool: &PgPool,
        params: &NotificationQuery,
    ) -> Result<NotificationPage, DbError> {
        let unread = if params.unread_only {
            "AND read_at IS NULL"
        } else {
            ""
        };
        let now = now_ts();
        let scope = &params.scope;

        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE {VISIBLE_TO_USER} {unread} \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5"
        );
        let items = sqlx::query_as::<_, Notification>(&query)
            .bind(&scope.user_id)
            .bind(&scope.organization_id)
            .bind(now)
            .bind(params.limit)
            .bind(params.offset)
            .fetch_all(pool)
            .await?;

        let count_query =
            format!("SELECT COUNT(*) FROM notifications WHERE {VISIBLE_TO_USER} {unread}");
        let total: i64 = sqlx::query_scalar(&count_query)
            .bind(&scope.user_id)
            .bind(&scope.organization_id)
            .bind(now)
            .fetch_one(pool)
            .await?;

        Ok(NotificationPage { items, total })
    }

    /// Number of visible, unexpired, unread notifications.
    pub async fn unread_count(
        pool: &PgPool,
        user_id: &PulId,
        organization_id: &PulId,
    ) -> Result<i64, DbError> {
        let query = format!(
            "SELECT COUNT(*) FROM notifications WHERE {VISIBLE_TO_USER} AND read_at IS NULL"
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(user_id)
            .bind(organization_id)
            .bind(now_ts())
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Set `read_at` on a notification the user can see.
    ///
    /// Already-read, invisible and missing notifications all report
    /// not-found; the check and the write happen in one statement.
    pub async fn mark_read(
        pool: &PgPool,
        notification_id: &PulId,
        scope: &NotificationScope,
    ) -> Result<(), DbError> {
        let query = format!(
            "UPDATE notifications \
             SET read_at = $3, delivered_at = COALESCE(delivered_at, $3), \
                 version = version + 1, updated_at = $3 \
             WHERE id = $4 AND read_at IS NULL AND {VISIBLE_TO_USER}"
        );
        let result = sqlx::query(&query)
            .bind(&scope.user_id)
            .bind(&scope.organization_id)
            .bind(now_ts())
            .bind(notification_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Notification", notification_id));
        }
        Ok(())
    }

    /// Set `dismissed_at` on a notification the user can see.
    pub async fn mark_dismissed(
        pool: &PgPool,
        notification_id: &PulId,
        scope: &NotificationScope,
    ) -> Result<(), DbError> {
        let query = format!(
            "UPDATE notifications \
             SET dismissed_at = $3, version = version + 1, updated_at = $3 \
             WHERE id = $4 AND dismissed_at IS NULL AND {VISIBLE_TO_USER}"
        );
        let result = sqlx::query(&query)
            .bind(&scope.user_id)
            .bind(&scope.organization_id)
            .bind(now_ts())
            .bind(notification_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Notification", notification_id));
        }
        Ok(())
    }

    /// Mark every unread notification in the user's scope as read.
    ///
    /// Returns the number of notifications updated.
    pub async fn read_all(pool: &PgPool, scope: &NotificationScope) -> Result<u64, DbError> {
        let query = format!(
            "UPDATE notifications \
             SET read_at = $3, delivered_at = COALESCE(delivered_at, $3), \
                 version = version + 1, updated_at = $3 \
             WHERE read_at IS NULL AND {VISIBLE_TO_USER}"
        );
        let result = sqlx::query(&query)
            .bind(&scope.user_id)
            .bind(&scope.organization_id)
            .bind(now_ts())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Record successful delivery. An expired notification keeps its status.
    ///
    /// Returns `true` if a row was updated.
    pub async fn mark_delivered(
        pool: &PgPool,
        notification_id: &PulId,
        delivered_at: Timestamp,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET delivered_at = COALESCE(delivered_at, $2), delivery_status = 'delivered', \
                 version = version + 1, updated_at = $2 \
             WHERE id = $1 AND delivery_status <> 'expired'",
        )
        .bind(notification_id)
        .bind(delivered_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed fan-out so the maintenance sweep can retry it.
    pub async fn mark_failed(pool: &PgPool, notification_id: &PulId) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET delivery_status = 'failed', version = version + 1, updated_at = $2 \
             WHERE id = $1 AND delivery_status <> 'delivered'",
        )
        .bind(notification_id)
        .bind(now_ts())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count one delivery retry. Returns `false` once the budget is spent.
    pub async fn record_retry(pool: &PgPool, notification_id: &PulId) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET retry_count = retry_count + 1, version = version + 1, updated_at = $2 \
             WHERE id = $1 AND retry_count < max_retries",
        )
        .bind(notification_id)
        .bind(now_ts())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Failed, unexpired notifications with retry budget left, oldest first.
    pub async fn pending_retries(pool: &PgPool, limit: i64) -> Result<Vec<Notification>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE delivery_status = 'failed' AND retry_count < max_retries \
               AND (expires_at IS NULL OR expires_at > $1) \
             ORDER BY created_at ASC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, Notification>(&query)
            .bind(now_ts())
            .bind(limit)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Notifications past `expires_at` whose stored status is not yet expired.
    pub async fn expired(pool: &PgPool, limit: i64) -> Result<Vec<Notification>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE expires_at IS NOT NULL AND expires_at <= $1 \
               AND delivery_status <> 'expired' \
             ORDER BY expires_at ASC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, Notification>(&query)
            .bind(now_ts())
            .bind(limit)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Store `expired` as the delivery status of the given notifications.
    pub async fn mark_expired(pool: &PgPool, ids: &[PulId]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let result = sqlx::query(
            "UPDATE notifications \
             SET delivery_status = 'expired', version = version + 1, updated_at = $2 \
             WHERE id = ANY($1)",
        )
        .bind(&ids)
        .bind(now_ts())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete read or dismissed notifications created before `cutoff`.
    ///
    /// Returns the number of rows removed.
    pub async fn delete_older_than(pool: &PgPool, cutoff: Timestamp) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM notifications \
             WHERE created_at < $1 AND (read_at IS NOT NULL OR dismissed_at IS NOT NULL)",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
