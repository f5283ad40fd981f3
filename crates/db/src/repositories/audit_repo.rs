//! Repository for the `audit_entries` table.

use sqlx::PgPool;
use waybill_core::audit_changes::actions;
use waybill_core::types::{now_ts, prefixes, PulId};

use crate::error::DbError;
use crate::models::audit::{AuditCursor, AuditEntry, CreateAuditEntry};

/// Column list for `audit_entries` queries.
const COLUMNS: &str = "id, organization_id, business_unit_id, user_id, resource, resource_id, \
    action, changes, previous_state, current_state, comment, timestamp";

/// Read and write access to the audit log.
pub struct AuditRepo;

impl AuditRepo {
    /// Append an audit entry.
    pub async fn create(pool: &PgPool, input: &CreateAuditEntry) -> Result<AuditEntry, DbError> {
        let query = format!(
            "INSERT INTO audit_entries \
                (id, organization_id, business_unit_id, user_id, resource, resource_id, \
                 action, changes, previous_state, current_state, comment, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, AuditEntry>(&query)
            .bind(PulId::new(prefixes::AUDIT_ENTRY))
            .bind(&input.organization_id)
            .bind(&input.business_unit_id)
            .bind(&input.user_id)
            .bind(&input.resource)
            .bind(&input.resource_id)
            .bind(&input.action)
            .bind(&input.changes)
            .bind(&input.previous_state)
            .bind(&input.current_state)
            .bind(&input.comment)
            .bind(input.timestamp.unwrap_or_else(now_ts))
            .fetch_one(pool)
            .await?;
        Ok(row)
    }

    /// Update entries past `cursor` in `(timestamp, id)` order, oldest first.
    pub async fn recent_updates(
        pool: &PgPool,
        cursor: &AuditCursor,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_entries \
             WHERE action = $1 \
               AND (timestamp > $2 OR (timestamp = $2 AND $3::text IS NOT NULL AND id > $3)) \
             ORDER BY timestamp ASC, id ASC \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, AuditEntry>(&query)
            .bind(actions::UPDATE)
            .bind(cursor.timestamp)
            .bind(cursor.after_id.as_ref())
            .bind(limit)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// The user who created a record: author of its earliest `Create` entry.
    pub async fn find_creator(
        pool: &PgPool,
        resource: &str,
        resource_id: &str,
        organization_id: &PulId,
    ) -> Result<Option<PulId>, DbError> {
        let creator: Option<PulId> = sqlx::query_scalar(
            "SELECT user_id FROM audit_entries \
             WHERE resource = $1 AND resource_id = $2 AND organization_id = $3 \
               AND action = $4 \
             ORDER BY timestamp ASC \
             LIMIT 1",
        )
        .bind(resource)
        .bind(resource_id)
        .bind(organization_id)
        .bind(actions::CREATE)
        .fetch_optional(pool)
        .await?;
        Ok(creator)
    }

    /// Entries for one record, newest first.
    pub async fn list_for_record(
        pool: &PgPool,
        resource: &str,
        resource_id: &str,
        organization_id: &PulId,
    ) -> Result<Vec<AuditEntry>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_entries \
             WHERE resource = $1 AND resource_id = $2 AND organization_id = $3 \
             ORDER BY timestamp DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, AuditEntry>(&query)
            .bind(resource)
            .bind(resource_id)
            .bind(organization_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}
