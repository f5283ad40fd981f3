//! Repository for the `users` table.

use sqlx::PgPool;
use waybill_core::types::{now_ts, prefixes, PulId};

use crate::error::DbError;
use crate::models::user::{CreateUser, User};

/// Column list for `users` queries.
const COLUMNS: &str =
    "id, organization_id, business_unit_id, name, username, email, timezone, created_at";

/// Name shown when a user cannot be resolved.
pub const UNKNOWN_USER_NAME: &str = "Someone";

/// Provides user lookups.
pub struct UserRepo;

impl UserRepo {
    /// Insert a user.
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<User, DbError> {
        let query = format!(
            "INSERT INTO users \
                (id, organization_id, business_unit_id, name, username, email, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, User>(&query)
            .bind(PulId::new(prefixes::USER))
            .bind(&input.organization_id)
            .bind(&input.business_unit_id)
            .bind(&input.name)
            .bind(&input.username)
            .bind(&input.email)
            .bind(now_ts())
            .fetch_one(pool)
            .await?;
        Ok(row)
    }

    /// Find a user by id.
    pub async fn find_by_id(pool: &PgPool, id: &PulId) -> Result<Option<User>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Display name for a user, or [`UNKNOWN_USER_NAME`] when unresolvable.
    pub async fn display_name(pool: &PgPool, id: &PulId) -> Result<String, DbError> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()))
    }
}
