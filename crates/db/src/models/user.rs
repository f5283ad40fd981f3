//! User directory model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use waybill_core::types::{PulId, Timestamp};

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: PulId,
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub name: String,
    pub username: String,
    pub email: Option<String>,
    pub timezone: String,
    pub created_at: Timestamp,
}

/// DTO for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub organization_id: PulId,
    pub business_unit_id: Option<PulId>,
    pub name: String,
    pub username: String,
    pub email: Option<String>,
}
