//! Handlers for the `/notifications` resource.
//!
//! All endpoints require authentication via [`AuthUser`] and only ever see
//! notifications visible to the caller.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use waybill_core::permissions::Principal;
use waybill_core::types::PulId;
use waybill_db::models::notification::{Notification, NotificationQuery, NotificationScope};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::{DataResponse, PageResponse};
use crate::state::AppState;

/// Query parameters for `GET /notifications`.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// If `true`, return only unread notifications.
    #[serde(default)]
    pub unread_only: bool,
}

fn scope(principal: &Principal) -> NotificationScope {
    NotificationScope {
        user_id: principal.user_id.clone(),
        organization_id: principal.organization_id.clone(),
        business_unit_id: Some(principal.business_unit_id.clone()),
    }
}

/// GET /api/v1/notifications
pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<PageResponse<Notification>>> {
    let page = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    let query = NotificationQuery {
        scope: scope(&auth),
        limit: page.limit(),
        offset: page.offset(),
        unread_only: params.unread_only,
    };
    let page = state.notifications.user_notifications(&query).await?;

    Ok(Json(PageResponse {
        data: page.items,
        total: page.total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// GET /api/v1/notifications/unread-count
pub async fn unread_count(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let count = state
        .notifications
        .unread_count(&auth.user_id, &auth.organization_id)
        .await?;
    Ok(Json(DataResponse {
        data: json!({ "count": count }),
    }))
}

/// POST /api/v1/notifications/{id}/read
///
/// 204 on success; 404 when the notification is not visible to the caller
/// or was already read.
pub async fn mark_read(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<PulId>,
) -> AppResult<StatusCode> {
    state.notifications.mark_as_read(&id, &scope(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/notifications/{id}/dismiss
pub async fn dismiss(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<PulId>,
) -> AppResult<StatusCode> {
    state.notifications.mark_as_dismissed(&id, &scope(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/notifications/read-all
pub async fn mark_all_read(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let count = state.notifications.read_all(&scope(&auth)).await?;
    Ok(Json(DataResponse {
        data: json!({ "markedRead": count }),
    }))
}
