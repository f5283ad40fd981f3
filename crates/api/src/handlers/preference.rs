//! Handlers for the `/notification-preferences` resource.
//!
//! Authorization (owner or `user:manage` within the tenant) lives in
//! [`PreferenceService`](waybill_notifications::PreferenceService); these
//! handlers only translate HTTP.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use waybill_core::types::PulId;
use waybill_db::models::preference::{
    CreateNotificationPreference, NotificationPreference, PreferenceFilter,
    UpdateNotificationPreference,
};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::{DataResponse, PageResponse};
use crate::state::AppState;

/// Query parameters for `GET /notification-preferences/`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub user_id: Option<PulId>,
    pub business_unit_id: Option<PulId>,
    pub resource: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub user_id: Option<PulId>,
}

/// GET /api/v1/notification-preferences/
pub async fn list_preferences(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<PageResponse<NotificationPreference>>> {
    let page = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    let filter = PreferenceFilter {
        organization_id: auth.organization_id.clone(),
        user_id: params.user_id,
        business_unit_id: params.business_unit_id,
        resource: params.resource,
        is_active: params.is_active,
        limit: page.limit(),
        offset: page.offset(),
    };
    let (limit, offset) = (filter.limit, filter.offset);
    let (items, total) = state.preferences.list(&auth, filter).await?;

    Ok(Json(PageResponse {
        data: items,
        total,
        limit,
        offset,
    }))
}

/// POST /api/v1/notification-preferences/
pub async fn create_preference(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateNotificationPreference>,
) -> AppResult<(StatusCode, Json<DataResponse<NotificationPreference>>)> {
    let created = state.preferences.create(&auth, input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

/// GET /api/v1/notification-preferences/user/?userId=
///
/// Without `userId` the caller's own preferences are returned.
pub async fn list_user_preferences(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> AppResult<Json<DataResponse<Vec<NotificationPreference>>>> {
    let user_id = params
        .user_id
        .filter(|id| !id.is_nil())
        .unwrap_or_else(|| auth.user_id.clone());
    let items = state.preferences.list_for_user(&auth, &user_id).await?;
    Ok(Json(DataResponse { data: items }))
}

/// GET /api/v1/notification-preferences/{id}/
pub async fn get_preference(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<PulId>,
) -> AppResult<Json<DataResponse<NotificationPreference>>> {
    let pref = state.preferences.get(&auth, &id).await?;
    Ok(Json(DataResponse { data: pref }))
}

/// PUT /api/v1/notification-preferences/{id}/
pub async fn update_preference(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<PulId>,
    Json(input): Json<UpdateNotificationPreference>,
) -> AppResult<Json<DataResponse<NotificationPreference>>> {
    let updated = state.preferences.update(&auth, &id, input).await?;
    Ok(Json(DataResponse { data: updated }))
}

/// DELETE /api/v1/notification-preferences/{id}/
pub async fn delete_preference(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<PulId>,
) -> AppResult<StatusCode> {
    state.preferences.delete(&auth, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
