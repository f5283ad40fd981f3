//! HTTP-level tests for the notification preference endpoints.

mod common;

use axum::http::StatusCode;
use common::{
    body_json, delete_auth, get_auth, post_json, post_json_auth, principal, put_json_auth, tenant,
    token_for, Tenant,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use waybill_core::permissions::{Principal, USER_MANAGE};

const BASE: &str = "/api/v1/notification-preferences/";

fn body(t: &Tenant, owner: &Principal, extra: Value) -> Value {
    let mut body = json!({
        "userId": owner.user_id,
        "organizationId": t.org,
        "businessUnitId": t.bu,
        "resource": "shipment",
        "updateTypes": ["status_change"],
    });
    if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    body
}

#[sqlx::test(migrations = "../db/migrations")]
async fn create_get_update_delete(pool: PgPool) {
    let app = common::build_test_app(pool).await;
    let t = tenant();
    let me = principal(&t, &[]);
    let token = token_for(&me);

    let response = post_json_auth(app.clone(), BASE, &token, body(&t, &me, json!({}))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await["data"].clone();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["version"], 1);
    assert_eq!(created["timezone"], "UTC");

    let response = get_auth(app.clone(), &format!("{BASE}{id}/"), &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["id"], id.as_str());

    let update = json!({
        "version": 1,
        "resource": "shipment",
        "updateTypes": ["status_change", "assignment"],
    });
    let response = put_json_auth(app.clone(), &format!("{BASE}{id}/"), &token, update.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await["data"].clone();
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["updateTypes"].as_array().unwrap().len(), 2);

    // Stale version.
    let response = put_json_auth(app.clone(), &format!("{BASE}{id}/"), &token, update).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = delete_auth(app.clone(), &format!("{BASE}{id}/"), &token).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get_auth(app, &format!("{BASE}{id}/"), &token).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn duplicate_active_preference_conflicts(pool: PgPool) {
    let app = common::build_test_app(pool).await;
    let t = tenant();
    let me = principal(&t, &[]);
    let token = token_for(&me);

    let first = post_json_auth(app.clone(), BASE, &token, body(&t, &me, json!({}))).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = post_json_auth(app, BASE, &token, body(&t, &me, json!({}))).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "CONFLICT");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn invalid_fields_are_listed_in_details(pool: PgPool) {
    let app = common::build_test_app(pool).await;
    let t = tenant();
    let me = principal(&t, &[]);
    let token = token_for(&me);

    let invalid = body(
        &t,
        &me,
        json!({"resource": "spaceship", "batchIntervalMinutes": 0}),
    );
    let response = post_json_auth(app, BASE, &token, invalid).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = json["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"resource"));
    assert!(fields.contains(&"batchIntervalMinutes"));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn others_need_user_manage(pool: PgPool) {
    let app = common::build_test_app(pool).await;
    let t = tenant();
    let owner = principal(&t, &[]);
    let peer = principal(&t, &[]);
    let manager = principal(&t, &[USER_MANAGE]);

    let response = post_json_auth(app.clone(), BASE, &token_for(&peer), body(&t, &owner, json!({}))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response =
        post_json_auth(app.clone(), BASE, &token_for(&manager), body(&t, &owner, json!({}))).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let uri = format!("{BASE}user/?userId={}", owner.user_id);
    let response = get_auth(app.clone(), &uri, &token_for(&peer)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = get_auth(app.clone(), &uri, &token_for(&owner)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 1);

    // Without user:manage a listing only ever shows the caller's rows.
    let json = body_json(get_auth(app.clone(), BASE, &token_for(&peer)).await).await;
    assert_eq!(json["total"], 0);
    let json = body_json(get_auth(app, BASE, &token_for(&manager)).await).await;
    assert_eq!(json["total"], 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn immutable_owner_is_rejected_on_update(pool: PgPool) {
    let app = common::build_test_app(pool).await;
    let t = tenant();
    let me = principal(&t, &[]);
    let token = token_for(&me);

    let created = body_json(post_json_auth(app.clone(), BASE, &token, body(&t, &me, json!({}))).await).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let update = json!({
        "userId": principal(&t, &[]).user_id,
        "version": 1,
        "resource": "shipment",
        "updateTypes": ["status_change"],
    });
    let response = put_json_auth(app, &format!("{BASE}{id}/"), &token, update).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["details"][0]["field"], "userId");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn create_without_token_is_unauthorized(pool: PgPool) {
    let app = common::build_test_app(pool).await;
    let t = tenant();
    let me = principal(&t, &[]);

    let response = post_json(app, BASE, body(&t, &me, json!({}))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
