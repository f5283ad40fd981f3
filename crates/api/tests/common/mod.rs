//! Shared fixtures for the HTTP and WebSocket integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use waybill_api::auth::jwt::{generate_access_token, JwtConfig};
use waybill_api::config::ServerConfig;
use waybill_api::router::build_app_router;
use waybill_api::state::AppState;
use waybill_core::permissions::Principal;
use waybill_core::types::{prefixes, PulId};
use waybill_notifications::{InMemoryBus, InMemoryPresence};

pub const TEST_SECRET: &str = "test-secret-key-for-integration-tests";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: String::new(),
        redis_url: None,
        jwt: JwtConfig::new(TEST_SECRET),
        audit_poll_interval_secs: 5,
        batch_tick_secs: 60,
        sequence_format_cache_ttl_secs: 900,
        notification_retention_days: 30,
        ws_path: "/ws".to_string(),
    }
}

/// Application state on a single-node in-memory bus.
pub async fn test_state(pool: PgPool) -> AppState {
    AppState::build(
        pool,
        test_config(),
        Arc::new(InMemoryBus::default()),
        Arc::new(InMemoryPresence::new()),
    )
    .await
    .expect("hub should start on the in-memory bus")
}

/// Build the full application router through the production builder.
pub async fn build_test_app(pool: PgPool) -> Router {
    build_app_router(test_state(pool).await)
}

// ---------------------------------------------------------------------------
// Principals and tokens
// ---------------------------------------------------------------------------

pub struct Tenant {
    pub org: PulId,
    pub bu: PulId,
}

pub fn tenant() -> Tenant {
    Tenant {
        org: PulId::new(prefixes::ORGANIZATION),
        bu: PulId::new(prefixes::BUSINESS_UNIT),
    }
}

pub fn principal(t: &Tenant, permissions: &[&str]) -> Principal {
    Principal {
        user_id: PulId::new(prefixes::USER),
        organization_id: t.org.clone(),
        business_unit_id: t.bu.clone(),
        role: "dispatcher".into(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn token_for(principal: &Principal) -> String {
    generate_access_token(principal, &JwtConfig::new(TEST_SECRET)).expect("token should encode")
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

async fn send(app: Router, method: Method, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, None, Some(body)).await
}

pub async fn post_json_auth(app: Router, uri: &str, token: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn put_json_auth(app: Router, uri: &str, token: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn delete_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, Some(token), None).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
