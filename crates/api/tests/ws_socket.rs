//! End-to-end WebSocket tests against a real listener.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use waybill_api::router::build_app_router;
use waybill_api::state::AppState;
use waybill_core::rooms::presence_keys;
use waybill_db::models::notification::CreateNotification;
use waybill_notifications::PresenceStore;

use common::{principal, tenant, token_for};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_app_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

async fn next_text(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame should arrive")
            .expect("socket open")
            .expect("frame ok");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[sqlx::test(migrations = "../db/migrations")]
async fn ping_pong_and_notification_delivery(pool: PgPool) {
    let state = common::test_state(pool).await;
    let addr = serve(state.clone()).await;
    let t = tenant();
    let me = principal(&t, &[]);

    let url = format!("ws://{addr}/ws?token={}", token_for(&me));
    let (mut socket, _) = connect_async(url).await.expect("upgrade should succeed");

    socket
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();
    let pong = next_text(&mut socket).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["data"]["timestamp"].is_i64());

    state
        .notifications
        .send_notification(CreateNotification::for_user(
            t.org.clone(),
            Some(t.bu.clone()),
            me.user_id.clone(),
            "shipment.status_change",
            "Shipment delivered",
            "S2412000112345 was delivered",
        ))
        .await
        .unwrap();

    let frame = next_text(&mut socket).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["data"]["title"], "Shipment delivered");

    let connections = state
        .presence
        .members(&presence_keys::user_connections(me.user_id.as_str()))
        .await
        .unwrap();
    assert_eq!(connections.len(), 1);
    assert!(connections[0].starts_with("127.0.0.1:"));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn client_messages_are_rebroadcast_to_the_org(pool: PgPool) {
    let state = common::test_state(pool).await;
    let addr = serve(state).await;
    let t = tenant();
    let sender = principal(&t, &[]);
    let receiver = principal(&t, &[]);

    let (mut listening, _) = connect_async(format!("ws://{addr}/ws?token={}", token_for(&receiver)))
        .await
        .unwrap();
    let (mut talking, _) = connect_async(format!("ws://{addr}/ws?token={}", token_for(&sender)))
        .await
        .unwrap();

    // Round-trip a ping on each socket so both are registered.
    for socket in [&mut listening, &mut talking] {
        socket
            .send(Message::Text(json!({"type": "ping"}).to_string().into()))
            .await
            .unwrap();
        assert_eq!(next_text(socket).await["type"], "pong");
    }

    talking
        .send(Message::Text(
            json!({"type": "dock_update", "target": "org", "content": {"door": 7}}).to_string().into(),
        ))
        .await
        .unwrap();

    let frame = next_text(&mut listening).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["data"]["type"], "dock_update");
    assert_eq!(frame["data"]["user"], sender.user_id.as_str());
    assert_eq!(frame["data"]["content"]["door"], 7);
}

async fn wait_for_member(state: &AppState, key: &str, member: &str) {
    for _ in 0..100 {
        let members = state.presence.members(key).await.unwrap();
        if members.iter().any(|m| m == member) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{member} never showed up in {key}");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn client_messages_cannot_cross_organizations(pool: PgPool) {
    let state = common::test_state(pool).await;
    let addr = serve(state.clone()).await;
    let home = tenant();
    let away = tenant();
    let sender = principal(&home, &[]);
    let colleague = principal(&home, &[]);
    let outsider = principal(&away, &[]);

    let outsider_room = format!("org_{}", away.org);
    let (mut outside, _) = connect_async(format!(
        "ws://{addr}/ws?token={}&room={outsider_room}",
        token_for(&outsider)
    ))
    .await
    .unwrap();
    let (mut inside, _) = connect_async(format!("ws://{addr}/ws?token={}", token_for(&colleague)))
        .await
        .unwrap();
    let (mut talking, _) = connect_async(format!("ws://{addr}/ws?token={}", token_for(&sender)))
        .await
        .unwrap();
    wait_for_member(&state, &presence_keys::org_clients(away.org.as_str()), outsider.user_id.as_str()).await;
    wait_for_member(&state, &presence_keys::org_clients(home.org.as_str()), colleague.user_id.as_str()).await;

    for (target, target_id) in [("user", outsider.user_id.to_string()), ("room", outsider_room.clone())] {
        talking
            .send(Message::Text(
                json!({"type": "dock_update", "target": target, "targetID": target_id, "content": {"door": 7}})
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
        let frame = next_text(&mut talking).await;
        assert_eq!(frame["type"], "error");
        assert!(frame["data"]["message"].is_string());
    }

    // A same-org user target still goes through.
    talking
        .send(Message::Text(
            json!({"type": "dock_update", "target": "user", "targetID": colleague.user_id, "content": {"door": 8}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let frame = next_text(&mut inside).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["data"]["content"]["door"], 8);

    let leaked = tokio::time::timeout(Duration::from_millis(300), outside.next()).await;
    assert!(leaked.is_err(), "outsider received {leaked:?}");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn upgrade_without_token_is_rejected(pool: PgPool) {
    let state = common::test_state(pool).await;
    let addr = serve(state).await;

    let result = connect_async(format!("ws://{addr}/ws")).await;
    assert!(result.is_err());
}
