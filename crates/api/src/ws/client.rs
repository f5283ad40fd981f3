//! Per-connection read and write pumps.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use waybill_core::rooms::BroadcastTarget;
use waybill_notifications::Broadcaster;

use crate::ws::handler::room_in_tenant;
use crate::ws::hub::{Client, Hub};
use crate::ws::message::{error_frame, pong_frame, ClientMessage, PING};

/// Drive one upgraded connection until either side closes.
///
/// The client is registered with the hub for the lifetime of the socket;
/// the write pump runs on its own task, the read pump on this one.
pub async fn serve(
    socket: WebSocket,
    hub: Arc<Hub>,
    client: Arc<Client>,
    outbound: mpsc::Receiver<Message>,
) {
    let (sink, stream) = socket.split();
    hub.register(Arc::clone(&client));

    let writer = tokio::spawn(write_pump(sink, outbound, Arc::clone(&client)));
    read_pump(stream, &hub, &client).await;

    hub.unregister(&client.id);
    client.close();
    let _ = writer.await;
    tracing::info!(client_id = %client.id, user_id = %client.user_id, "WebSocket disconnected");
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    client: Arc<Client>,
) {
    loop {
        let message = tokio::select! {
            _ = client.closed() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            tracing::debug!(client_id = %client.id, error = %e, "WebSocket write failed");
            client.close();
            return;
        }
        if is_close {
            client.close();
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn read_pump(mut stream: SplitStream<WebSocket>, hub: &Hub, client: &Client) {
    loop {
        let frame = tokio::select! {
            _ = client.closed() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => handle_text(hub, client, text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Pong(_))) => {
                tracing::trace!(client_id = %client.id, "Pong received");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(client_id = %client.id, error = %e, "WebSocket closed unexpectedly");
                break;
            }
        }
    }
}

async fn handle_text(hub: &Hub, client: &Client, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(client_id = %client.id, error = %e, "Dropping undecodable client message");
            return;
        }
    };

    if message.message_type == PING {
        let started = Instant::now();
        match pong_frame(message.content) {
            Ok(frame) => {
                if !client.try_send(Message::Text(frame.into())) {
                    tracing::debug!(client_id = %client.id, "Pong could not be queued");
                }
                metrics::histogram!("ws_ping_latency_seconds").record(started.elapsed().as_secs_f64());
            }
            Err(e) => tracing::warn!(client_id = %client.id, error = %e, "Failed to encode pong"),
        }
        return;
    }

    let Some(target) = BroadcastTarget::parse(&message.target) else {
        tracing::warn!(
            client_id = %client.id,
            requested_target = %message.target,
            "Dropping client message with unknown target",
        );
        return;
    };
    let target_id = match target {
        BroadcastTarget::Org => client.org_id.to_string(),
        BroadcastTarget::User if message.target_id.is_empty() => client.user_id.to_string(),
        BroadcastTarget::Room if message.target_id.is_empty() => match &client.room_id {
            Some(room) => room.clone(),
            None => return,
        },
        _ => message.target_id,
    };

    if let Err(reason) = check_target(hub, client, target, &target_id).await {
        tracing::warn!(
            client_id = %client.id,
            broadcast_target = target.as_str(),
            target_id = %target_id,
            reason,
            "Rejected client message target",
        );
        match error_frame(reason) {
            Ok(frame) => {
                let _ = client.try_send(Message::Text(frame.into()));
            }
            Err(e) => tracing::warn!(client_id = %client.id, error = %e, "Failed to encode error"),
        }
        return;
    }

    let content = json!({
        "type": message.message_type,
        "user": client.user_id,
        "org": client.org_id,
        "content": message.content,
    });
    if let Err(e) = hub.broadcast(target, &target_id, content).await {
        tracing::warn!(client_id = %client.id, error = %e, "Client message broadcast failed");
    }
}

/// Client messages stay inside the sender's organization.
async fn check_target(
    hub: &Hub,
    client: &Client,
    target: BroadcastTarget,
    target_id: &str,
) -> Result<(), &'static str> {
    match target {
        BroadcastTarget::Org => Ok(()),
        BroadcastTarget::Room => {
            if room_in_tenant(client.org_id.as_str(), client.user_id.as_str(), target_id) {
                Ok(())
            } else {
                Err("Room belongs to another organization")
            }
        }
        BroadcastTarget::User => {
            if target_id == client.user_id.as_str()
                || hub.is_org_member(client.org_id.as_str(), target_id).await
            {
                Ok(())
            } else {
                Err("User is not connected to this organization")
            }
        }
    }
}
