//! Frames exchanged with browser clients.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use waybill_core::types::now_ts;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const NOTIFICATION: &str = "notification";
pub const ERROR: &str = "error";

/// Inbound client frame: `{type, target, targetID, content}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(rename = "targetID", default)]
    pub target_id: String,
    #[serde(default)]
    pub content: Value,
}

/// Outbound frame: `{type, data, timestamp}`.
#[derive(Debug, Serialize)]
pub struct ServerMessage<'a> {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub data: &'a Value,
    pub timestamp: i64,
}

/// Serialized `{type:"notification", data, timestamp}` frame.
pub fn notification_frame(content: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ServerMessage {
        message_type: NOTIFICATION,
        data: content,
        timestamp: now_ts(),
    })
}

/// Serialized `{type:"error", data:{message}, timestamp}` frame.
pub fn error_frame(message: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ServerMessage {
        message_type: ERROR,
        data: &json!({ "message": message }),
        timestamp: now_ts(),
    })
}

/// Serialized `{type:"pong", data:{timestamp, received}}` frame.
pub fn pong_frame(received: Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&json!({
        "type": PONG,
        "data": {
            "timestamp": now_ts(),
            "received": received,
        },
    }))
}
