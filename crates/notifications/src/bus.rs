//! Cross-node pub/sub bus.
//!
//! Every node publishes its broadcasts on `broadcast:<target>:<id>` and
//! consumes `broadcast:*`. [`InMemoryBus`] wraps a `tokio::sync::broadcast`
//! channel and serves single-node deployments and tests; sharing one
//! `Arc<InMemoryBus>` between several hubs behaves like a cluster.
//! [`RedisBus`](crate::redis_bus::RedisBus) is the networked backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use waybill_core::error::CoreError;
use waybill_core::rooms::BroadcastTarget;

/// Default buffer capacity for the in-memory channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Buffer of the receiver handed out by [`MessageBus::psubscribe`].
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// `type` of every broadcast envelope.
pub const NOTIFICATION_MESSAGE_TYPE: &str = "notification";

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("pub/sub backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed bus payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("message bus is closed")]
    Closed,
}

impl From<BusError> for CoreError {
    fn from(err: BusError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A raw message delivered to a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Payload of every `broadcast:<target>:<id>` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub target: BroadcastTarget,
    #[serde(rename = "targetID")]
    pub target_id: String,
    /// Node that published the message; that node ignores its own copy.
    #[serde(rename = "serverID")]
    pub server_id: String,
    pub content: serde_json::Value,
}

impl BusEnvelope {
    pub fn notification(
        target: BroadcastTarget,
        target_id: impl Into<String>,
        server_id: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            message_type: NOTIFICATION_MESSAGE_TYPE.to_string(),
            target,
            target_id: target_id.into(),
            server_id: server_id.into(),
            content,
        }
    }

    /// Channel this envelope is published on.
    pub fn channel(&self) -> String {
        self.target.bus_channel(&self.target_id)
    }
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `channel`. Having no subscribers is not an error.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Receive every message whose channel matches the glob `pattern`.
    ///
    /// The subscription ends when the returned receiver is dropped.
    async fn psubscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BusMessage>, BusError>;
}

/// In-process bus.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unconsumed messages are dropped
    /// and slow subscriptions log a lag warning.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        // A send error only means there are zero subscribers.
        let _ = self.sender.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pattern = pattern.to_string();

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if pattern_matches(&pattern, &message.channel)
                            && tx.send(message).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, pattern = %pattern, "Bus subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

/// Glob match supporting `*` (any run) and `?` (any single character).
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
