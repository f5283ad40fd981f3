//! Outbound fan-out seam between the notification service and the hub.

use async_trait::async_trait;
use waybill_core::rooms::BroadcastTarget;

use crate::bus::BusError;

/// Delivers notification content to connected clients.
///
/// The server's WebSocket hub implements this; the service only ever calls
/// outward through it.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver `content` to every client matching `(target, target_id)`,
    /// locally and across nodes.
    async fn broadcast(
        &self,
        target: BroadcastTarget,
        target_id: &str,
        content: serde_json::Value,
    ) -> Result<(), BusError>;

    async fn broadcast_to_user(
        &self,
        user_id: &str,
        content: serde_json::Value,
    ) -> Result<(), BusError> {
        self.broadcast(BroadcastTarget::User, user_id, content).await
    }

    async fn broadcast_to_org(
        &self,
        org_id: &str,
        content: serde_json::Value,
    ) -> Result<(), BusError> {
        self.broadcast(BroadcastTarget::Org, org_id, content).await
    }

    async fn broadcast_to_room(
        &self,
        room_id: &str,
        content: serde_json::Value,
    ) -> Result<(), BusError> {
        self.broadcast(BroadcastTarget::Room, room_id, content).await
    }
}
