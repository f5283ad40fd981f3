//! WebSocket hub: connection indexes, local fan-out and cross-node relay.
//!
//! A single dispatcher task owns every index mutation. It is fed by three
//! channels (register, unregister, broadcast); other tasks only take the
//! read lock. Each client has a bounded queue; a full queue evicts the
//! client instead of stalling the dispatcher.
//!
//! Every broadcast is delivered to matching local clients and published on
//! `broadcast:<target>:<id>`. The bus subscriber drops envelopes carrying
//! this node's `serverID`, so local clients never see a message twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use waybill_core::rooms::{presence_keys, BroadcastTarget, BROADCAST_PATTERN};
use waybill_core::types::{now_ts, prefixes, PulId, Timestamp};
use waybill_notifications::{
    Broadcaster, BusEnvelope, BusError, BusMessage, MessageBus, PresenceStore,
};

use crate::ws::message::notification_frame;

/// Outbound queue capacity per connection.
pub const CLIENT_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One authenticated connection.
pub struct Client {
    pub id: String,
    pub user_id: PulId,
    pub org_id: PulId,
    pub room_id: Option<String>,
    pub remote_addr: String,
    pub connected_at: Timestamp,
    sender: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl Client {
    /// Create a client and the receiving end of its outbound queue.
    pub fn new(
        user_id: PulId,
        org_id: PulId,
        room_id: Option<String>,
        remote_addr: String,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (sender, rx) = mpsc::channel(CLIENT_QUEUE);
        let client = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            org_id,
            room_id,
            remote_addr,
            connected_at: now_ts(),
            sender,
            closed: CancellationToken::new(),
        });
        (client, rx)
    }

    /// Queue a frame. `false` means the queue is full or the writer is gone.
    pub fn try_send(&self, message: Message) -> bool {
        self.sender.try_send(message).is_ok()
    }

    /// Ask both pumps of this connection to stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`Client::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Indexes {
    clients: HashMap<String, Arc<Client>>,
    users: HashMap<String, HashSet<String>>,
    orgs: HashMap<String, HashSet<String>>,
    rooms: HashMap<String, HashSet<String>>,
}

fn index_add(index: &mut HashMap<String, HashSet<String>>, key: &str, client_id: &str) {
    index
        .entry(key.to_string())
        .or_default()
        .insert(client_id.to_string());
}

fn index_remove(index: &mut HashMap<String, HashSet<String>>, key: &str, client_id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(client_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl Indexes {
    fn insert(&mut self, client: Arc<Client>) {
        index_add(&mut self.users, client.user_id.as_str(), &client.id);
        index_add(&mut self.orgs, client.org_id.as_str(), &client.id);
        if let Some(room) = &client.room_id {
            index_add(&mut self.rooms, room, &client.id);
        }
        self.clients.insert(client.id.clone(), client);
    }

    fn remove(&mut self, client_id: &str) -> Option<Arc<Client>> {
        let client = self.clients.remove(client_id)?;
        index_remove(&mut self.users, client.user_id.as_str(), client_id);
        index_remove(&mut self.orgs, client.org_id.as_str(), client_id);
        if let Some(room) = &client.room_id {
            index_remove(&mut self.rooms, room, client_id);
        }
        Some(client)
    }

    fn matching(&self, target: BroadcastTarget, target_id: &str) -> Vec<Arc<Client>> {
        let index = match target {
            BroadcastTarget::User => &self.users,
            BroadcastTarget::Org => &self.orgs,
            BroadcastTarget::Room => &self.rooms,
        };
        index
            .get(target_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.clients.get(id).cloned())
            .collect()
    }

    /// Live connections of `user_id`.
    fn user_clients<'a>(&'a self, user_id: &str) -> impl Iterator<Item = &'a Arc<Client>> + 'a {
        self.users
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.clients.get(id))
    }
}

/// Presence `(key, member)` pairs that `client` alone was backing. `indexes`
/// must no longer contain the client.
fn stale_presence(indexes: &Indexes, client: &Client) -> Vec<(String, String)> {
    let user = client.user_id.as_str();
    let others: Vec<&Arc<Client>> = indexes.user_clients(user).collect();
    let mut stale = Vec::new();

    if !others.iter().any(|c| c.remote_addr == client.remote_addr) {
        stale.push((presence_keys::user_connections(user), client.remote_addr.clone()));
    }
    if !others.iter().any(|c| c.org_id == client.org_id) {
        stale.push((presence_keys::org_clients(client.org_id.as_str()), user.to_string()));
    }
    if let Some(room) = &client.room_id {
        if !others.iter().any(|c| c.room_id.as_ref() == Some(room)) {
            stale.push((presence_keys::room_users(room), user.to_string()));
        }
    }
    stale
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct Delivery {
    target: BroadcastTarget,
    target_id: String,
    frame: String,
}

struct Channels {
    register: mpsc::UnboundedReceiver<Arc<Client>>,
    unregister: mpsc::UnboundedReceiver<String>,
    broadcast: mpsc::UnboundedReceiver<Delivery>,
}

pub struct Hub {
    server_id: String,
    bus: Arc<dyn MessageBus>,
    presence: Arc<dyn PresenceStore>,
    indexes: RwLock<Indexes>,
    register_tx: mpsc::UnboundedSender<Arc<Client>>,
    unregister_tx: mpsc::UnboundedSender<String>,
    broadcast_tx: mpsc::UnboundedSender<Delivery>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Create the hub, subscribe to `broadcast:*` and spawn the dispatcher
    /// and the bus subscriber.
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        presence: Arc<dyn PresenceStore>,
    ) -> Result<Arc<Self>, BusError> {
        let (register_tx, register) = mpsc::unbounded_channel();
        let (unregister_tx, unregister) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast) = mpsc::unbounded_channel();
        let subscription = bus.psubscribe(BROADCAST_PATTERN).await?;

        let hub = Arc::new(Self {
            server_id: PulId::new(prefixes::SERVER).to_string(),
            bus,
            presence,
            indexes: RwLock::new(Indexes::default()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let dispatcher = tokio::spawn(Arc::clone(&hub).dispatch(Channels {
            register,
            unregister,
            broadcast,
        }));
        let subscriber = tokio::spawn(Arc::clone(&hub).relay(subscription));
        hub.tasks.lock().await.extend([dispatcher, subscriber]);

        tracing::info!(server_id = %hub.server_id, "WebSocket hub started");
        Ok(hub)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn register(&self, client: Arc<Client>) {
        if self.register_tx.send(client).is_err() {
            tracing::warn!("Hub dispatcher is not running; registration dropped");
        }
    }

    pub fn unregister(&self, client_id: &str) {
        let _ = self.unregister_tx.send(client_id.to_string());
    }

    pub async fn connection_count(&self) -> usize {
        self.indexes.read().await.clients.len()
    }

    /// Local connection ids of `user_id`.
    pub async fn user_connections(&self, user_id: &str) -> Vec<String> {
        self.indexes
            .read()
            .await
            .user_clients(user_id)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Whether `user_id` has a live connection to `org_id` on any node.
    /// A presence read failure counts as no.
    pub async fn is_org_member(&self, org_id: &str, user_id: &str) -> bool {
        match self.presence.members(&presence_keys::org_clients(org_id)).await {
            Ok(members) => members.iter().any(|m| m == user_id),
            Err(e) => {
                tracing::warn!(org_id, error = %e, "Presence read failed");
                false
            }
        }
    }

    /// Queue a Ping frame to every client; clients with a full queue are
    /// evicted.
    pub async fn ping_all(&self) -> usize {
        let clients: Vec<Arc<Client>> =
            self.indexes.read().await.clients.values().cloned().collect();
        for client in &clients {
            if !client.try_send(Message::Ping(Bytes::new())) {
                tracing::debug!(client_id = %client.id, "Heartbeat could not be queued; evicting");
                self.unregister(&client.id);
            }
        }
        clients.len()
    }

    /// Stop the dispatcher and the subscriber, send Close to every
    /// connection and wipe the indexes and this node's presence entries.
    pub async fn shutdown_all(&self, timeout: Duration) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(timeout, task).await.is_err() {
                tracing::warn!("Hub task did not stop in time");
            }
        }

        let mut stale = Vec::new();
        let count = {
            let mut indexes = self.indexes.write().await;
            let ids: Vec<String> = indexes.clients.keys().cloned().collect();
            for id in &ids {
                if let Some(client) = indexes.remove(id) {
                    let _ = client.try_send(Message::Close(None));
                    client.close();
                    stale.extend(stale_presence(&indexes, &client));
                }
            }
            ids.len()
        };
        self.remove_presence(stale).await;
        metrics::gauge!("ws_connections").set(0.0);
        tracing::info!(count, "Closed all WebSocket connections");
    }

    // --- dispatcher ---

    async fn dispatch(self: Arc<Self>, mut channels: Channels) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(client) = channels.register.recv() => self.on_register(client).await,
                Some(client_id) = channels.unregister.recv() => self.on_unregister(&client_id).await,
                Some(delivery) = channels.broadcast.recv() => self.on_deliver(delivery).await,
                else => break,
            }
        }
        tracing::debug!("Hub dispatcher stopped");
    }

    async fn on_register(&self, client: Arc<Client>) {
        if client.is_closed() {
            return;
        }
        let count = {
            let mut indexes = self.indexes.write().await;
            indexes.insert(Arc::clone(&client));
            indexes.clients.len()
        };
        metrics::gauge!("ws_connections").set(count as f64);

        self.presence_add(&presence_keys::user_connections(client.user_id.as_str()), &client.remote_addr)
            .await;
        self.presence_add(&presence_keys::org_clients(client.org_id.as_str()), client.user_id.as_str())
            .await;
        if let Some(room) = &client.room_id {
            self.presence_add(&presence_keys::room_users(room), client.user_id.as_str())
                .await;
        }

        tracing::info!(
            client_id = %client.id,
            user_id = %client.user_id,
            org_id = %client.org_id,
            room_id = ?client.room_id,
            connections = count,
            "Client registered",
        );
    }

    async fn on_unregister(&self, client_id: &str) {
        let mut indexes = self.indexes.write().await;
        let Some(client) = indexes.remove(client_id) else {
            return;
        };
        let count = indexes.clients.len();
        let stale = stale_presence(&indexes, &client);
        drop(indexes);

        client.close();
        self.remove_presence(stale).await;
        metrics::gauge!("ws_connections").set(count as f64);
        tracing::info!(
            client_id = %client.id,
            user_id = %client.user_id,
            connections = count,
            "Client unregistered",
        );
    }

    async fn on_deliver(&self, delivery: Delivery) {
        let clients = self
            .indexes
            .read()
            .await
            .matching(delivery.target, &delivery.target_id);
        if clients.is_empty() {
            return;
        }

        let mut evicted = Vec::new();
        for client in &clients {
            if !client.try_send(Message::Text(delivery.frame.clone().into())) {
                evicted.push(client.id.clone());
            }
        }
        tracing::debug!(
            broadcast_target = delivery.target.as_str(),
            target_id = %delivery.target_id,
            delivered = clients.len() - evicted.len(),
            "Delivered to local clients",
        );
        for client_id in evicted {
            tracing::warn!(client_id = %client_id, "Client queue full; evicting");
            self.on_unregister(&client_id).await;
        }
    }

    async fn remove_presence(&self, entries: Vec<(String, String)>) {
        for (key, member) in entries {
            self.presence_remove(&key, &member).await;
        }
    }

    async fn presence_add(&self, key: &str, member: &str) {
        if let Err(e) = self.presence.add_member(key, member).await {
            tracing::warn!(key, error = %e, "Presence write failed");
        }
    }

    async fn presence_remove(&self, key: &str, member: &str) {
        if let Err(e) = self.presence.remove_member(key, member).await {
            tracing::warn!(key, error = %e, "Presence write failed");
        }
    }

    // --- cross-node relay ---

    async fn relay(self: Arc<Self>, mut subscription: mpsc::Receiver<BusMessage>) {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = subscription.recv() => match message {
                    Some(message) => message,
                    None => {
                        tracing::warn!("Bus subscription closed");
                        break;
                    }
                },
            };

            let envelope: BusEnvelope = match serde_json::from_str(&message.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(channel = %message.channel, error = %e, "Dropping malformed bus message");
                    continue;
                }
            };
            if envelope.server_id == self.server_id {
                continue;
            }
            match notification_frame(&envelope.content) {
                Ok(frame) => {
                    let _ = self.broadcast_tx.send(Delivery {
                        target: envelope.target,
                        target_id: envelope.target_id,
                        frame,
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Dropping unencodable bus message"),
            }
        }
        tracing::debug!("Hub bus relay stopped");
    }
}

#[async_trait]
impl Broadcaster for Hub {
    async fn broadcast(
        &self,
        target: BroadcastTarget,
        target_id: &str,
        content: Value,
    ) -> Result<(), BusError> {
        let frame = notification_frame(&content)?;
        if self
            .broadcast_tx
            .send(Delivery {
                target,
                target_id: target_id.to_string(),
                frame,
            })
            .is_err()
        {
            tracing::warn!("Hub dispatcher is not running; local delivery skipped");
        }

        let envelope = BusEnvelope::notification(target, target_id, self.server_id.as_str(), content);
        let payload = serde_json::to_string(&envelope)?;
        self.bus.publish(&envelope.channel(), payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(user: &PulId, org: &PulId, room: Option<&str>) -> Arc<Client> {
        Client::new(user.clone(), org.clone(), room.map(String::from), "127.0.0.1:1".into()).0
    }

    #[test]
    fn indexes_track_all_three_keys() {
        let user = PulId::new(prefixes::USER);
        let org = PulId::new(prefixes::ORGANIZATION);
        let mut idx = Indexes::default();
        let a = client(&user, &org, Some("r1"));
        let b = client(&user, &org, None);
        idx.insert(a.clone());
        idx.insert(b.clone());

        assert_eq!(idx.matching(BroadcastTarget::User, user.as_str()).len(), 2);
        assert_eq!(idx.matching(BroadcastTarget::Org, org.as_str()).len(), 2);
        assert_eq!(idx.matching(BroadcastTarget::Room, "r1").len(), 1);

        idx.remove(&a.id);
        assert!(idx.matching(BroadcastTarget::Room, "r1").is_empty());
        assert!(!idx.rooms.contains_key("r1"));
        idx.remove(&b.id);
        assert!(idx.users.is_empty() && idx.orgs.is_empty() && idx.clients.is_empty());
    }

    #[test]
    fn presence_is_kept_while_another_connection_backs_it() {
        let user = PulId::new(prefixes::USER);
        let org = PulId::new(prefixes::ORGANIZATION);
        let mut idx = Indexes::default();
        let a = client(&user, &org, Some("r1"));
        let b = client(&user, &org, None);
        idx.insert(a.clone());
        idx.insert(b.clone());

        idx.remove(&a.id);
        assert_eq!(
            stale_presence(&idx, &a),
            vec![(presence_keys::room_users("r1"), user.to_string())]
        );

        idx.remove(&b.id);
        assert_eq!(
            stale_presence(&idx, &b),
            vec![
                (presence_keys::user_connections(user.as_str()), "127.0.0.1:1".to_string()),
                (presence_keys::org_clients(org.as_str()), user.to_string()),
            ]
        );
    }

    /// Presence store whose removals wait until released.
    #[derive(Default)]
    struct GatedPresence {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl PresenceStore for GatedPresence {
        async fn add_member(&self, _key: &str, _member: &str) -> Result<(), BusError> {
            Ok(())
        }

        async fn remove_member(&self, _key: &str, _member: &str) -> Result<(), BusError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn members(&self, _key: &str) -> Result<Vec<String>, BusError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_presence_removal_does_not_block_readers() {
        let presence = Arc::new(GatedPresence::default());
        let hub = Hub::start(Arc::new(waybill_notifications::InMemoryBus::default()), presence.clone())
            .await
            .unwrap();
        let c = client(&PulId::new(prefixes::USER), &PulId::new(prefixes::ORGANIZATION), None);
        hub.register(c.clone());
        while hub.connection_count().await == 0 {
            tokio::task::yield_now().await;
        }

        hub.unregister(&c.id);
        presence.entered.notified().await;

        // The dispatcher is parked inside the presence store here.
        let count = tokio::time::timeout(Duration::from_secs(1), hub.connection_count())
            .await
            .expect("index lock should be free during presence writes");
        assert_eq!(count, 0);

        presence.release.notify_one();
    }

    #[test]
    fn full_queue_refuses_frames() {
        let (c, _rx) = Client::new(
            PulId::new(prefixes::USER),
            PulId::new(prefixes::ORGANIZATION),
            None,
            "a".into(),
        );
        for _ in 0..CLIENT_QUEUE {
            assert!(c.try_send(Message::Ping(Bytes::new())));
        }
        assert!(!c.try_send(Message::Ping(Bytes::new())));
    }
}
