//! Notification delivery services.
//!
//! [`service::NotificationService`] is the single ingress: it persists a
//! notification and hands it to a [`broadcaster::Broadcaster`] (the WebSocket
//! hub in the server). [`audit_listener::AuditListener`],
//! [`batch::BatchProcessor`] and [`maintenance::NotificationMaintenance`] are
//! background tasks feeding or tending that pipeline, and
//! [`preference_service::PreferenceService`] owns the preference rules.

pub mod audit_listener;
pub mod batch;
pub mod broadcaster;
pub mod bus;
pub mod dispatch;
pub mod lifecycle;
pub mod maintenance;
pub mod preference_service;
pub mod presence;
pub mod redis_bus;
pub mod service;

pub use audit_listener::AuditListener;
pub use batch::{BatchProcessor, PendingNotification};
pub use broadcaster::Broadcaster;
pub use bus::{BusEnvelope, BusError, BusMessage, InMemoryBus, MessageBus};
pub use maintenance::NotificationMaintenance;
pub use preference_service::PreferenceService;
pub use presence::{InMemoryPresence, PresenceStore};
pub use redis_bus::RedisBus;
pub use service::NotificationService;
