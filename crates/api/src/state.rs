use std::sync::Arc;
use std::time::Duration;

use waybill_db::DbPool;
use waybill_notifications::{
    BusError, MessageBus, NotificationService, PreferenceService, PresenceStore,
};
use waybill_sequence::{PgFormatProvider, PgSequenceStore, SequenceGenerator};

use crate::config::ServerConfig;
use crate::ws::Hub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is a pool handle, an `Arc`, or a service
/// that is itself a pair of those.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<ServerConfig>,
    /// WebSocket hub; also the notification service's broadcaster.
    pub hub: Arc<Hub>,
    /// External presence sets written by the hub.
    pub presence: Arc<dyn PresenceStore>,
    pub notifications: NotificationService,
    pub preferences: PreferenceService,
    pub sequences: Arc<SequenceGenerator>,
}

impl AppState {
    /// Start the hub on `bus`/`presence` and wire the services around it.
    pub async fn build(
        pool: DbPool,
        config: ServerConfig,
        bus: Arc<dyn MessageBus>,
        presence: Arc<dyn PresenceStore>,
    ) -> Result<Self, BusError> {
        let hub = Hub::start(bus, Arc::clone(&presence)).await?;
        let notifications = NotificationService::new(pool.clone(), hub.clone());
        let preferences = PreferenceService::new(pool.clone());
        let sequences = SequenceGenerator::new(
            Arc::new(PgSequenceStore::new(pool.clone())),
            Arc::new(PgFormatProvider::new(pool.clone())),
        )
        .with_cache_ttl(Duration::from_secs(config.sequence_format_cache_ttl_secs));

        Ok(Self {
            pool,
            config: Arc::new(config),
            hub,
            presence,
            notifications,
            preferences,
            sequences: Arc::new(sequences),
        })
    }
}
