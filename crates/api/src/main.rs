use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waybill_api::config::ServerConfig;
use waybill_api::router::build_app_router;
use waybill_api::state::AppState;
use waybill_api::ws;
use waybill_notifications::{
    AuditListener, BatchProcessor, InMemoryBus, InMemoryPresence, MessageBus,
    NotificationMaintenance, PresenceStore, RedisBus,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "waybill_api=debug,waybill_notifications=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = waybill_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    waybill_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    waybill_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Message bus and presence ---
    let (bus, presence): (Arc<dyn MessageBus>, Arc<dyn PresenceStore>) = match &config.redis_url {
        Some(url) => {
            let redis = Arc::new(RedisBus::connect(url).await.context("Failed to connect to Redis")?);
            let bus: Arc<dyn MessageBus> = redis.clone();
            let presence: Arc<dyn PresenceStore> = redis;
            (bus, presence)
        }
        None => {
            tracing::warn!("REDIS_URL not set; using single-node in-memory bus and presence");
            let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::default());
            let presence: Arc<dyn PresenceStore> = Arc::new(InMemoryPresence::new());
            (bus, presence)
        }
    };

    // --- App state (starts the hub) ---
    let shutdown_timeout = config.shutdown_timeout();
    let state = AppState::build(pool, config.clone(), bus, presence)
        .await
        .context("Failed to start WebSocket hub")?;
    let hub = Arc::clone(&state.hub);

    // --- Background tasks ---
    let batcher = Arc::new(
        BatchProcessor::new(state.notifications.clone())
            .with_tick(Duration::from_secs(config.batch_tick_secs)),
    );
    batcher.start();

    let audit_listener = Arc::new(
        AuditListener::new(state.notifications.clone(), Arc::clone(&batcher))
            .with_poll_interval(Duration::from_secs(config.audit_poll_interval_secs)),
    );
    audit_listener.start();

    let maintenance = Arc::new(
        NotificationMaintenance::new(state.notifications.clone())
            .with_retention_days(config.notification_retention_days),
    );
    maintenance.start();

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&hub), heartbeat_cancel.clone());

    tracing::info!("Background services started (audit listener, batch processor, maintenance, heartbeat)");

    // --- Start server ---
    let app = build_app_router(state);
    let host: std::net::IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address {:?}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, ws_path = %config.ws_path, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    bounded("audit listener", shutdown_timeout, audit_listener.stop()).await;
    // Stopping the batcher flushes every pending batch.
    bounded("batch processor", shutdown_timeout, batcher.stop()).await;
    bounded("maintenance", shutdown_timeout, maintenance.stop()).await;

    heartbeat_cancel.cancel();
    bounded("heartbeat", shutdown_timeout, async {
        let _ = heartbeat_handle.await;
    })
    .await;

    let ws_count = hub.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    hub.shutdown_all(shutdown_timeout).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Await `task`, giving up after `timeout`.
async fn bounded(name: &str, timeout: Duration, task: impl Future<Output = ()>) {
    match tokio::time::timeout(timeout, task).await {
        Ok(()) => tracing::info!(task = name, "Stopped"),
        Err(_) => tracing::warn!(task = name, ?timeout, "Did not stop in time"),
    }
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
