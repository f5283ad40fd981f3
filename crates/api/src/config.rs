use std::str::FromStr;
use std::time::Duration;

use crate::auth::jwt::JwtConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Server configuration loaded from environment variables.
///
/// Everything except `DATABASE_URL` and `JWT_SECRET` has a default suitable
/// for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on each background-task join at shutdown (default: `10`).
    pub shutdown_timeout_secs: u64,
    pub database_url: String,
    /// Pub/sub and presence backend. Absent means a single-node in-memory bus.
    pub redis_url: Option<String>,
    pub jwt: JwtConfig,
    pub audit_poll_interval_secs: u64,
    pub batch_tick_secs: u64,
    pub sequence_format_cache_ttl_secs: u64,
    pub notification_retention_days: i64,
    /// Path the WebSocket upgrade is mounted on (default: `/ws`).
    pub ws_path: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `HOST`                           | `0.0.0.0`               |
    /// | `PORT`                           | `3000`                  |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `10`                    |
    /// | `DATABASE_URL`                   | required                |
    /// | `REDIS_URL`                      | unset                   |
    /// | `JWT_SECRET`                     | required                |
    /// | `AUDIT_POLL_INTERVAL_SECS`       | `5`                     |
    /// | `BATCH_TICK_SECS`                | `60`                    |
    /// | `SEQUENCE_FORMAT_CACHE_TTL_SECS` | `900`                   |
    /// | `NOTIFICATION_RETENTION_DAYS`    | `30`                    |
    /// | `WS_PATH`                        | `/ws`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        let cors_origins = env_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut ws_path = env_or("WS_PATH", "/ws");
        if !ws_path.starts_with('/') {
            ws_path.insert(0, '/');
        }

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_env("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 10)?,
            database_url: required("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            jwt: JwtConfig::new(required("JWT_SECRET")?),
            audit_poll_interval_secs: parse_env("AUDIT_POLL_INTERVAL_SECS", 5)?,
            batch_tick_secs: parse_env("BATCH_TICK_SECS", 60)?,
            sequence_format_cache_ttl_secs: parse_env("SEQUENCE_FORMAT_CACHE_TTL_SECS", 900)?,
            notification_retention_days: parse_env("NOTIFICATION_RETENTION_DAYS", 30)?,
            ws_path,
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
