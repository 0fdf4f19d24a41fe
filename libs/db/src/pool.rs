//! PostgreSQL connection pool construction.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Pool sizing and timeout knobs, loaded from configuration alongside the
/// rest of a binary's `AppConfig` (see `ticketflow-common::config`).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl PoolConfig {
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Build a connection pool. Does not run migrations; callers that need
/// schema setup do so explicitly (e.g. the worker's startup sequence).
pub async fn connect(config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await
}
