//! Application configuration, loaded from environment variables (with an
//! optional `.env` file for local development) via the `config` crate.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Settings every binary in the workspace needs: where to find the
/// database and how aggressively the outbox dispatcher polls.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_outbox_poll_seconds")]
    pub outbox_poll_seconds: u64,
    #[serde(default = "default_outbox_batch_size")]
    pub outbox_batch_size: i64,
}

fn default_outbox_poll_seconds() -> u64 {
    5
}

fn default_outbox_batch_size() -> i64 {
    20
}

impl AppConfig {
    /// Loads from a `.env` file if present, then environment variables
    /// (`DATABASE_URL`, `OUTBOX_POLL_SECONDS`, `OUTBOX_BATCH_SIZE`).
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = config::Config::builder()
            .set_default("outbox_poll_seconds", default_outbox_poll_seconds())?
            .set_default("outbox_batch_size", default_outbox_batch_size())?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
