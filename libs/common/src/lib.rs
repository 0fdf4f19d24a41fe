//! Common utilities shared across Ticketflow binaries.
//!
//! Provides shared configuration, error handling, and telemetry.

pub mod config;
pub mod telemetry;

pub use config::{AppConfig, ConfigError};
pub use telemetry::init_tracing;
