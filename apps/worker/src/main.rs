//! Ticketflow background worker
//!
//! Polls the notification outbox and hands due entries off for delivery.

use ticketflow_common::init_tracing;

#[tokio::main]
async fn main() {
    init_tracing();
    tracing::info!("Starting Ticketflow worker...");

    let config = match ticketflow_common::AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        poll_seconds = config.outbox_poll_seconds,
        batch_size = config.outbox_batch_size,
        "worker configured"
    );

    // TODO: stand up a Postgres pool and a real notification sender, then
    // loop claim_due/dispatch/mark_sent on an interval of outbox_poll_seconds.

    tracing::info!("Worker started. Waiting for shutdown signal...");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    tracing::info!("Shutting down worker...");
}
