//! Append-only audit trail writer.
//!
//! Every mutating engine operation records one [`ticketflow_domain::AuditEvent`].
//! This is a write-only log for operators and compliance review, never a
//! source of truth to replay a ticket's state from (see the workflow
//! engine crate for the actual state transitions).

use sqlx::PgPool;
use thiserror::Error;
use ticketflow_domain::AuditEvent;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to record audit event")]
    Database(#[source] sqlx::Error),
    #[error("failed to serialize audit details")]
    Serialization(#[source] serde_json::Error),
}

/// Writes to the `audit_events` table.
#[derive(Clone)]
pub struct AuditWriter {
    pool: PgPool,
}

impl AuditWriter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let details = serde_json::to_value(&event.details).map_err(AuditError::Serialization)?;

        sqlx::query(
            r#"
            INSERT INTO audit_events
                (audit_event_id, ticket_id, ticket_step_id, event_type,
                 actor_email, actor_display_name, actor_directory_id,
                 details, correlation_id, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.audit_event_id.as_uuid())
        .bind(event.ticket_id.as_uuid())
        .bind(event.ticket_step_id.as_ref().map(|id| *id.as_uuid()))
        .bind(serde_json::to_string(&event.event_type).unwrap_or_default())
        .bind(&event.actor.email)
        .bind(&event.actor.display_name)
        .bind(&event.actor.directory_id)
        .bind(details)
        .bind(&event.correlation_id)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(AuditError::Database)?;

        Ok(())
    }

    /// Records best-effort: audit failures are logged but never fail the
    /// caller's transaction (spec invariant 6 only requires that events
    /// which *are* recorded reference a real ticket/step, not that every
    /// write attempt succeeds).
    pub async fn record_best_effort(&self, event: &AuditEvent) {
        if let Err(e) = self.record(event).await {
            tracing::warn!(error = %e, ticket_id = %event.ticket_id, "failed to record audit event");
        }
    }
}
