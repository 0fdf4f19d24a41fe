//! PostgreSQL implementation of [`TicketRepository`].

use async_trait::async_trait;
use sqlx::PgPool;
use ticketflow_domain::{IdParseError, Ticket, TicketId, TicketStatus};

use crate::repo::errors::{CreateTicketError, FindTicketError, UpdateTicketError};
use crate::repo::traits::TicketRepository;

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, FindTicketError> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT ticket_id::text, workflow_template_id::text, workflow_version_id::text,
                   title, description, status, current_step_id,
                   active_branches, requester, manager_snapshot,
                   form_values, form_version, form_versions, attachment_ids,
                   join_proceeded, pending_end_step_id, pending_change_request_id,
                   previous_status, cr_lock, version, created_at, updated_at, completed_at
            FROM tickets
            WHERE ticket_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(FindTicketError::Database)?;

        row.map(TryInto::try_into)
            .transpose()
            .map_err(|_: IdParseError| FindTicketError::NotFound(*id))
    }

    async fn create(&self, ticket: Ticket) -> Result<Ticket, CreateTicketError> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            INSERT INTO tickets (
                ticket_id, workflow_template_id, workflow_version_id,
                title, description, status, current_step_id,
                active_branches, requester, manager_snapshot,
                form_values, form_version, form_versions, attachment_ids,
                join_proceeded, pending_end_step_id, pending_change_request_id,
                previous_status, cr_lock, version, created_at, updated_at, completed_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            RETURNING ticket_id::text, workflow_template_id::text, workflow_version_id::text,
                      title, description, status, current_step_id,
                      active_branches, requester, manager_snapshot,
                      form_values, form_version, form_versions, attachment_ids,
                      join_proceeded, pending_end_step_id, pending_change_request_id,
                      previous_status, cr_lock, version, created_at, updated_at, completed_at
            "#,
        )
        .bind(ticket.ticket_id.as_uuid())
        .bind(ticket.workflow_template_id.as_uuid())
        .bind(ticket.workflow_version_id.as_uuid())
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(status_str(ticket.status))
        .bind(&ticket.current_step_id)
        .bind(serde_json::to_value(&ticket.active_branches).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.requester).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.manager_snapshot).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.form_values).unwrap_or_default())
        .bind(ticket.form_version)
        .bind(serde_json::to_value(&ticket.form_versions).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.attachment_ids).unwrap_or_default())
        .bind(ticket.join_proceeded)
        .bind(&ticket.pending_end_step_id)
        .bind(ticket.pending_change_request_id.map(|id| *id.as_uuid()))
        .bind(ticket.previous_status.map(status_str))
        .bind(ticket.cr_lock)
        .bind(ticket.version)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .bind(ticket.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.constraint() == Some("tickets_workflow_version_id_fkey") {
                    return CreateTicketError::WorkflowVersionNotFound;
                }
            }
            CreateTicketError::Database(e)
        })?;

        row.try_into()
            .map_err(|_| CreateTicketError::Database(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        ticket: &Ticket,
        expected_version: i64,
    ) -> Result<Ticket, UpdateTicketError> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            UPDATE tickets
            SET status = $3,
                current_step_id = $4,
                active_branches = $5,
                manager_snapshot = $6,
                form_values = $7,
                form_version = $8,
                form_versions = $9,
                attachment_ids = $10,
                join_proceeded = $11,
                pending_end_step_id = $12,
                pending_change_request_id = $13,
                previous_status = $14,
                cr_lock = $15,
                version = version + 1,
                updated_at = $16,
                completed_at = $17
            WHERE ticket_id = $1 AND version = $2
            RETURNING ticket_id::text, workflow_template_id::text, workflow_version_id::text,
                      title, description, status, current_step_id,
                      active_branches, requester, manager_snapshot,
                      form_values, form_version, form_versions, attachment_ids,
                      join_proceeded, pending_end_step_id, pending_change_request_id,
                      previous_status, cr_lock, version, created_at, updated_at, completed_at
            "#,
        )
        .bind(ticket.ticket_id.as_uuid())
        .bind(expected_version)
        .bind(status_str(ticket.status))
        .bind(&ticket.current_step_id)
        .bind(serde_json::to_value(&ticket.active_branches).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.manager_snapshot).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.form_values).unwrap_or_default())
        .bind(ticket.form_version)
        .bind(serde_json::to_value(&ticket.form_versions).unwrap_or_default())
        .bind(serde_json::to_value(&ticket.attachment_ids).unwrap_or_default())
        .bind(ticket.join_proceeded)
        .bind(&ticket.pending_end_step_id)
        .bind(ticket.pending_change_request_id.map(|id| *id.as_uuid()))
        .bind(ticket.previous_status.map(status_str))
        .bind(ticket.cr_lock)
        .bind(ticket.updated_at)
        .bind(ticket.completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(UpdateTicketError::Database)?;

        match row {
            Some(row) => row
                .try_into()
                .map_err(|_| UpdateTicketError::Database(sqlx::Error::RowNotFound)),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM tickets WHERE ticket_id = $1)",
                )
                .bind(ticket.ticket_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(UpdateTicketError::Database)?;

                if exists {
                    Err(UpdateTicketError::Concurrency {
                        expected: expected_version,
                    })
                } else {
                    Err(UpdateTicketError::NotFound(ticket.ticket_id))
                }
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    ticket_id: String,
    workflow_template_id: String,
    workflow_version_id: String,
    title: String,
    description: String,
    status: String,
    current_step_id: Option<String>,
    active_branches: serde_json::Value,
    requester: serde_json::Value,
    manager_snapshot: serde_json::Value,
    form_values: serde_json::Value,
    form_version: i32,
    form_versions: serde_json::Value,
    attachment_ids: serde_json::Value,
    join_proceeded: bool,
    pending_end_step_id: Option<String>,
    pending_change_request_id: Option<String>,
    previous_status: Option<String>,
    cr_lock: Option<chrono::DateTime<chrono::Utc>>,
    version: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = IdParseError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            ticket_id: row.ticket_id.parse()?,
            workflow_template_id: row.workflow_template_id.parse()?,
            workflow_version_id: row.workflow_version_id.parse()?,
            title: row.title,
            description: row.description,
            status: parse_status(&row.status),
            current_step_id: row.current_step_id,
            active_branches: serde_json::from_value(row.active_branches).unwrap_or_default(),
            requester: serde_json::from_value(row.requester)
                .map_err(|e| IdParseError::InvalidUuid(e.to_string()))?,
            manager_snapshot: serde_json::from_value(row.manager_snapshot).unwrap_or_default(),
            form_values: serde_json::from_value(row.form_values).unwrap_or_default(),
            form_version: row.form_version,
            form_versions: serde_json::from_value(row.form_versions).unwrap_or_default(),
            attachment_ids: serde_json::from_value(row.attachment_ids).unwrap_or_default(),
            join_proceeded: row.join_proceeded,
            pending_end_step_id: row.pending_end_step_id,
            pending_change_request_id: row
                .pending_change_request_id
                .map(|s| s.parse())
                .transpose()?,
            previous_status: row.previous_status.as_deref().map(parse_status),
            cr_lock: row.cr_lock,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

fn status_str(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "open",
        TicketStatus::InProgress => "in_progress",
        TicketStatus::WaitingForRequester => "waiting_for_requester",
        TicketStatus::WaitingForAgent => "waiting_for_agent",
        TicketStatus::WaitingForCr => "waiting_for_cr",
        TicketStatus::OnHold => "on_hold",
        TicketStatus::Completed => "completed",
        TicketStatus::Rejected => "rejected",
        TicketStatus::Skipped => "skipped",
        TicketStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> TicketStatus {
    match s {
        "in_progress" => TicketStatus::InProgress,
        "waiting_for_requester" => TicketStatus::WaitingForRequester,
        "waiting_for_agent" => TicketStatus::WaitingForAgent,
        "waiting_for_cr" => TicketStatus::WaitingForCr,
        "on_hold" => TicketStatus::OnHold,
        "completed" => TicketStatus::Completed,
        "rejected" => TicketStatus::Rejected,
        "skipped" => TicketStatus::Skipped,
        "cancelled" => TicketStatus::Cancelled,
        _ => TicketStatus::Open,
    }
}
