//! PostgreSQL implementation of [`TicketStepRepository`].

use async_trait::async_trait;
use sqlx::PgPool;
use ticketflow_domain::{IdParseError, StepState, StepType, TicketId, TicketStep, TicketStepId};

use crate::repo::errors::{CreateTicketStepError, FindTicketStepError, UpdateTicketStepError};
use crate::repo::traits::TicketStepRepository;

pub struct PgTicketStepRepository {
    pool: PgPool,
}

impl PgTicketStepRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    ticket_step_id::text, ticket_id::text, step_id, step_name, step_type, state,
    assigned_to, data, started_at, due_at, completed_at, previous_state,
    branch_identity, sub_workflow_identity, version
"#;

#[async_trait]
impl TicketStepRepository for PgTicketStepRepository {
    async fn find_by_id(
        &self,
        id: &TicketStepId,
    ) -> Result<Option<TicketStep>, FindTicketStepError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM ticket_steps WHERE ticket_step_id = $1");
        let row = sqlx::query_as::<_, TicketStepRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(FindTicketStepError::Database)?;

        row.map(TryInto::try_into)
            .transpose()
            .map_err(|_: IdParseError| FindTicketStepError::NotFound(*id))
    }

    async fn find_by_ticket(
        &self,
        ticket_id: &TicketId,
    ) -> Result<Vec<TicketStep>, FindTicketStepError> {
        let query =
            format!("SELECT {SELECT_COLUMNS} FROM ticket_steps WHERE ticket_id = $1 ORDER BY started_at NULLS LAST");
        let rows = sqlx::query_as::<_, TicketStepRow>(&query)
            .bind(ticket_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(FindTicketStepError::Database)?;

        rows.into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_: IdParseError| FindTicketStepError::Database(sqlx::Error::RowNotFound))
    }

    async fn create(&self, step: TicketStep) -> Result<TicketStep, CreateTicketStepError> {
        let row = sqlx::query_as::<_, TicketStepRow>(&format!(
            r#"
            INSERT INTO ticket_steps (
                ticket_step_id, ticket_id, step_id, step_name, step_type, state,
                assigned_to, data, started_at, due_at, completed_at, previous_state,
                branch_identity, sub_workflow_identity, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(step.ticket_step_id.as_uuid())
        .bind(step.ticket_id.as_uuid())
        .bind(&step.step_id)
        .bind(&step.step_name)
        .bind(step_type_str(step.step_type))
        .bind(state_str(step.state))
        .bind(serde_json::to_value(&step.assigned_to).unwrap_or_default())
        .bind(serde_json::to_value(&step.data).unwrap_or_default())
        .bind(step.started_at)
        .bind(step.due_at)
        .bind(step.completed_at)
        .bind(step.previous_state.map(state_str))
        .bind(serde_json::to_value(&step.branch_identity).unwrap_or_default())
        .bind(serde_json::to_value(&step.sub_workflow_identity).unwrap_or_default())
        .bind(step.version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.constraint() == Some("ticket_steps_ticket_id_fkey") {
                    return CreateTicketStepError::TicketNotFound(step.ticket_id);
                }
            }
            CreateTicketStepError::Database(e)
        })?;

        row.try_into()
            .map_err(|_| CreateTicketStepError::Database(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        step: &TicketStep,
        expected_version: i64,
    ) -> Result<TicketStep, UpdateTicketStepError> {
        let row = sqlx::query_as::<_, TicketStepRow>(&format!(
            r#"
            UPDATE ticket_steps
            SET state = $3,
                assigned_to = $4,
                data = $5,
                started_at = $6,
                due_at = $7,
                completed_at = $8,
                previous_state = $9,
                branch_identity = $10,
                sub_workflow_identity = $11,
                version = version + 1
            WHERE ticket_step_id = $1 AND version = $2
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(step.ticket_step_id.as_uuid())
        .bind(expected_version)
        .bind(state_str(step.state))
        .bind(serde_json::to_value(&step.assigned_to).unwrap_or_default())
        .bind(serde_json::to_value(&step.data).unwrap_or_default())
        .bind(step.started_at)
        .bind(step.due_at)
        .bind(step.completed_at)
        .bind(step.previous_state.map(state_str))
        .bind(serde_json::to_value(&step.branch_identity).unwrap_or_default())
        .bind(serde_json::to_value(&step.sub_workflow_identity).unwrap_or_default())
        .fetch_optional(&self.pool)
        .await
        .map_err(UpdateTicketStepError::Database)?;

        match row {
            Some(row) => row
                .try_into()
                .map_err(|_| UpdateTicketStepError::Database(sqlx::Error::RowNotFound)),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM ticket_steps WHERE ticket_step_id = $1)",
                )
                .bind(step.ticket_step_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(UpdateTicketStepError::Database)?;

                if exists {
                    Err(UpdateTicketStepError::Concurrency {
                        expected: expected_version,
                    })
                } else {
                    Err(UpdateTicketStepError::NotFound(step.ticket_step_id))
                }
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketStepRow {
    ticket_step_id: String,
    ticket_id: String,
    step_id: String,
    step_name: String,
    step_type: String,
    state: String,
    assigned_to: serde_json::Value,
    data: serde_json::Value,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    due_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    previous_state: Option<String>,
    branch_identity: serde_json::Value,
    sub_workflow_identity: serde_json::Value,
    version: i64,
}

impl TryFrom<TicketStepRow> for TicketStep {
    type Error = IdParseError;

    fn try_from(row: TicketStepRow) -> Result<Self, Self::Error> {
        Ok(TicketStep {
            ticket_step_id: row.ticket_step_id.parse()?,
            ticket_id: row.ticket_id.parse()?,
            step_id: row.step_id,
            step_name: row.step_name,
            step_type: parse_step_type(&row.step_type),
            state: parse_state(&row.state),
            assigned_to: serde_json::from_value(row.assigned_to).unwrap_or_default(),
            data: serde_json::from_value(row.data).unwrap_or_default(),
            started_at: row.started_at,
            due_at: row.due_at,
            completed_at: row.completed_at,
            previous_state: row.previous_state.as_deref().map(parse_state),
            branch_identity: serde_json::from_value(row.branch_identity).unwrap_or_default(),
            sub_workflow_identity: serde_json::from_value(row.sub_workflow_identity)
                .unwrap_or_default(),
            version: row.version,
        })
    }
}

fn step_type_str(t: StepType) -> &'static str {
    match t {
        StepType::FormStep => "form_step",
        StepType::ApprovalStep => "approval_step",
        StepType::TaskStep => "task_step",
        StepType::NotifyStep => "notify_step",
        StepType::ForkStep => "fork_step",
        StepType::JoinStep => "join_step",
        StepType::SubWorkflowStep => "sub_workflow_step",
    }
}

fn parse_step_type(s: &str) -> StepType {
    match s {
        "approval_step" => StepType::ApprovalStep,
        "task_step" => StepType::TaskStep,
        "notify_step" => StepType::NotifyStep,
        "fork_step" => StepType::ForkStep,
        "join_step" => StepType::JoinStep,
        "sub_workflow_step" => StepType::SubWorkflowStep,
        _ => StepType::FormStep,
    }
}

fn state_str(s: StepState) -> &'static str {
    match s {
        StepState::NotStarted => "not_started",
        StepState::Active => "active",
        StepState::WaitingForApproval => "waiting_for_approval",
        StepState::WaitingForRequester => "waiting_for_requester",
        StepState::WaitingForAgent => "waiting_for_agent",
        StepState::WaitingForBranches => "waiting_for_branches",
        StepState::WaitingForCr => "waiting_for_cr",
        StepState::Completed => "completed",
        StepState::Rejected => "rejected",
        StepState::Skipped => "skipped",
        StepState::Cancelled => "cancelled",
        StepState::OnHold => "on_hold",
    }
}

fn parse_state(s: &str) -> StepState {
    match s {
        "active" => StepState::Active,
        "waiting_for_approval" => StepState::WaitingForApproval,
        "waiting_for_requester" => StepState::WaitingForRequester,
        "waiting_for_agent" => StepState::WaitingForAgent,
        "waiting_for_branches" => StepState::WaitingForBranches,
        "waiting_for_cr" => StepState::WaitingForCr,
        "completed" => StepState::Completed,
        "rejected" => StepState::Rejected,
        "skipped" => StepState::Skipped,
        "cancelled" => StepState::Cancelled,
        "on_hold" => StepState::OnHold,
        _ => StepState::NotStarted,
    }
}
