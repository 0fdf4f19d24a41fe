//! Repository trait definitions.
//!
//! Every aggregate repository follows the same shape: `create` persists a
//! caller-constructed entity (the engine, not the repository, decides IDs
//! and initial field values), `find_by_id` reads it back, and `update`
//! takes the caller's fully-computed next state plus the version it was
//! read at, persisting it only if the stored version still matches
//! (optimistic concurrency, §4.1/§5). A mismatch yields the aggregate's
//! `Concurrency` error variant; the engine's action layer retries up to
//! three times before surfacing `ConcurrencyError` to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ticketflow_domain::{
    ApprovalTask, ApprovalTaskId, Assignment, AssignmentId, ChangeRequest, ChangeRequestId,
    HandoverRequest, HandoverRequestId, InfoRequest, InfoRequestId, NotificationOutboxEntry,
    NotificationId, NotificationStatus, Ticket, TicketId, TicketStep, TicketStepId,
};

use crate::repo::errors::*;

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, FindTicketError>;
    async fn create(&self, ticket: Ticket) -> Result<Ticket, CreateTicketError>;
    /// Persists `ticket` if the stored row's version still equals
    /// `expected_version`; on success the returned ticket carries
    /// `expected_version + 1`.
    async fn update(
        &self,
        ticket: &Ticket,
        expected_version: i64,
    ) -> Result<Ticket, UpdateTicketError>;
}

#[async_trait]
pub trait TicketStepRepository: Send + Sync {
    async fn find_by_id(&self, id: &TicketStepId) -> Result<Option<TicketStep>, FindTicketStepError>;
    async fn find_by_ticket(&self, ticket_id: &TicketId) -> Result<Vec<TicketStep>, FindTicketStepError>;
    async fn create(&self, step: TicketStep) -> Result<TicketStep, CreateTicketStepError>;
    async fn update(
        &self,
        step: &TicketStep,
        expected_version: i64,
    ) -> Result<TicketStep, UpdateTicketStepError>;
}

#[async_trait]
pub trait ApprovalTaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalTaskId) -> Result<Option<ApprovalTask>, FindApprovalTaskError>;
    async fn find_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Vec<ApprovalTask>, FindApprovalTaskError>;
    async fn create(&self, task: ApprovalTask) -> Result<ApprovalTask, CreateApprovalTaskError>;
    async fn update(
        &self,
        task: &ApprovalTask,
        expected_version: i64,
    ) -> Result<ApprovalTask, UpdateApprovalTaskError>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AssignmentId) -> Result<Option<Assignment>, FindAssignmentError>;
    /// The single `ACTIVE` assignment for a step, if any (history keeps
    /// superseded rows as `REASSIGNED`).
    async fn find_active_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Option<Assignment>, FindAssignmentError>;
    async fn list_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Vec<Assignment>, FindAssignmentError>;
    async fn create(&self, assignment: Assignment) -> Result<Assignment, CreateAssignmentError>;
    async fn update(
        &self,
        assignment: &Assignment,
        expected_version: i64,
    ) -> Result<Assignment, UpdateAssignmentError>;
}

#[async_trait]
pub trait InfoRequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &InfoRequestId) -> Result<Option<InfoRequest>, FindInfoRequestError>;
    /// The single `OPEN` info request for a step, if any (invariant: at
    /// most one open thread per step).
    async fn find_open_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Option<InfoRequest>, FindInfoRequestError>;
    async fn create(&self, request: InfoRequest) -> Result<InfoRequest, CreateInfoRequestError>;
    async fn update(
        &self,
        request: &InfoRequest,
        expected_version: i64,
    ) -> Result<InfoRequest, UpdateInfoRequestError>;
}

#[async_trait]
pub trait HandoverRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &HandoverRequestId,
    ) -> Result<Option<HandoverRequest>, FindHandoverRequestError>;
    async fn find_pending_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Option<HandoverRequest>, FindHandoverRequestError>;
    async fn create(
        &self,
        request: HandoverRequest,
    ) -> Result<HandoverRequest, CreateHandoverRequestError>;
    async fn update(
        &self,
        request: &HandoverRequest,
        expected_version: i64,
    ) -> Result<HandoverRequest, UpdateHandoverRequestError>;
}

#[async_trait]
pub trait ChangeRequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &ChangeRequestId) -> Result<Option<ChangeRequest>, FindChangeRequestError>;
    async fn find_pending_by_ticket(
        &self,
        ticket_id: &TicketId,
    ) -> Result<Option<ChangeRequest>, FindChangeRequestError>;
    async fn create(
        &self,
        change_request: ChangeRequest,
    ) -> Result<ChangeRequest, CreateChangeRequestError>;
    async fn update(
        &self,
        change_request: &ChangeRequest,
        expected_version: i64,
    ) -> Result<ChangeRequest, UpdateChangeRequestError>;
}

/// The notification outbox: durable at-least-once delivery (§4.10).
#[async_trait]
pub trait NotificationOutboxRepository: Send + Sync {
    async fn create(
        &self,
        entry: NotificationOutboxEntry,
    ) -> Result<NotificationOutboxEntry, CreateNotificationError>;

    /// Claims up to `limit` `PENDING` rows whose `next_attempt_at` has
    /// passed, via a per-row advisory lock so multiple worker instances
    /// never double-send the same notification.
    async fn claim_due(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationOutboxEntry>, ListNotificationsError>;

    async fn mark_sent(
        &self,
        id: &NotificationId,
        expected_version: i64,
    ) -> Result<(), UpdateNotificationError>;

    /// Bumps `retry_count`, schedules `next_attempt_at`, and sets `status`
    /// to `FAILED` once `retry_count` has reached the dispatcher's cap
    /// (the cap itself lives with the dispatcher, not the repository).
    async fn reschedule(
        &self,
        id: &NotificationId,
        expected_version: i64,
        next_attempt_at: DateTime<Utc>,
        status: NotificationStatus,
    ) -> Result<(), UpdateNotificationError>;
}
