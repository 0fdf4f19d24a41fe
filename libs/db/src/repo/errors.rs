//! Per-operation repository errors.
//!
//! Every mutating operation on a versioned aggregate distinguishes three
//! outcomes: the row doesn't exist, the row exists but its `version` no
//! longer matches the caller's expectation (the engine's bounded 3-attempt
//! retry loop re-reads and retries this one), or the database itself
//! failed. Read-only operations collapse to `NotFound`/`Database`.

use thiserror::Error;
use ticketflow_domain::{
    ApprovalTaskId, AssignmentId, ChangeRequestId, HandoverRequestId, InfoRequestId,
    NotificationId, TicketId, TicketStepId,
};

#[derive(Debug, Error)]
pub enum FindTicketError {
    #[error("ticket not found: {0}")]
    NotFound(TicketId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateTicketError {
    #[error("workflow version not found")]
    WorkflowVersionNotFound,
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateTicketError {
    #[error("ticket not found: {0}")]
    NotFound(TicketId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindTicketStepError {
    #[error("ticket step not found: {0}")]
    NotFound(TicketStepId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateTicketStepError {
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateTicketStepError {
    #[error("ticket step not found: {0}")]
    NotFound(TicketStepId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindApprovalTaskError {
    #[error("approval task not found: {0}")]
    NotFound(ApprovalTaskId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateApprovalTaskError {
    #[error("ticket step not found: {0}")]
    TicketStepNotFound(TicketStepId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateApprovalTaskError {
    #[error("approval task not found: {0}")]
    NotFound(ApprovalTaskId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindAssignmentError {
    #[error("assignment not found: {0}")]
    NotFound(AssignmentId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateAssignmentError {
    #[error("ticket step not found: {0}")]
    TicketStepNotFound(TicketStepId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateAssignmentError {
    #[error("assignment not found: {0}")]
    NotFound(AssignmentId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindInfoRequestError {
    #[error("info request not found: {0}")]
    NotFound(InfoRequestId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateInfoRequestError {
    #[error("ticket step not found: {0}")]
    TicketStepNotFound(TicketStepId),
    #[error("an open info request already exists for this step")]
    AlreadyOpen,
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateInfoRequestError {
    #[error("info request not found: {0}")]
    NotFound(InfoRequestId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindHandoverRequestError {
    #[error("handover request not found: {0}")]
    NotFound(HandoverRequestId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateHandoverRequestError {
    #[error("ticket step not found: {0}")]
    TicketStepNotFound(TicketStepId),
    #[error("a pending handover request already exists for this step")]
    AlreadyPending,
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateHandoverRequestError {
    #[error("handover request not found: {0}")]
    NotFound(HandoverRequestId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FindChangeRequestError {
    #[error("change request not found: {0}")]
    NotFound(ChangeRequestId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateChangeRequestError {
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateChangeRequestError {
    #[error("change request not found: {0}")]
    NotFound(ChangeRequestId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum CreateNotificationError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum UpdateNotificationError {
    #[error("notification not found: {0}")]
    NotFound(NotificationId),
    #[error("concurrent modification, expected version {expected}")]
    Concurrency { expected: i64 },
    #[error("database error")]
    Database(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ListNotificationsError {
    #[error("database error")]
    Database(#[source] sqlx::Error),
}
