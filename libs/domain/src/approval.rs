//! Per-approver approval tasks and task-step assignment history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::enums::{ApprovalDecision, AssignmentStatus};
use crate::ids::{ApprovalTaskId, AssignmentId, TicketStepId};
use crate::user::UserRef;

/// One per approver on an approval step.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub approval_task_id: ApprovalTaskId,
    pub ticket_step_id: TicketStepId,
    pub approver: UserRef,
    pub decision: ApprovalDecision,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl ApprovalTask {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.decision == ApprovalDecision::Pending
    }
}

/// History of assignments for a task step. A new row is created on each
/// assign/reassign; the previous active one is marked `REASSIGNED` with
/// an end timestamp.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: AssignmentId,
    pub ticket_step_id: TicketStepId,
    pub assignee: UserRef,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub version: i64,
}
