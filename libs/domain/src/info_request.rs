//! Open-response info request threads and task handover requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::enums::{HandoverRequestStatus, InfoRequestStatus};
use crate::ids::{HandoverRequestId, InfoRequestId, TicketStepId};
use crate::user::UserRef;

/// Open-response side thread on a step. At most one `OPEN` InfoRequest
/// may exist per step at a time (spec invariant / testable property 5).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    pub info_request_id: InfoRequestId,
    pub ticket_step_id: TicketStepId,
    pub requester: UserRef,
    pub recipient: UserRef,
    pub subject: String,
    pub question: String,
    pub status: InfoRequestStatus,
    pub response: Option<String>,
    #[serde(default)]
    pub response_attachment_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// A task assignee's request to hand off. At most one `PENDING` per step.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverRequest {
    pub handover_request_id: HandoverRequestId,
    pub ticket_step_id: TicketStepId,
    pub requested_by: UserRef,
    pub reason: String,
    pub status: HandoverRequestStatus,
    /// Set when approved: the new assignee created as a fresh
    /// `Assignment`.
    pub new_assignee: Option<UserRef>,
    pub decided_by: Option<UserRef>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
}
