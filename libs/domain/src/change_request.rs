//! A requester's proposed mutation of an in-flight ticket's form data.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typeshare::typeshare;

use crate::enums::{AttachmentChangeKind, ChangeRequestStatus, FieldChangeKind};
use crate::ids::{ChangeRequestId, TicketId};
use crate::user::UserRef;

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub change_request_id: ChangeRequestId,
    pub ticket_id: TicketId,
    pub requested_by: UserRef,
    pub original_data: HashMap<String, Value>,
    pub proposed_data: HashMap<String, Value>,
    pub field_changes: Vec<FieldChange>,
    pub attachment_changes: Vec<AttachmentChange>,
    pub from_version: i32,
    pub to_version: Option<i32>,
    pub approver: UserRef,
    pub reason: String,
    pub notes: Option<String>,
    pub status: ChangeRequestStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
}

/// One `(step_id, field_key)` pair whose value differs between the
/// current and proposed form data, decorated for display.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub step_id: String,
    pub step_name: String,
    pub field_key: String,
    pub field_label: String,
    pub kind: FieldChangeKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentChange {
    pub attachment_id: String,
    pub kind: AttachmentChangeKind,
    pub original_filename: Option<String>,
}
