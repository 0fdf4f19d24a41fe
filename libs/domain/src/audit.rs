//! The append-only audit trail's domain record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typeshare::typeshare;

use crate::enums::AuditEventType;
use crate::ids::{AuditEventId, TicketId, TicketStepId};
use crate::user::UserRef;

/// One entry in the append-only trail. Every write in one action shares
/// the same `correlation_id` (spec invariant 6: every event references a
/// real ticket and, if present, a real step).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_event_id: AuditEventId,
    pub ticket_id: TicketId,
    pub ticket_step_id: Option<TicketStepId>,
    pub event_type: AuditEventType,
    pub actor: UserRef,
    pub details: HashMap<String, Value>,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
}
