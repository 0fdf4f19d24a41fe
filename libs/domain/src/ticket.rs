//! The running ticket instance and its materialized per-step state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typeshare::typeshare;

use crate::enums::{BranchExecutionState, StepState, StepType, TicketStatus};
use crate::ids::{StepDefId, TicketId, TicketStepId, WorkflowTemplateId, WorkflowVersionId};
use crate::user::UserRef;

/// The running instance of a workflow. See cross-entity invariants 1-3,
/// 5 for the constraints that must hold across every commit.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub workflow_template_id: WorkflowTemplateId,
    pub workflow_version_id: WorkflowVersionId,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    /// Set when `status` is not driven by `active_branches` (invariant 1).
    pub current_step_id: Option<StepDefId>,
    pub active_branches: Vec<BranchState>,
    pub requester: UserRef,
    pub manager_snapshot: Option<UserRef>,
    pub form_values: HashMap<String, Value>,
    pub form_version: i32,
    pub form_versions: Vec<FormVersion>,
    pub attachment_ids: Vec<String>,
    pub join_proceeded: bool,
    /// Recorded when a terminal notify is deferred under `ANY`/`MAJORITY`
    /// joins until every branch reaches a terminal state (§4.4, §4.5).
    pub pending_end_step_id: Option<StepDefId>,
    pub pending_change_request_id: Option<crate::ids::ChangeRequestId>,
    /// Recorded when entering `WAITING_FOR_CR`; restored on resume.
    pub previous_status: Option<TicketStatus>,
    /// Set while a change-request creation holds the pause lock; a
    /// conditional-update guard, not a domain attribute callers inspect
    /// directly (§4.8, §5).
    pub cr_lock: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        !self.active_branches.is_empty()
    }

    /// All fork step ids for which at least one branch is still tracked.
    #[must_use]
    pub fn branches_for_fork<'a>(&'a self, fork_step_id: &str) -> Vec<&'a BranchState> {
        self.active_branches
            .iter()
            .filter(|b| b.parent_fork_step_id == fork_step_id)
            .collect()
    }
}

/// A branch's identity, cursor, and execution state inside
/// [`Ticket::active_branches`].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchState {
    pub parent_fork_step_id: StepDefId,
    pub branch_id: String,
    pub branch_name: String,
    pub state: BranchExecutionState,
    pub current_step_id: StepDefId,
}

/// One dense, monotonic snapshot of `form_values`/`attachment_ids` (spec
/// invariant 5: `form_versions[k].version == k + 1`).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormVersion {
    pub version: i32,
    pub source: crate::enums::FormVersionSource,
    pub form_values: HashMap<String, Value>,
    pub attachment_ids: Vec<String>,
    /// The approver who authored this version, for CR-sourced versions.
    pub recorded_by: Option<UserRef>,
    pub recorded_at: DateTime<Utc>,
}

/// A materialized per-ticket instance of a step definition.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStep {
    pub ticket_step_id: TicketStepId,
    pub ticket_id: TicketId,
    pub step_id: StepDefId,
    pub step_name: String,
    pub step_type: StepType,
    pub state: StepState,
    pub assigned_to: Option<UserRef>,
    pub data: StepData,
    pub started_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Recorded when paused (change request, info request, hold) so the
    /// step can be restored verbatim.
    pub previous_state: Option<StepState>,
    pub branch_identity: Option<BranchIdentity>,
    pub sub_workflow_identity: Option<SubWorkflowIdentity>,
    pub version: i64,
}

impl TicketStep {
    #[must_use]
    pub fn is_paused_for_cr(&self) -> bool {
        self.state == StepState::WaitingForCr
    }
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchIdentity {
    pub branch_id: String,
    pub branch_name: String,
    pub parent_fork_step_id: StepDefId,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWorkflowIdentity {
    pub parent_sub_workflow_step_id: TicketStepId,
    pub from_workflow_template_id: WorkflowTemplateId,
    pub from_workflow_name: String,
}

/// Payload embedded on a `TicketStep`: the union of everything any step
/// kind might need, left mostly empty outside the kinds that use it
/// (mirrors the document-store "one flexible document" shape described
/// in §3/§6 rather than per-kind sub-tables).
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepData {
    #[serde(default)]
    pub form_values: HashMap<String, Value>,
    #[serde(default)]
    pub output_values: HashMap<String, Value>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub draft_values: HashMap<String, Value>,
    pub hold_reason: Option<String>,
    #[serde(default)]
    pub linked_rows: Vec<LinkedRow>,
    /// Parallel approval tracking (§4.4): awaiting decisions.
    #[serde(default)]
    pub parallel_pending_approvers: Vec<UserRef>,
    /// Parallel approval tracking: already decided.
    #[serde(default)]
    pub parallel_completed_approvers: Vec<UserRef>,
    /// Snapshot of the parallel approver set's directory ids, kept
    /// alongside the pending/completed lists for robust matching even if
    /// a `UserRef`'s email later diverges (§4.3).
    #[serde(default)]
    pub parallel_approvers_info: Vec<UserRef>,
    pub primary_approver_email: Option<String>,
    pub sla_acknowledged: bool,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub author: UserRef,
    pub content: String,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    pub is_requester_note: bool,
    pub created_at: DateTime<Utc>,
}

/// One pre-populated row handed to a `TASK_STEP` linked to an earlier
/// form step's repeating section.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedRow {
    pub source_row_index: usize,
    pub context: HashMap<String, LinkedFieldValue>,
    #[serde(default)]
    pub output_values: HashMap<String, Value>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedFieldValue {
    pub value: Value,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_parallel_reflects_active_branches() {
        let mut t = sample_ticket();
        assert!(!t.is_parallel());
        t.active_branches.push(BranchState {
            parent_fork_step_id: "X1".into(),
            branch_id: "b1".into(),
            branch_name: "Branch 1".into(),
            state: BranchExecutionState::Active,
            current_step_id: "B1".into(),
        });
        assert!(t.is_parallel());
    }

    #[test]
    fn branches_for_fork_filters_by_parent() {
        let mut t = sample_ticket();
        t.active_branches.push(BranchState {
            parent_fork_step_id: "X1".into(),
            branch_id: "b1".into(),
            branch_name: "B1".into(),
            state: BranchExecutionState::Active,
            current_step_id: "S1".into(),
        });
        t.active_branches.push(BranchState {
            parent_fork_step_id: "X2".into(),
            branch_id: "b2".into(),
            branch_name: "B2".into(),
            state: BranchExecutionState::Active,
            current_step_id: "S2".into(),
        });
        assert_eq!(t.branches_for_fork("X1").len(), 1);
        assert_eq!(t.branches_for_fork("X2").len(), 1);
        assert_eq!(t.branches_for_fork("X3").len(), 0);
    }

    fn sample_ticket() -> Ticket {
        Ticket {
            ticket_id: TicketId::new(),
            workflow_template_id: WorkflowTemplateId::new(),
            workflow_version_id: WorkflowVersionId::new(),
            title: "t".into(),
            description: String::new(),
            status: TicketStatus::InProgress,
            current_step_id: Some("A1".into()),
            active_branches: vec![],
            requester: UserRef::from_email("alice@x.com"),
            manager_snapshot: None,
            form_values: HashMap::new(),
            form_version: 0,
            form_versions: vec![],
            attachment_ids: vec![],
            join_proceeded: false,
            pending_end_step_id: None,
            pending_change_request_id: None,
            previous_status: None,
            cr_lock: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }
}
