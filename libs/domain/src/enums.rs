//! All enum types for the ticket workflow engine.
//!
//! These are the source of truth for every closed set named across the
//! engine; `#[typeshare]` generates matching TypeScript types for callers.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

// =============================================================================
// Ticket / step lifecycle
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    WaitingForRequester,
    WaitingForAgent,
    WaitingForCr,
    OnHold,
    Completed,
    Rejected,
    Skipped,
    Cancelled,
}

impl TicketStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Skipped | Self::Cancelled
        )
    }
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    NotStarted,
    Active,
    WaitingForApproval,
    WaitingForRequester,
    WaitingForAgent,
    WaitingForBranches,
    WaitingForCr,
    Completed,
    Rejected,
    Skipped,
    Cancelled,
    OnHold,
}

impl StepState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Skipped | Self::Cancelled
        )
    }

    /// States a change request pauses: active work or waiting on a
    /// participant, but not already terminal or already paused.
    #[must_use]
    pub const fn is_pausable(self) -> bool {
        matches!(
            self,
            Self::Active
                | Self::WaitingForApproval
                | Self::WaitingForRequester
                | Self::WaitingForAgent
                | Self::WaitingForBranches
        )
    }
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    FormStep,
    ApprovalStep,
    TaskStep,
    NotifyStep,
    ForkStep,
    JoinStep,
    SubWorkflowStep,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkJoinMode {
    All,
    Any,
    Majority,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFailurePolicy {
    FailAll,
    ContinueOthers,
    CancelOthers,
}

/// The terminal/non-terminal state of one branch of a fork. Named
/// `BranchExecutionState` (rather than `BranchState`) to keep clear of
/// [`crate::ticket::BranchState`], the struct that carries this value
/// alongside a branch's identity and cursor.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchExecutionState {
    Active,
    Completed,
    Rejected,
    Skipped,
    Cancelled,
}

impl BranchExecutionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Rejected | Self::Skipped | Self::Cancelled)
    }
}

// =============================================================================
// Approvals
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
    Skipped,
    Cancelled,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverResolutionStrategy {
    RequesterManager,
    SpecificEmail,
    SpocEmail,
    Conditional,
    StepAssignee,
    FromLookup,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelApprovalRule {
    All,
    Any,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Reassigned,
    Completed,
}

// =============================================================================
// Info requests / handovers
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoRequestStatus {
    Open,
    Responded,
    Closed,
    Cancelled,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverRequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

// =============================================================================
// Change requests
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormVersionSource {
    Initial,
    ChangeRequest,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChangeKind {
    Added,
    Removed,
    Modified,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentChangeKind {
    Added,
    Removed,
}

// =============================================================================
// Notifications
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    InApp,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Ticket,
    Approval,
    Task,
    InfoRequest,
    System,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplateKey {
    TicketCreated,
    ApprovalPending,
    ApprovalReassigned,
    Approved,
    Rejected,
    Skipped,
    InfoRequested,
    InfoResponded,
    FormPending,
    TaskAssigned,
    TaskReassigned,
    TaskCompleted,
    NoteAdded,
    RequesterNoteAdded,
    SlaReminder,
    SlaEscalation,
    TicketCancelled,
    TicketCompleted,
    LookupUserAssigned,
    ChangeRequestPending,
    ChangeRequestSubmitted,
    ChangeRequestApproved,
    ChangeRequestRejected,
    ChangeRequestCancelled,
    ChangeRequestWorkflowPaused,
    ChangeRequestWorkflowResumed,
}

impl NotificationTemplateKey {
    #[must_use]
    pub const fn category(self) -> NotificationCategory {
        use NotificationCategory as C;
        match self {
            Self::TicketCreated | Self::TicketCancelled | Self::TicketCompleted => C::Ticket,
            Self::ApprovalPending
            | Self::ApprovalReassigned
            | Self::Approved
            | Self::Rejected
            | Self::Skipped
            | Self::ChangeRequestPending
            | Self::ChangeRequestSubmitted
            | Self::ChangeRequestApproved
            | Self::ChangeRequestRejected
            | Self::ChangeRequestCancelled
            | Self::ChangeRequestWorkflowPaused
            | Self::ChangeRequestWorkflowResumed => C::Approval,
            Self::FormPending
            | Self::TaskAssigned
            | Self::TaskReassigned
            | Self::TaskCompleted
            | Self::LookupUserAssigned => C::Task,
            Self::InfoRequested | Self::InfoResponded => C::InfoRequest,
            Self::NoteAdded | Self::RequesterNoteAdded | Self::SlaReminder | Self::SlaEscalation => {
                C::System
            }
        }
    }
}

// =============================================================================
// Workflow definitions
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Published,
    Archived,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    SubmitForm,
    Approve,
    Reject,
    Skip,
    CompleteTask,
    RequestInfo,
    RespondInfo,
    AssignAgent,
    ReassignAgent,
    Cancel,
    OnHold,
    Resume,
    SkipStep,
    HandoverRequest,
    AcknowledgeSla,
    ForkActivated,
    BranchCompleted,
    JoinComplete,
    SubWorkflowStart,
    SubWorkflowCompleted,
    SubWorkflowFailed,
    /// Synthetic event the engine fires on its own behalf once an
    /// automatic step (currently `NOTIFY_STEP`) finishes, so its outgoing
    /// transition can be resolved the same way every other event is.
    StepCompleted,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormFieldType {
    Text,
    Textarea,
    Number,
    Date,
    Select,
    Multiselect,
    Checkbox,
    /// Marks an attachment requirement rather than an inline value.
    File,
    UserSelect,
    LookupUserSelect,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    And,
    Or,
}

impl Default for ConditionLogic {
    fn default() -> Self {
        Self::And
    }
}

// =============================================================================
// Audit
// =============================================================================

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CreateTicket,
    SubmitForm,
    Approve,
    Reject,
    Skip,
    RequestInfo,
    RespondInfo,
    AssignAgent,
    ReassignAgent,
    ReassignApproval,
    CompleteTask,
    NoteAdded,
    RequesterNoteAdded,
    CancelTicket,
    TicketCompleted,
    StepActivated,
    StepCompleted,
    StepSkipped,
    StepCancelled,
    PutOnHold,
    Resumed,
    HandoverRequested,
    HandoverApproved,
    HandoverRejected,
    HandoverCancelled,
    ForkActivated,
    BranchStarted,
    BranchCompleted,
    BranchFailed,
    JoinWaiting,
    JoinCompleted,
    SubWorkflowStarted,
    SubWorkflowCompleted,
    SubWorkflowFailed,
    NotifySent,
    SlaReminder,
    SlaEscalation,
    SlaAcknowledged,
    ChangeRequestCreated,
    ChangeRequestApproved,
    ChangeRequestRejected,
    ChangeRequestCancelled,
    ChangeRequestWorkflowPaused,
    ChangeRequestWorkflowResumed,
    EngineError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_status_serde_is_snake_case() {
        let json = serde_json::to_string(&TicketStatus::WaitingForCr).unwrap();
        assert_eq!(json, "\"waiting_for_cr\"");
    }

    #[test]
    fn step_state_terminal_set_matches_spec() {
        for s in [
            StepState::Completed,
            StepState::Rejected,
            StepState::Skipped,
            StepState::Cancelled,
        ] {
            assert!(s.is_terminal());
        }
        for s in [
            StepState::NotStarted,
            StepState::Active,
            StepState::WaitingForApproval,
            StepState::WaitingForRequester,
            StepState::WaitingForAgent,
            StepState::WaitingForBranches,
            StepState::WaitingForCr,
            StepState::OnHold,
        ] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn pausable_states_match_change_request_pause_set() {
        assert!(StepState::Active.is_pausable());
        assert!(StepState::WaitingForApproval.is_pausable());
        assert!(StepState::WaitingForRequester.is_pausable());
        assert!(StepState::WaitingForAgent.is_pausable());
        assert!(StepState::WaitingForBranches.is_pausable());
        assert!(!StepState::WaitingForCr.is_pausable());
        assert!(!StepState::OnHold.is_pausable());
        assert!(!StepState::Completed.is_pausable());
    }

    #[test]
    fn notification_template_key_category_mapping() {
        assert_eq!(
            NotificationTemplateKey::TicketCreated.category(),
            NotificationCategory::Ticket
        );
        assert_eq!(
            NotificationTemplateKey::ApprovalPending.category(),
            NotificationCategory::Approval
        );
        assert_eq!(
            NotificationTemplateKey::TaskAssigned.category(),
            NotificationCategory::Task
        );
        assert_eq!(
            NotificationTemplateKey::InfoRequested.category(),
            NotificationCategory::InfoRequest
        );
        assert_eq!(
            NotificationTemplateKey::SlaReminder.category(),
            NotificationCategory::System
        );
    }

    #[test]
    fn condition_logic_defaults_to_and() {
        assert_eq!(ConditionLogic::default(), ConditionLogic::And);
    }
}
