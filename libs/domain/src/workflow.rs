//! Workflow templates, published versions, and the directed-graph
//! definition (step definitions + transitions) they carry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::enums::{
    BranchFailurePolicy, ConditionLogic, ConditionOperator, ForkJoinMode, FormFieldType,
    ParallelApprovalRule, TransitionEvent, WorkflowStatus,
};
use crate::ids::{StepDefId, WorkflowTemplateId, WorkflowVersionId};

/// A named, categorized workflow. Versions are published against it.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub workflow_template_id: WorkflowTemplateId,
    pub name: String,
    pub category: String,
    pub status: WorkflowStatus,
    /// The highest version number ever published, used to number the next
    /// one; not necessarily the version new tickets resolve to (an older
    /// version stays `Published` if nothing newer has been published yet).
    pub latest_version_number: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable published snapshot of a template's definition.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub workflow_version_id: WorkflowVersionId,
    pub workflow_template_id: WorkflowTemplateId,
    /// Monotonically increasing per template; version 1 is the first
    /// published snapshot.
    pub version_number: i32,
    pub status: WorkflowStatus,
    pub definition: WorkflowDefinition,
    pub published_at: DateTime<Utc>,
}

/// A directed graph: an ordered collection of step definitions and an
/// ordered collection of transitions between them.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub steps: Vec<StepDefinition>,
    pub transitions: Vec<Transition>,
    /// Named lookup tables referenced by `FROM_LOOKUP` approver
    /// resolution and `LOOKUP_USER_SELECT` form fields, keyed by table
    /// name then by the linking field's value.
    #[serde(default)]
    pub lookup_tables: HashMap<String, LookupTable>,
}

impl WorkflowDefinition {
    #[must_use]
    pub fn find_step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    #[must_use]
    pub fn outgoing_transitions(&self, step_id: &str, event: TransitionEvent) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.from_step_id == step_id && t.on_event == event)
            .collect()
    }
}

/// A lookup table bound to a workflow: each row maps a key value (read
/// from a form field) to a primary user plus any number of secondary
/// users who are notified alongside the primary.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupTable {
    pub rows: HashMap<String, LookupRow>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRow {
    pub primary_email: String,
    #[serde(default)]
    pub secondary_emails: Vec<String>,
}

/// Common fields every step kind carries, plus its kind-specific payload.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: StepDefId,
    pub step_name: String,
    pub is_terminal: bool,
    pub due_minutes: Option<i64>,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    FormStep(FormStepDef),
    ApprovalStep(ApprovalStepDef),
    TaskStep(TaskStepDef),
    NotifyStep(NotifyStepDef),
    ForkStep(ForkStepDef),
    JoinStep(JoinStepDef),
    SubWorkflowStep(SubWorkflowStepDef),
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormStepDef {
    pub sections: Vec<FormSection>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSection {
    pub section_id: String,
    pub section_name: String,
    /// Whether this section repeats (a user-entered list of rows),
    /// consumed by a later `TASK_STEP`'s linked-rows population.
    #[serde(default)]
    pub repeating: bool,
    pub fields: Vec<FormFieldDef>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormFieldDef {
    pub field_key: String,
    pub label: String,
    pub field_type: FormFieldType,
    #[serde(default)]
    pub required: bool,
    pub validation: Option<FieldValidation>,
    /// A condition that, when satisfied against the in-progress form
    /// context, makes this field required even if `required` is false.
    pub required_when: Option<ConditionGroup>,
    /// For `LOOKUP_USER_SELECT`: the named lookup table and the other
    /// field whose value keys into it.
    pub lookup_table: Option<String>,
    pub lookup_key_field: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValidation {
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub regex: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStepDef {
    pub resolution: ApproverResolutionConfig,
    /// `None` for a single-approver step.
    pub parallel: Option<ParallelApprovalConfig>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ApproverResolutionConfig {
    RequesterManager {
        spoc_email: Option<String>,
    },
    SpecificEmail {
        email: String,
    },
    SpocEmail {
        email: String,
    },
    Conditional {
        rules: Vec<ConditionalApproverRule>,
        fallback_email: Option<String>,
        spoc_email: Option<String>,
    },
    StepAssignee {
        source_step_id: StepDefId,
        spoc_email: Option<String>,
    },
    FromLookup {
        lookup_table: String,
        key_field: String,
        spoc_email: Option<String>,
    },
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalApproverRule {
    pub condition: ConditionGroup,
    pub approver_email: String,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelApprovalConfig {
    pub rule: ParallelApprovalRule,
    /// An additional specific approver inserted into the parallel set
    /// beyond whatever the resolution strategy produces.
    pub additional_approver_email: Option<String>,
    /// Explicit primary among the parallel set; when absent the first
    /// resolved approver is the primary.
    pub primary_approver_email: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStepDef {
    pub instructions: String,
    #[serde(default)]
    pub output_fields: Vec<FormFieldDef>,
    /// A repeating form section from an earlier step, pre-populating one
    /// task row per source row.
    pub linked_section: Option<LinkedSectionRef>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedSectionRef {
    pub source_step_id: StepDefId,
    pub source_section_id: String,
}

#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyRecipient {
    Requester,
    AssignedAgent,
    Approvers,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyStepDef {
    pub recipients: Vec<NotifyRecipient>,
    pub template_key: crate::enums::NotificationTemplateKey,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDef {
    pub branch_id: String,
    pub branch_name: String,
    pub start_step_id: StepDefId,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkStepDef {
    pub branches: Vec<BranchDef>,
    pub failure_policy: BranchFailurePolicy,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinStepDef {
    pub source_fork_step_id: StepDefId,
    pub join_mode: ForkJoinMode,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWorkflowStepDef {
    pub workflow_template_id: WorkflowTemplateId,
    /// `None` resolves to the current published version at expansion
    /// time (§9 Open Question (a) covers the archived-version case).
    pub version_number: Option<i32>,
}

/// `(from_step_id, on_event, to_step_id, optional condition_group,
/// priority)`. At most one transition fires per `(step, event)`; ties in
/// priority break by declaration order (the position of this transition
/// in [`WorkflowDefinition::transitions`]).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from_step_id: StepDefId,
    pub on_event: TransitionEvent,
    pub to_step_id: StepDefId,
    pub condition: Option<ConditionGroup>,
    #[serde(default)]
    pub priority: i32,
}

/// A tree of comparisons joined by `AND`/`OR`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub logic: ConditionLogic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

/// A single comparison: `field_path <operator> value`. `value` is absent
/// for `IS_EMPTY`/`IS_NOT_EMPTY`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field_path: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            steps: vec![
                StepDefinition {
                    step_id: "F1".into(),
                    step_name: "Request details".into(),
                    is_terminal: false,
                    due_minutes: None,
                    kind: StepKind::FormStep(FormStepDef { sections: vec![] }),
                },
                StepDefinition {
                    step_id: "A1".into(),
                    step_name: "Manager approval".into(),
                    is_terminal: false,
                    due_minutes: Some(1440),
                    kind: StepKind::ApprovalStep(ApprovalStepDef {
                        resolution: ApproverResolutionConfig::RequesterManager { spoc_email: None },
                        parallel: None,
                    }),
                },
            ],
            transitions: vec![Transition {
                from_step_id: "F1".into(),
                on_event: TransitionEvent::SubmitForm,
                to_step_id: "A1".into(),
                condition: None,
                priority: 0,
            }],
            lookup_tables: HashMap::new(),
        }
    }

    #[test]
    fn find_step_locates_by_id() {
        let def = sample_definition();
        assert!(def.find_step("A1").is_some());
        assert!(def.find_step("missing").is_none());
    }

    #[test]
    fn outgoing_transitions_filters_by_step_and_event() {
        let def = sample_definition();
        let out = def.outgoing_transitions("F1", TransitionEvent::SubmitForm);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_step_id, "A1");
        assert!(def.outgoing_transitions("F1", TransitionEvent::Approve).is_empty());
    }
}
