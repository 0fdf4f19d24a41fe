//! The workflow engine core (§4.4/§4.5): ticket creation, step activation,
//! transition advancement, fork/join completion, and ticket rejection/skip.
//!
//! Every mutating operation resolves an [`Actor`]'s permission through
//! [`crate::permission::can_act_on_step`] before touching a step, then
//! persists through the versioned repositories' optimistic-concurrency
//! `update`, retried up to three times (§4.1) before surfacing
//! [`EngineError::ConcurrencyExhausted`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use ticketflow_db::{
    ApprovalTaskRepository, AssignmentRepository, AuditWriter, ChangeRequestRepository,
    InfoRequestRepository, NotificationOutboxRepository, TicketRepository, TicketStepRepository,
};
use ticketflow_domain::{
    Actor, ApprovalDecision, ApprovalTask, ApprovalTaskId, Assignment, AssignmentId,
    AssignmentStatus, AttachmentChange, AttachmentChangeKind, AuditEvent, AuditEventId,
    AuditEventType, BranchDef, BranchExecutionState, BranchFailurePolicy, BranchIdentity,
    BranchState, ChangeRequest, ChangeRequestId, ChangeRequestStatus, FieldChange,
    FieldChangeKind, ForkJoinMode, FormVersion, FormVersionSource, InfoRequest, InfoRequestId,
    InfoRequestStatus, NotificationId, NotificationOutboxEntry, NotificationStatus,
    NotifyRecipient, StepDefId, StepDefinition, StepKind, StepState, StepType, SubWorkflowIdentity,
    Ticket, TicketId, TicketStatus, TicketStep, TicketStepId, TransitionEvent, UserRef,
    WorkflowDefinition, WorkflowTemplateId, WorkflowVersion, WorkflowVersionId,
};

use crate::permission::{self, Action};
use crate::resolver::{self, ApproverResolutionError};
use crate::transition::{resolve_transition, TransitionError};

const MAX_CONCURRENCY_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ticket not found")]
    TicketNotFound,
    #[error("ticket step '{0}' not found on this ticket")]
    StepNotFound(StepDefId),
    #[error("step definition '{0}' not found in workflow definition")]
    StepDefNotFound(StepDefId),
    #[error("workflow version not found")]
    WorkflowVersionNotFound,
    #[error("workflow has no step that can serve as its starting point")]
    NoStartStep,
    #[error("actor is not permitted to perform this action on this step")]
    Forbidden,
    #[error("step '{0}' requires kind {1:?}, found a different kind")]
    WrongStepKind(StepDefId, StepType),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    ApproverResolution(#[from] ApproverResolutionError),
    #[error("gave up after {0} attempts due to repeated concurrent modification")]
    ConcurrencyExhausted(u32),
    #[error("a change request is already pending or being created for this ticket")]
    ChangeRequestInFlight,
    #[error("this ticket has no pending change request")]
    NoPendingChangeRequest,
    #[error("change request creation requires at least one completed approval step and no approver fallback is available")]
    NoApprovalHistory,
    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

fn repo_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> EngineError {
    EngineError::Repository(anyhow::Error::new(e))
}

/// Grounded on the teacher's `WorkflowConfigStore`/`InMemoryConfigStore`
/// pair (see `engine.rs`'s original shape): the engine needs published
/// workflow definitions to activate steps and expand sub-workflows, but
/// publishing/versioning itself is out of scope here.
#[async_trait]
pub trait WorkflowDefinitionStore: Send + Sync {
    /// Resolves a specific version, or the latest published version when
    /// `version_number` is `None`.
    async fn get_version(
        &self,
        workflow_template_id: &WorkflowTemplateId,
        version_number: Option<i32>,
    ) -> Result<WorkflowVersion, EngineError>;

    /// Resolves the exact immutable snapshot a ticket was created against,
    /// regardless of whether a newer version has since been published.
    async fn get_by_id(&self, workflow_version_id: &WorkflowVersionId) -> Result<WorkflowVersion, EngineError>;
}

#[derive(Default)]
pub struct InMemoryWorkflowDefinitionStore {
    versions: Mutex<HashMap<WorkflowTemplateId, Vec<WorkflowVersion>>>,
}

impl InMemoryWorkflowDefinitionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, version: WorkflowVersion) {
        let mut versions = self.versions.lock().await;
        versions
            .entry(version.workflow_template_id)
            .or_default()
            .push(version);
    }
}

#[async_trait]
impl WorkflowDefinitionStore for InMemoryWorkflowDefinitionStore {
    async fn get_version(
        &self,
        workflow_template_id: &WorkflowTemplateId,
        version_number: Option<i32>,
    ) -> Result<WorkflowVersion, EngineError> {
        let versions = self.versions.lock().await;
        let Some(candidates) = versions.get(workflow_template_id) else {
            return Err(EngineError::WorkflowVersionNotFound);
        };
        let found = match version_number {
            Some(n) => candidates.iter().find(|v| v.version_number == n),
            None => candidates.iter().max_by_key(|v| v.version_number),
        };
        found.cloned().ok_or(EngineError::WorkflowVersionNotFound)
    }

    async fn get_by_id(&self, workflow_version_id: &WorkflowVersionId) -> Result<WorkflowVersion, EngineError> {
        let versions = self.versions.lock().await;
        versions
            .values()
            .flatten()
            .find(|v| &v.workflow_version_id == workflow_version_id)
            .cloned()
            .ok_or(EngineError::WorkflowVersionNotFound)
    }
}

/// Everything a freshly created ticket needs (§4.4 "Create ticket").
pub struct CreateTicketInput {
    pub workflow_template_id: WorkflowTemplateId,
    pub version_number: Option<i32>,
    pub title: String,
    pub description: String,
    pub requester: UserRef,
    pub manager_snapshot: Option<UserRef>,
    pub form_values: HashMap<String, Value>,
    pub attachment_ids: Vec<String>,
    /// Wizard-style pre-filled initial form steps, in fill order. Each is
    /// marked `COMPLETED` immediately and audited as a `SUBMIT_FORM`; the
    /// ticket then activates the transition target of the last one.
    pub prefilled_form_steps: Vec<StepDefId>,
}

/// One in-progress mutation: the ticket plus every materialized step,
/// loaded once and flushed once. Not a database transaction — each row
/// still commits independently through its own optimistic-concurrency
/// `update`, retried individually by [`WorkflowEngine::flush`].
struct Cascade {
    definition: WorkflowDefinition,
    sub_definitions: HashMap<TicketStepId, WorkflowDefinition>,
    ticket: Ticket,
    ticket_is_new: bool,
    steps: Vec<TicketStep>,
    dirty: HashSet<TicketStepId>,
    fresh: HashSet<TicketStepId>,
    new_approval_tasks: Vec<ApprovalTask>,
    new_change_request: Option<ChangeRequest>,
    updated_change_request: Option<ChangeRequest>,
    new_info_request: Option<InfoRequest>,
    updated_info_request: Option<InfoRequest>,
    new_assignment: Option<Assignment>,
    updated_assignment: Option<Assignment>,
    notifications: Vec<NotificationOutboxEntry>,
    audit_events: Vec<AuditEvent>,
    correlation_id: String,
}

impl Cascade {
    fn definition_for(&self, step: &TicketStep) -> &WorkflowDefinition {
        step.sub_workflow_identity
            .as_ref()
            .and_then(|id| self.sub_definitions.get(&id.parent_sub_workflow_step_id))
            .unwrap_or(&self.definition)
    }

    fn step_idx(&self, step_id: &str) -> Result<usize, EngineError> {
        self.steps
            .iter()
            .position(|s| s.step_id == step_id && !s.state.is_terminal())
            .or_else(|| self.steps.iter().position(|s| s.step_id == step_id))
            .ok_or_else(|| EngineError::StepNotFound(step_id.to_string()))
    }

    fn touch(&mut self, idx: usize) {
        self.dirty.insert(self.steps[idx].ticket_step_id);
    }

    fn push_step(&mut self, step: TicketStep) {
        self.fresh.insert(step.ticket_step_id);
        self.dirty.insert(step.ticket_step_id);
        self.steps.push(step);
    }

    fn audit(
        &mut self,
        event_type: AuditEventType,
        step: Option<TicketStepId>,
        actor: &UserRef,
        details: HashMap<String, Value>,
    ) {
        self.audit_events.push(AuditEvent {
            audit_event_id: AuditEventId::new(),
            ticket_id: self.ticket.ticket_id,
            ticket_step_id: step,
            event_type,
            actor: actor.clone(),
            details,
            correlation_id: self.correlation_id.clone(),
            occurred_at: Utc::now(),
        });
    }

    fn notify(&mut self, template_key: ticketflow_domain::NotificationTemplateKey, recipients: Vec<UserRef>) {
        if recipients.is_empty() {
            return;
        }
        self.notifications.push(NotificationOutboxEntry {
            notification_id: NotificationId::new(),
            ticket_id: self.ticket.ticket_id,
            template_key,
            channel: ticketflow_domain::NotificationChannel::Email,
            recipients,
            payload: HashMap::from([(
                "ticket_id".to_string(),
                Value::String(self.ticket.ticket_id.to_string()),
            )]),
            status: NotificationStatus::Pending,
            retry_count: 0,
            next_attempt_at: Utc::now(),
            correlation_id: self.correlation_id.clone(),
            created_at: Utc::now(),
            sent_at: None,
            version: 0,
        });
    }
}

pub struct WorkflowEngine {
    definitions: Arc<dyn WorkflowDefinitionStore>,
    tickets: Arc<dyn TicketRepository>,
    steps: Arc<dyn TicketStepRepository>,
    approval_tasks: Arc<dyn ApprovalTaskRepository>,
    change_requests: Arc<dyn ChangeRequestRepository>,
    info_requests: Arc<dyn InfoRequestRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    outbox: Arc<dyn NotificationOutboxRepository>,
    audit: AuditWriter,
}

impl WorkflowEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        definitions: Arc<dyn WorkflowDefinitionStore>,
        tickets: Arc<dyn TicketRepository>,
        steps: Arc<dyn TicketStepRepository>,
        approval_tasks: Arc<dyn ApprovalTaskRepository>,
        change_requests: Arc<dyn ChangeRequestRepository>,
        info_requests: Arc<dyn InfoRequestRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        outbox: Arc<dyn NotificationOutboxRepository>,
        audit: AuditWriter,
    ) -> Self {
        Self {
            definitions,
            tickets,
            steps,
            approval_tasks,
            change_requests,
            info_requests,
            assignments,
            outbox,
            audit,
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    pub async fn create_ticket(&self, input: CreateTicketInput, correlation_id: &str) -> Result<Ticket, EngineError> {
        let version = self
            .definitions
            .get_version(&input.workflow_template_id, input.version_number)
            .await?;
        let definition = version.definition.clone();

        let ticket = Ticket {
            ticket_id: TicketId::new(),
            workflow_template_id: input.workflow_template_id,
            workflow_version_id: version.workflow_version_id,
            title: input.title,
            description: input.description,
            status: TicketStatus::InProgress,
            current_step_id: None,
            active_branches: vec![],
            requester: input.requester.clone(),
            manager_snapshot: input.manager_snapshot,
            form_values: input.form_values,
            form_version: 1,
            form_versions: vec![],
            attachment_ids: input.attachment_ids,
            join_proceeded: false,
            pending_end_step_id: None,
            pending_change_request_id: None,
            previous_status: None,
            cr_lock: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };

        let branch_identities = compute_branch_identities(&definition);
        let mut steps = Vec::with_capacity(definition.steps.len());
        for step_def in &definition.steps {
            steps.push(materialize_step(&ticket, step_def, branch_identities.get(&step_def.step_id).cloned()));
        }

        let mut cascade = Cascade {
            definition,
            sub_definitions: HashMap::new(),
            ticket,
            ticket_is_new: true,
            steps,
            dirty: HashSet::new(),
            fresh: HashSet::new(),
            new_approval_tasks: vec![],
            new_change_request: None,
            updated_change_request: None,
            new_info_request: None,
            updated_info_request: None,
            new_assignment: None,
            updated_assignment: None,
            notifications: vec![],
            audit_events: vec![],
            correlation_id: correlation_id.to_string(),
        };
        for step in &cascade.steps {
            cascade.fresh.insert(step.ticket_step_id);
        }

        cascade.audit(AuditEventType::CreateTicket, None, &input.requester, HashMap::new());

        if input.prefilled_form_steps.is_empty() {
            let start = find_start_step(&cascade.definition).ok_or(EngineError::NoStartStep)?.clone();
            self.activate(&mut cascade, &start, None, true).await?;
        } else {
            for step_id in &input.prefilled_form_steps {
                let idx = cascade.step_idx(step_id)?;
                cascade.steps[idx].state = StepState::Completed;
                cascade.steps[idx].started_at = Some(Utc::now());
                cascade.steps[idx].completed_at = Some(Utc::now());
                cascade.touch(idx);
                cascade.audit(AuditEventType::SubmitForm, Some(cascade.steps[idx].ticket_step_id), &input.requester, HashMap::new());
            }
            let last = input.prefilled_form_steps.last().expect("checked non-empty").clone();
            self.advance(&mut cascade, &last, TransitionEvent::SubmitForm, &Value::Null).await?;
        }

        self.flush(cascade).await
    }

    pub async fn submit_form(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        form_values: HashMap<String, Value>,
        attachment_ids: Vec<String>,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;
        self.authorize(&cascade, idx, actor, Action::SubmitForm, None)?;

        cascade.ticket.form_values.extend(form_values.clone());
        cascade.steps[idx].data.form_values.extend(form_values);
        cascade.steps[idx].data.draft_values.clear();
        cascade.ticket.attachment_ids.extend(attachment_ids);
        cascade.steps[idx].state = StepState::Completed;
        cascade.steps[idx].completed_at = Some(Utc::now());
        cascade.touch(idx);
        cascade.audit(AuditEventType::SubmitForm, Some(cascade.steps[idx].ticket_step_id), &actor.user, HashMap::new());

        let step_id = step_id.to_string();
        self.advance(&mut cascade, &step_id, TransitionEvent::SubmitForm, &Value::Null).await?;
        self.flush(cascade).await
    }

    pub async fn decide_approval(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        decision: ApprovalDecision,
        comment: Option<String>,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;
        let action = match decision {
            ApprovalDecision::Rejected => Action::Reject,
            _ => Action::Approve,
        };
        let ticket_step_id = cascade.steps[idx].ticket_step_id;
        let open_ir = self
            .info_requests
            .find_open_by_ticket_step(&ticket_step_id)
            .await
            .map_err(repo_err)?;
        self.authorize(&cascade, idx, actor, action, open_ir.as_ref())?;
        if let Some(mut ir) = open_ir {
            ir.status = InfoRequestStatus::Cancelled;
            cascade.updated_info_request = Some(ir);
        }

        let mut tasks = self
            .approval_tasks
            .find_by_ticket_step(&cascade.steps[idx].ticket_step_id)
            .await
            .map_err(repo_err)?;
        let Some(task) = tasks.iter_mut().find(|t| t.approver.is_same_person(&actor.user)) else {
            return Err(EngineError::Forbidden);
        };
        task.decision = decision;
        task.comment = comment;
        task.decided_at = Some(Utc::now());
        cascade.new_approval_tasks.push(task.clone());

        let is_parallel = !cascade.steps[idx].data.parallel_approvers_info.is_empty();
        let event = if is_parallel {
            cascade.steps[idx].data.parallel_pending_approvers.retain(|u| !u.is_same_person(&actor.user));
            cascade.steps[idx].data.parallel_completed_approvers.push(actor.user.clone());
            cascade.touch(idx);

            let rule = cascade
                .definition_for(&cascade.steps[idx])
                .find_step(step_id)
                .and_then(|s| match &s.kind {
                    StepKind::ApprovalStep(a) => a.parallel.as_ref().map(|p| p.rule),
                    _ => None,
                })
                .unwrap_or(ticketflow_domain::ParallelApprovalRule::All);

            let decisions: Vec<ApprovalDecision> = tasks.iter().map(|t| t.decision).collect();
            if !resolver::parallel_settled(rule, &decisions) {
                self.audit_decision(&mut cascade, idx, &actor.user, decision);
                return self.flush(cascade).await;
            }
            match resolver::parallel_outcome(rule, &decisions) {
                ApprovalDecision::Approved => TransitionEvent::Approve,
                _ => TransitionEvent::Reject,
            }
        } else {
            match decision {
                ApprovalDecision::Approved => TransitionEvent::Approve,
                ApprovalDecision::Rejected => TransitionEvent::Reject,
                ApprovalDecision::Skipped => TransitionEvent::Skip,
                ApprovalDecision::Cancelled | ApprovalDecision::Pending => TransitionEvent::Reject,
            }
        };

        self.audit_decision(&mut cascade, idx, &actor.user, decision);
        cascade.steps[idx].state = match event {
            TransitionEvent::Approve => StepState::Completed,
            _ => StepState::Rejected,
        };
        cascade.steps[idx].completed_at = Some(Utc::now());
        cascade.touch(idx);

        let step_id = step_id.to_string();
        self.advance(&mut cascade, &step_id, event, &Value::Null).await?;
        self.flush(cascade).await
    }

    fn audit_decision(&self, cascade: &mut Cascade, idx: usize, actor: &UserRef, decision: ApprovalDecision) {
        let event_type = match decision {
            ApprovalDecision::Approved => AuditEventType::Approve,
            ApprovalDecision::Rejected => AuditEventType::Reject,
            ApprovalDecision::Skipped => AuditEventType::Skip,
            ApprovalDecision::Cancelled | ApprovalDecision::Pending => AuditEventType::Reject,
        };
        let step_id = cascade.steps[idx].ticket_step_id;
        cascade.audit(event_type, Some(step_id), actor, HashMap::new());
    }

    pub async fn complete_task(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        output_values: HashMap<String, Value>,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;

        if cascade.steps[idx].state == StepState::Completed {
            let completed_by_same = cascade.steps[idx]
                .assigned_to
                .as_ref()
                .is_some_and(|a| a.is_same_person(&actor.user));
            if completed_by_same {
                return Ok(cascade.ticket);
            }
            return Err(EngineError::Forbidden);
        }

        self.authorize(&cascade, idx, actor, Action::CompleteTask, None)?;

        cascade.steps[idx].data.output_values.extend(output_values);
        cascade.steps[idx].state = StepState::Completed;
        cascade.steps[idx].completed_at = Some(Utc::now());
        cascade.touch(idx);
        cascade.audit(AuditEventType::CompleteTask, Some(cascade.steps[idx].ticket_step_id), &actor.user, HashMap::new());

        let step_id = step_id.to_string();
        self.advance(&mut cascade, &step_id, TransitionEvent::CompleteTask, &Value::Null).await?;
        self.flush(cascade).await
    }

    pub async fn reject_ticket_action(&self, actor: &Actor, ticket_id: &TicketId, correlation_id: &str) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        self.reject_ticket(&mut cascade, &actor.user);
        self.flush(cascade).await
    }

    pub async fn skip_ticket_action(&self, actor: &Actor, ticket_id: &TicketId, correlation_id: &str) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        self.skip_ticket(&mut cascade, &actor.user);
        self.flush(cascade).await
    }

    pub async fn cancel_ticket_action(&self, actor: &Actor, ticket_id: &TicketId, correlation_id: &str) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        if !permission::can_cancel_ticket(actor, &cascade.ticket) {
            return Err(EngineError::Forbidden);
        }
        self.terminate_ticket(&mut cascade, &actor.user, TicketStatus::Cancelled, AuditEventType::CancelTicket);
        self.flush(cascade).await
    }

    /// Opens an `InfoRequest` against `step_id` and parks it at
    /// `WAITING_FOR_REQUESTER`/`WAITING_FOR_AGENT` depending on who the
    /// question is addressed to (§4.9).
    pub async fn request_info(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        recipient: UserRef,
        subject: String,
        question: String,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;
        self.authorize(&cascade, idx, actor, Action::RequestInfo, None)?;

        let ticket_step_id = cascade.steps[idx].ticket_step_id;
        let waiting_state = if recipient.is_same_person(&cascade.ticket.requester) {
            StepState::WaitingForRequester
        } else {
            StepState::WaitingForAgent
        };
        cascade.steps[idx].previous_state = Some(cascade.steps[idx].state);
        cascade.steps[idx].state = waiting_state;
        cascade.touch(idx);

        cascade.new_info_request = Some(InfoRequest {
            info_request_id: InfoRequestId::new(),
            ticket_step_id,
            requester: actor.user.clone(),
            recipient: recipient.clone(),
            subject,
            question,
            status: InfoRequestStatus::Open,
            response: None,
            response_attachment_ids: vec![],
            created_at: Utc::now(),
            responded_at: None,
            version: 0,
        });

        cascade.audit(AuditEventType::RequestInfo, Some(ticket_step_id), &actor.user, HashMap::new());
        cascade.notify(ticketflow_domain::NotificationTemplateKey::InfoRequested, vec![recipient]);
        self.flush(cascade).await
    }

    /// Answers the step's open `InfoRequest`, restoring the step to its
    /// `previous_state` (§4.9).
    pub async fn respond_info(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        response: String,
        response_attachment_ids: Vec<String>,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;
        let ticket_step_id = cascade.steps[idx].ticket_step_id;
        let open_ir = self.info_requests.find_open_by_ticket_step(&ticket_step_id).await.map_err(repo_err)?;
        self.authorize(&cascade, idx, actor, Action::RespondInfo, open_ir.as_ref())?;
        let mut ir = open_ir.ok_or(EngineError::Forbidden)?;

        ir.status = InfoRequestStatus::Responded;
        ir.response = Some(response);
        ir.response_attachment_ids = response_attachment_ids;
        ir.responded_at = Some(Utc::now());
        cascade.updated_info_request = Some(ir);

        cascade.steps[idx].state = cascade.steps[idx].previous_state.take().unwrap_or(StepState::Active);
        cascade.touch(idx);

        cascade.audit(AuditEventType::RespondInfo, Some(ticket_step_id), &actor.user, HashMap::new());
        let requester = cascade.ticket.requester.clone();
        cascade.notify(ticketflow_domain::NotificationTemplateKey::InfoResponded, vec![requester]);
        self.flush(cascade).await
    }

    /// Assigns a `TASK_STEP` that has no current assignment (§4.9).
    pub async fn assign(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        assignee: UserRef,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;
        self.authorize(&cascade, idx, actor, Action::Assign, None)?;

        let ticket_step_id = cascade.steps[idx].ticket_step_id;
        cascade.new_assignment = Some(Assignment {
            assignment_id: AssignmentId::new(),
            ticket_step_id,
            assignee: assignee.clone(),
            status: AssignmentStatus::Active,
            assigned_at: Utc::now(),
            ended_at: None,
            version: 0,
        });
        cascade.steps[idx].assigned_to = Some(assignee.clone());
        cascade.touch(idx);
        cascade.audit(AuditEventType::AssignAgent, Some(ticket_step_id), &actor.user, HashMap::new());
        cascade.notify(ticketflow_domain::NotificationTemplateKey::TaskAssigned, vec![assignee]);
        self.flush(cascade).await
    }

    /// Supersedes the step's active assignment with a new one (§4.9).
    pub async fn reassign(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        step_id: &str,
        assignee: UserRef,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();
        let idx = cascade.step_idx(step_id)?;
        self.authorize(&cascade, idx, actor, Action::Reassign, None)?;

        let ticket_step_id = cascade.steps[idx].ticket_step_id;
        if let Some(mut active) = self.assignments.find_active_by_ticket_step(&ticket_step_id).await.map_err(repo_err)? {
            active.status = AssignmentStatus::Reassigned;
            active.ended_at = Some(Utc::now());
            cascade.updated_assignment = Some(active);
        }
        cascade.new_assignment = Some(Assignment {
            assignment_id: AssignmentId::new(),
            ticket_step_id,
            assignee: assignee.clone(),
            status: AssignmentStatus::Active,
            assigned_at: Utc::now(),
            ended_at: None,
            version: 0,
        });
        cascade.steps[idx].assigned_to = Some(assignee.clone());
        cascade.touch(idx);
        cascade.audit(AuditEventType::ReassignAgent, Some(ticket_step_id), &actor.user, HashMap::new());
        cascade.notify(ticketflow_domain::NotificationTemplateKey::TaskReassigned, vec![assignee]);
        self.flush(cascade).await
    }

    // =========================================================================
    // Change requests (§4.8)
    // =========================================================================

    /// Opens a change request against the requester's own in-flight
    /// ticket. Acquires `cr_lock` with a conditional update before doing
    /// any heavier work, and releases it again whether creation succeeds
    /// or fails.
    pub async fn create_change_request(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        proposed_data: HashMap<String, Value>,
        attachment_ids: Vec<String>,
        reason: String,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();

        if cascade.ticket.status != TicketStatus::InProgress {
            return Err(EngineError::Forbidden);
        }
        if !actor.is_same_person(&cascade.ticket.requester) {
            return Err(EngineError::Forbidden);
        }
        if cascade.ticket.pending_change_request_id.is_some() || cascade.ticket.cr_lock.is_some() {
            return Err(EngineError::ChangeRequestInFlight);
        }

        let mut lock_holder = cascade.ticket.clone();
        lock_holder.cr_lock = Some(Utc::now());
        cascade.ticket = self
            .tickets
            .update(&lock_holder, lock_holder.version)
            .await
            .map_err(|_| EngineError::ChangeRequestInFlight)?;

        let completed_approvals: Vec<&TicketStep> = cascade
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::ApprovalStep && s.state == StepState::Completed)
            .collect();
        if completed_approvals.is_empty() {
            if let Ok(Some(mut latest)) = self.tickets.find_by_id(ticket_id).await {
                latest.cr_lock = None;
                let _ = self.tickets.update(&latest, latest.version).await;
            }
            return Err(EngineError::NoApprovalHistory);
        }

        let approver = match completed_approvals.iter().min_by_key(|s| s.started_at).and_then(|s| s.assigned_to.clone()) {
            Some(a) => a,
            None => match self.resolve_cr_fallback_approver(&cascade) {
                Ok(a) => a,
                Err(e) => {
                    if let Ok(Some(mut latest)) = self.tickets.find_by_id(ticket_id).await {
                        latest.cr_lock = None;
                        let _ = self.tickets.update(&latest, latest.version).await;
                    }
                    return Err(e);
                }
            },
        };

        let field_changes = compute_field_changes(&cascade.definition, &cascade.ticket.form_values, &proposed_data);
        let attachment_changes = compute_attachment_changes(&cascade.ticket.attachment_ids, &attachment_ids);

        let cr = ChangeRequest {
            change_request_id: ChangeRequestId::new(),
            ticket_id: cascade.ticket.ticket_id,
            requested_by: actor.user.clone(),
            original_data: cascade.ticket.form_values.clone(),
            proposed_data,
            field_changes,
            attachment_changes,
            from_version: cascade.ticket.form_version,
            to_version: None,
            approver,
            reason,
            notes: None,
            status: ChangeRequestStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            version: 0,
        };
        cascade.ticket.pending_change_request_id = Some(cr.change_request_id);
        cascade.ticket.cr_lock = None;
        cascade.new_change_request = Some(cr);

        cascade.audit(AuditEventType::ChangeRequestCreated, None, &actor.user, HashMap::new());
        self.pause_workflow(&mut cascade, &actor.user);

        match self.flush(cascade).await {
            Ok(t) => Ok(t),
            Err(e) => {
                if let Ok(Some(mut latest)) = self.tickets.find_by_id(ticket_id).await {
                    latest.cr_lock = None;
                    let _ = self.tickets.update(&latest, latest.version).await;
                }
                Err(e)
            }
        }
    }

    fn resolve_cr_fallback_approver(&self, cascade: &Cascade) -> Result<UserRef, EngineError> {
        let first_approval = cascade.definition.steps.iter().find_map(|s| match &s.kind {
            StepKind::ApprovalStep(a) => Some(a),
            _ => None,
        });
        match first_approval {
            Some(approval) => {
                let resolved = resolver::resolve_approvers(
                    &approval.resolution,
                    None,
                    &cascade.ticket,
                    &cascade.definition,
                    &cascade.steps,
                    &Value::Null,
                )?;
                Ok(resolved.primary)
            }
            None => cascade.ticket.manager_snapshot.clone().ok_or(EngineError::NoApprovalHistory),
        }
    }

    /// Applies the change request's proposed data as a new `FormVersion`,
    /// marks it `APPROVED`, then resumes the paused workflow (§4.8).
    pub async fn approve_change_request(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        notes: Option<String>,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();

        let cr_id = cascade.ticket.pending_change_request_id.ok_or(EngineError::NoPendingChangeRequest)?;
        let mut cr = self
            .change_requests
            .find_by_id(&cr_id)
            .await
            .map_err(repo_err)?
            .ok_or(EngineError::NoPendingChangeRequest)?;
        if cr.status != ChangeRequestStatus::Pending || !actor.is_same_person(&cr.approver) {
            return Err(EngineError::Forbidden);
        }

        if cascade.ticket.form_versions.is_empty() {
            cascade.ticket.form_versions.push(FormVersion {
                version: 1,
                source: FormVersionSource::Initial,
                form_values: cr.original_data.clone(),
                attachment_ids: cascade.ticket.attachment_ids.clone(),
                recorded_by: None,
                recorded_at: cascade.ticket.created_at,
            });
        }

        let removed: HashSet<String> = cr
            .attachment_changes
            .iter()
            .filter(|c| c.kind == AttachmentChangeKind::Removed)
            .map(|c| c.attachment_id.clone())
            .collect();
        cascade.ticket.attachment_ids.retain(|id| !removed.contains(id));
        for change in cr.attachment_changes.iter().filter(|c| c.kind == AttachmentChangeKind::Added) {
            if !cascade.ticket.attachment_ids.contains(&change.attachment_id) {
                cascade.ticket.attachment_ids.push(change.attachment_id.clone());
            }
        }

        cascade.ticket.form_values = cr.proposed_data.clone();
        let new_version = cascade.ticket.form_version + 1;
        cascade.ticket.form_version = new_version;
        cascade.ticket.form_versions.push(FormVersion {
            version: new_version,
            source: FormVersionSource::ChangeRequest,
            form_values: cr.proposed_data.clone(),
            attachment_ids: cascade.ticket.attachment_ids.clone(),
            recorded_by: Some(actor.user.clone()),
            recorded_at: Utc::now(),
        });

        cr.status = ChangeRequestStatus::Approved;
        cr.to_version = Some(new_version);
        cr.notes = notes;
        cr.decided_at = Some(Utc::now());
        cascade.updated_change_request = Some(cr);
        cascade.ticket.pending_change_request_id = None;

        cascade.audit(AuditEventType::ChangeRequestApproved, None, &actor.user, HashMap::new());
        let requester = cascade.ticket.requester.clone();
        cascade.notify(ticketflow_domain::NotificationTemplateKey::ChangeRequestApproved, vec![requester]);

        self.resume_workflow(&mut cascade, &actor.user);
        self.flush(cascade).await
    }

    /// Rejects the pending change request, leaving `form_values` untouched,
    /// then resumes the paused workflow (§4.8).
    pub async fn reject_change_request(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        notes: Option<String>,
        correlation_id: &str,
    ) -> Result<Ticket, EngineError> {
        self.decide_change_request_without_changes(
            actor,
            ticket_id,
            notes,
            ChangeRequestStatus::Rejected,
            AuditEventType::ChangeRequestRejected,
            ticketflow_domain::NotificationTemplateKey::ChangeRequestRejected,
            correlation_id,
            true,
        )
        .await
    }

    /// Cancels the requester's own pending change request, leaving
    /// `form_values` untouched, then resumes the paused workflow (§4.8).
    pub async fn cancel_change_request(&self, actor: &Actor, ticket_id: &TicketId, correlation_id: &str) -> Result<Ticket, EngineError> {
        self.decide_change_request_without_changes(
            actor,
            ticket_id,
            None,
            ChangeRequestStatus::Cancelled,
            AuditEventType::ChangeRequestCancelled,
            ticketflow_domain::NotificationTemplateKey::ChangeRequestCancelled,
            correlation_id,
            false,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn decide_change_request_without_changes(
        &self,
        actor: &Actor,
        ticket_id: &TicketId,
        notes: Option<String>,
        status: ChangeRequestStatus,
        event_type: AuditEventType,
        template: ticketflow_domain::NotificationTemplateKey,
        correlation_id: &str,
        require_approver: bool,
    ) -> Result<Ticket, EngineError> {
        let mut cascade = self.load(ticket_id).await?;
        cascade.correlation_id = correlation_id.to_string();

        let cr_id = cascade.ticket.pending_change_request_id.ok_or(EngineError::NoPendingChangeRequest)?;
        let mut cr = self
            .change_requests
            .find_by_id(&cr_id)
            .await
            .map_err(repo_err)?
            .ok_or(EngineError::NoPendingChangeRequest)?;
        if cr.status != ChangeRequestStatus::Pending {
            return Err(EngineError::NoPendingChangeRequest);
        }
        let authorized = if require_approver {
            actor.is_same_person(&cr.approver)
        } else {
            actor.is_same_person(&cr.requested_by)
        };
        if !authorized {
            return Err(EngineError::Forbidden);
        }

        cr.status = status;
        cr.notes = notes;
        cr.decided_at = Some(Utc::now());
        cascade.updated_change_request = Some(cr);
        cascade.ticket.pending_change_request_id = None;

        cascade.audit(event_type, None, &actor.user, HashMap::new());
        let requester = cascade.ticket.requester.clone();
        cascade.notify(template, vec![requester]);

        self.resume_workflow(&mut cascade, &actor.user);
        self.flush(cascade).await
    }

    fn pause_workflow(&self, cascade: &mut Cascade, actor: &UserRef) {
        let paused_idxs: Vec<usize> =
            cascade.steps.iter().enumerate().filter(|(_, s)| s.state.is_pausable()).map(|(i, _)| i).collect();

        let mut recipients = vec![cascade.ticket.requester.clone()];
        if let Some(m) = &cascade.ticket.manager_snapshot {
            recipients.push(m.clone());
        }

        for idx in paused_idxs {
            cascade.steps[idx].previous_state = Some(cascade.steps[idx].state);
            cascade.steps[idx].state = StepState::WaitingForCr;
            cascade.touch(idx);
            if let Some(a) = &cascade.steps[idx].assigned_to {
                recipients.push(a.clone());
            }
            recipients.extend(cascade.steps[idx].data.parallel_approvers_info.clone());
        }

        cascade.ticket.previous_status = Some(cascade.ticket.status);
        cascade.ticket.status = TicketStatus::WaitingForCr;

        cascade.audit(AuditEventType::ChangeRequestWorkflowPaused, None, actor, HashMap::new());
        cascade.notify(ticketflow_domain::NotificationTemplateKey::ChangeRequestWorkflowPaused, dedup_by_email(recipients));
    }

    fn resume_workflow(&self, cascade: &mut Cascade, actor: &UserRef) {
        let mut recipients = vec![cascade.ticket.requester.clone()];
        if let Some(m) = &cascade.ticket.manager_snapshot {
            recipients.push(m.clone());
        }

        let paused_idxs: Vec<usize> =
            cascade.steps.iter().enumerate().filter(|(_, s)| s.state == StepState::WaitingForCr).map(|(i, _)| i).collect();
        for idx in paused_idxs {
            if let Some(prev) = cascade.steps[idx].previous_state.take() {
                cascade.steps[idx].state = prev;
            }
            cascade.touch(idx);
            if let Some(a) = &cascade.steps[idx].assigned_to {
                recipients.push(a.clone());
            }
            recipients.extend(cascade.steps[idx].data.parallel_approvers_info.clone());
        }

        if let Some(prev) = cascade.ticket.previous_status.take() {
            cascade.ticket.status = prev;
        }

        cascade.audit(AuditEventType::ChangeRequestWorkflowResumed, None, actor, HashMap::new());
        cascade.notify(ticketflow_domain::NotificationTemplateKey::ChangeRequestWorkflowResumed, dedup_by_email(recipients));
    }

    // =========================================================================
    // Internal cascade machinery
    // =========================================================================

    async fn load(&self, ticket_id: &TicketId) -> Result<Cascade, EngineError> {
        let ticket = self
            .tickets
            .find_by_id(ticket_id)
            .await
            .map_err(repo_err)?
            .ok_or(EngineError::TicketNotFound)?;
        let steps = self.steps.find_by_ticket(ticket_id).await.map_err(repo_err)?;
        let version = self.definitions.get_by_id(&ticket.workflow_version_id).await?;

        Ok(Cascade {
            definition: version.definition,
            sub_definitions: HashMap::new(),
            ticket,
            ticket_is_new: false,
            steps,
            dirty: HashSet::new(),
            fresh: HashSet::new(),
            new_approval_tasks: vec![],
            new_change_request: None,
            updated_change_request: None,
            new_info_request: None,
            updated_info_request: None,
            new_assignment: None,
            updated_assignment: None,
            notifications: vec![],
            audit_events: vec![],
            correlation_id: String::new(),
        })
    }

    fn authorize(
        &self,
        cascade: &Cascade,
        idx: usize,
        actor: &Actor,
        action: Action,
        open_info_request: Option<&InfoRequest>,
    ) -> Result<(), EngineError> {
        let allowed = permission::can_act_on_step(
            actor,
            &cascade.ticket,
            &cascade.steps[idx],
            action,
            &cascade.steps,
            open_info_request,
        );
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Forbidden)
        }
    }

    /// Dispatches activation by step kind (§4.4). Boxed because it
    /// recurses into [`Self::advance`], which recurses back here (fork
    /// branches, auto-advancing `NOTIFY_STEP`s, sub-workflow start steps).
    fn activate<'a>(
        &'a self,
        cascade: &'a mut Cascade,
        step_id: &'a str,
        branch: Option<BranchIdentity>,
        is_start: bool,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let idx = cascade.step_idx(step_id)?;
            let definition = cascade.definition_for(&cascade.steps[idx]).clone();
            let step_def = definition
                .find_step(step_id)
                .ok_or_else(|| EngineError::StepDefNotFound(step_id.to_string()))?
                .clone();

            cascade.steps[idx].started_at = Some(Utc::now());
            if let Some(minutes) = step_def.due_minutes {
                cascade.steps[idx].due_at = Some(Utc::now() + Duration::minutes(minutes));
            }
            cascade.steps[idx].branch_identity = branch.clone();
            if branch.is_none() {
                cascade.ticket.current_step_id = Some(step_id.to_string());
            }

            match &step_def.kind {
                StepKind::FormStep(_) => {
                    cascade.steps[idx].state = StepState::Active;
                    cascade.steps[idx].assigned_to = Some(cascade.ticket.requester.clone());
                    cascade.touch(idx);
                    if !is_start {
                        let requester = cascade.ticket.requester.clone();
                        cascade.notify(ticketflow_domain::NotificationTemplateKey::FormPending, vec![requester]);
                    }
                }
                StepKind::ApprovalStep(approval) => {
                    let context = serde_json::to_value(&cascade.ticket.form_values).unwrap_or(Value::Null);
                    let completed: Vec<TicketStep> =
                        cascade.steps.iter().filter(|s| s.state == StepState::Completed).cloned().collect();
                    let resolved = resolver::resolve_approvers(
                        &approval.resolution,
                        approval.parallel.as_ref(),
                        &cascade.ticket,
                        &definition,
                        &completed,
                        &context,
                    )?;

                    cascade.steps[idx].state = StepState::WaitingForApproval;
                    cascade.steps[idx].assigned_to = Some(resolved.primary.clone());
                    cascade.steps[idx].data.primary_approver_email = Some(resolved.primary.email.clone());
                    if approval.parallel.is_some() {
                        cascade.steps[idx].data.parallel_pending_approvers = resolved.parallel.clone();
                        cascade.steps[idx].data.parallel_completed_approvers = vec![];
                        cascade.steps[idx].data.parallel_approvers_info = resolved.parallel.clone();
                    }
                    cascade.touch(idx);

                    let ticket_step_id = cascade.steps[idx].ticket_step_id;
                    for approver in &resolved.parallel {
                        cascade.new_approval_tasks.push(ApprovalTask {
                            approval_task_id: ApprovalTaskId::new(),
                            ticket_step_id,
                            approver: approver.clone(),
                            decision: ApprovalDecision::Pending,
                            comment: None,
                            decided_at: None,
                            version: 0,
                        });
                        cascade.audit(
                            AuditEventType::StepActivated,
                            Some(ticket_step_id),
                            approver,
                            HashMap::from([("role".to_string(), Value::String("approver".to_string()))]),
                        );
                    }
                    let mut recipients = resolved.parallel.clone();
                    recipients.extend(resolved.notify_also.clone());
                    cascade.notify(ticketflow_domain::NotificationTemplateKey::ApprovalPending, recipients);
                }
                StepKind::TaskStep(task) => {
                    cascade.steps[idx].state = StepState::Active;
                    cascade.steps[idx].assigned_to = None;
                    cascade.steps[idx].data.instructions = Some(task.instructions.clone());
                    if let Some(link) = &task.linked_section {
                        cascade.steps[idx].data.linked_rows = populate_linked_rows(&definition, &cascade.ticket, link);
                    }
                    cascade.touch(idx);
                }
                StepKind::NotifyStep(notify) => {
                    let has_running_branch = cascade.ticket.active_branches.iter().any(|b| !b.state.is_terminal());
                    if step_def.is_terminal && cascade.ticket.join_proceeded && has_running_branch {
                        cascade.ticket.pending_end_step_id = Some(step_id.to_string());
                        return Ok(());
                    }
                    let recipients = resolve_notify_recipients(&cascade.steps, &cascade.ticket, &branch, &notify.recipients);
                    cascade.notify(notify.template_key, recipients);
                    cascade.steps[idx].state = StepState::Completed;
                    cascade.steps[idx].completed_at = Some(Utc::now());
                    cascade.touch(idx);
                    self.advance(cascade, step_id, TransitionEvent::StepCompleted, &Value::Null).await?;
                }
                StepKind::ForkStep(fork) => {
                    cascade.steps[idx].state = StepState::Completed;
                    cascade.steps[idx].completed_at = Some(Utc::now());
                    cascade.touch(idx);
                    let fork_id = step_id.to_string();
                    let fork_ticket_step_id = cascade.steps[idx].ticket_step_id;
                    for branch_def in fork.branches.clone() {
                        cascade.ticket.active_branches.push(BranchState {
                            parent_fork_step_id: fork_id.clone(),
                            branch_id: branch_def.branch_id.clone(),
                            branch_name: branch_def.branch_name.clone(),
                            state: BranchExecutionState::Active,
                            current_step_id: branch_def.start_step_id.clone(),
                        });
                        let identity = BranchIdentity {
                            branch_id: branch_def.branch_id.clone(),
                            branch_name: branch_def.branch_name.clone(),
                            parent_fork_step_id: fork_id.clone(),
                        };
                        self.activate(cascade, &branch_def.start_step_id, Some(identity), false).await?;
                    }
                    let requester = cascade.ticket.requester.clone();
                    cascade.audit(AuditEventType::ForkActivated, Some(fork_ticket_step_id), &requester, HashMap::new());
                }
                StepKind::JoinStep(_) => {
                    cascade.steps[idx].state = StepState::WaitingForBranches;
                    cascade.touch(idx);
                    let requester = cascade.ticket.requester.clone();
                    cascade.audit(AuditEventType::JoinWaiting, Some(cascade.steps[idx].ticket_step_id), &requester, HashMap::new());
                    self.reevaluate_join(cascade, step_id).await?;
                }
                StepKind::SubWorkflowStep(sub) => {
                    cascade.steps[idx].state = StepState::Active;
                    cascade.touch(idx);
                    let parent_ticket_step_id = cascade.steps[idx].ticket_step_id;
                    let sub_version = self.definitions.get_version(&sub.workflow_template_id, sub.version_number).await?;
                    let branch_identities = compute_branch_identities(&sub_version.definition);
                    for sub_step_def in &sub_version.definition.steps {
                        let mut materialized = materialize_step(
                            &cascade.ticket,
                            sub_step_def,
                            branch_identities.get(&sub_step_def.step_id).cloned().or_else(|| branch.clone()),
                        );
                        materialized.sub_workflow_identity = Some(SubWorkflowIdentity {
                            parent_sub_workflow_step_id: parent_ticket_step_id,
                            from_workflow_template_id: sub.workflow_template_id,
                            from_workflow_name: String::new(),
                        });
                        cascade.push_step(materialized);
                    }
                    cascade.sub_definitions.insert(parent_ticket_step_id, sub_version.definition.clone());
                    let requester = cascade.ticket.requester.clone();
                    cascade.audit(AuditEventType::SubWorkflowStarted, Some(parent_ticket_step_id), &requester, HashMap::new());

                    let start = find_start_step(&sub_version.definition).ok_or(EngineError::NoStartStep)?.clone();
                    self.activate(cascade, &start, branch, false).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Resolves `(from_step_id, event)` and either activates the next
    /// step, folds branch completion into the parent fork's join, or (no
    /// matching transition from a terminal step) completes the ticket.
    fn advance<'a>(
        &'a self,
        cascade: &'a mut Cascade,
        from_step_id: &'a str,
        event: TransitionEvent,
        context: &'a Value,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let idx = cascade.step_idx(from_step_id)?;
            let definition = cascade.definition_for(&cascade.steps[idx]).clone();
            let branch_identity = cascade.steps[idx].branch_identity.clone();

            let next_step_id = match resolve_transition(&definition, from_step_id, event, context) {
                Ok(t) => t.to_step_id.clone(),
                Err(err) => {
                    let step_def = definition.find_step(from_step_id);
                    if step_def.is_some_and(|s| s.is_terminal) {
                        if let Some(identity) = &branch_identity {
                            self.settle_branch(cascade, identity, branch_outcome_for_event(event)).await?;
                        } else if let Some(sub) = cascade.steps[idx].sub_workflow_identity.clone() {
                            self.complete_sub_workflow(cascade, sub.parent_sub_workflow_step_id, event).await?;
                        } else {
                            self.complete_ticket(cascade);
                        }
                        return Ok(());
                    }
                    return Err(err.into());
                }
            };

            if let Some(identity) = &branch_identity {
                let next_is_join = matches!(definition.find_step(&next_step_id).map(|s| &s.kind), Some(StepKind::JoinStep(_)));
                let same_branch = cascade
                    .steps
                    .iter()
                    .find(|s| s.step_id == next_step_id)
                    .and_then(|s| s.branch_identity.as_ref())
                    .is_some_and(|b| b.branch_id == identity.branch_id);
                if next_is_join || !same_branch {
                    self.settle_branch(cascade, identity, BranchExecutionState::Completed).await?;
                    if next_is_join {
                        self.reevaluate_join(cascade, &next_step_id).await?;
                    }
                    return Ok(());
                }
            }

            self.activate(cascade, &next_step_id, branch_identity, false).await
        }
        .boxed()
    }

    fn settle_branch<'a>(
        &'a self,
        cascade: &'a mut Cascade,
        identity: &'a BranchIdentity,
        state: BranchExecutionState,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            if let Some(branch) = cascade
                .ticket
                .active_branches
                .iter_mut()
                .find(|b| b.branch_id == identity.branch_id && b.parent_fork_step_id == identity.parent_fork_step_id)
            {
                branch.state = state;
            }

            if state.is_failed() && !cascade.ticket.status.is_terminal() {
                let definition = cascade
                    .steps
                    .iter()
                    .find(|s| s.branch_identity.as_ref().is_some_and(|b| b.parent_fork_step_id == identity.parent_fork_step_id))
                    .map(|s| cascade.definition_for(s).clone())
                    .unwrap_or_else(|| cascade.definition.clone());
                let fork_def = definition.find_step(&identity.parent_fork_step_id);
                if let Some(StepKind::ForkStep(fork)) = fork_def.map(|s| &s.kind) {
                    match fork.failure_policy {
                        BranchFailurePolicy::FailAll => {
                            let requester = cascade.ticket.requester.clone();
                            self.reject_ticket(cascade, &requester);
                            return Ok(());
                        }
                        BranchFailurePolicy::ContinueOthers => {
                            // Only this branch's own remaining non-terminal steps are
                            // cancelled; siblings proceed and the join's proceed
                            // threshold (computed elsewhere) governs advancement.
                            self.cancel_non_terminal_steps(cascade, Some(&identity.branch_id));
                        }
                        BranchFailurePolicy::CancelOthers => {
                            let siblings: Vec<String> = cascade
                                .ticket
                                .branches_for_fork(&identity.parent_fork_step_id)
                                .iter()
                                .map(|b| b.branch_id.clone())
                                .filter(|id| id != &identity.branch_id)
                                .collect();
                            for sibling in &siblings {
                                self.cancel_non_terminal_steps(cascade, Some(sibling));
                            }
                            for branch in cascade.ticket.active_branches.iter_mut() {
                                if branch.parent_fork_step_id == identity.parent_fork_step_id
                                    && branch.branch_id != identity.branch_id
                                    && !branch.state.is_terminal()
                                {
                                    branch.state = BranchExecutionState::Cancelled;
                                }
                            }
                            let requester = cascade.ticket.requester.clone();
                            self.reject_ticket(cascade, &requester);
                            return Ok(());
                        }
                    }
                }
            }

            if let Some(pending) = cascade.ticket.pending_end_step_id.clone() {
                let all_terminal = cascade.ticket.active_branches.iter().all(|b| b.state.is_terminal());
                if all_terminal {
                    self.cancel_non_terminal_steps(cascade, None);
                    cascade.ticket.pending_end_step_id = None;
                    self.activate(cascade, &pending, None, false).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn reevaluate_join<'a>(&'a self, cascade: &'a mut Cascade, join_step_id: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            if cascade.ticket.status.is_terminal() {
                return Ok(());
            }
            let idx = cascade.step_idx(join_step_id)?;
            let definition = cascade.definition_for(&cascade.steps[idx]).clone();
            let join_def = definition
                .find_step(join_step_id)
                .ok_or_else(|| EngineError::StepDefNotFound(join_step_id.to_string()))?
                .clone();
            let StepKind::JoinStep(join) = &join_def.kind else {
                return Err(EngineError::WrongStepKind(join_step_id.to_string(), StepType::JoinStep));
            };
            let fork_def = definition
                .find_step(&join.source_fork_step_id)
                .ok_or_else(|| EngineError::StepDefNotFound(join.source_fork_step_id.clone()))?
                .clone();
            let StepKind::ForkStep(fork) = &fork_def.kind else {
                return Err(EngineError::WrongStepKind(join.source_fork_step_id.clone(), StepType::ForkStep));
            };

            let branches = cascade.ticket.branches_for_fork(&join.source_fork_step_id);
            let total = branches.len();
            let completed = branches.iter().filter(|b| b.state == BranchExecutionState::Completed).count();
            let failed = branches.iter().filter(|b| b.state.is_failed()).count();

            // A FAIL_ALL failure rejects the ticket the moment the branch settles
            // (see `settle_branch`), so by the time a join is reevaluated `failed`
            // is already 0 under that policy; `join_should_proceed` still checks
            // it defensively.
            if !join_should_proceed(fork.failure_policy, join.join_mode, completed, failed, total) {
                return Ok(());
            }

            if join.join_mode != ForkJoinMode::All {
                cascade.ticket.join_proceeded = true;
            }

            cascade.steps[idx].state = StepState::Completed;
            cascade.steps[idx].completed_at = Some(Utc::now());
            cascade.touch(idx);
            let ticket_step_id = cascade.steps[idx].ticket_step_id;
            let requester = cascade.ticket.requester.clone();
            cascade.audit(AuditEventType::JoinCompleted, Some(ticket_step_id), &requester, HashMap::new());

            self.advance(cascade, join_step_id, TransitionEvent::JoinComplete, &Value::Null).await
        }
        .boxed()
    }

    /// Bubbles a sub-workflow's outcome to its `SUB_WORKFLOW_STEP` in the
    /// parent workflow: cancels whatever of the child's steps are still
    /// open, completes the parent step, and advances it with
    /// `SubWorkflowCompleted`/`SubWorkflowFailed` (§4.7).
    fn complete_sub_workflow<'a>(
        &'a self,
        cascade: &'a mut Cascade,
        parent_ticket_step_id: TicketStepId,
        event: TransitionEvent,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let failed = matches!(event, TransitionEvent::Reject | TransitionEvent::Skip | TransitionEvent::SkipStep);

            let sibling_idxs: Vec<usize> = cascade
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| {
                    !s.state.is_terminal()
                        && s.sub_workflow_identity
                            .as_ref()
                            .is_some_and(|id| id.parent_sub_workflow_step_id == parent_ticket_step_id)
                })
                .map(|(i, _)| i)
                .collect();
            for idx in sibling_idxs {
                cascade.steps[idx].state = StepState::Cancelled;
                cascade.steps[idx].completed_at = Some(Utc::now());
                cascade.touch(idx);
            }

            let parent_idx = cascade
                .steps
                .iter()
                .position(|s| s.ticket_step_id == parent_ticket_step_id)
                .ok_or_else(|| EngineError::StepNotFound(parent_ticket_step_id.to_string()))?;
            cascade.steps[parent_idx].state = StepState::Completed;
            cascade.steps[parent_idx].completed_at = Some(Utc::now());
            cascade.touch(parent_idx);
            let parent_step_id = cascade.steps[parent_idx].step_id.clone();

            let requester = cascade.ticket.requester.clone();
            let event_type = if failed { AuditEventType::SubWorkflowFailed } else { AuditEventType::SubWorkflowCompleted };
            cascade.audit(event_type, Some(parent_ticket_step_id), &requester, HashMap::new());

            let transition_event = if failed { TransitionEvent::SubWorkflowFailed } else { TransitionEvent::SubWorkflowCompleted };
            self.advance(cascade, &parent_step_id, transition_event, &Value::Null).await
        }
        .boxed()
    }

    fn cancel_non_terminal_steps(&self, cascade: &mut Cascade, branch_id: Option<&str>) {
        let matches: Vec<usize> = cascade
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.state.is_terminal())
            .filter(|(_, s)| match branch_id {
                Some(id) => s.branch_identity.as_ref().is_some_and(|b| b.branch_id == id),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();
        for idx in matches {
            cascade.steps[idx].state = StepState::Cancelled;
            cascade.steps[idx].completed_at = Some(Utc::now());
            cascade.touch(idx);
        }
    }

    fn reject_ticket(&self, cascade: &mut Cascade, actor: &UserRef) {
        self.terminate_ticket(cascade, actor, TicketStatus::Rejected, AuditEventType::Reject);
    }

    fn skip_ticket(&self, cascade: &mut Cascade, actor: &UserRef) {
        self.terminate_ticket(cascade, actor, TicketStatus::Skipped, AuditEventType::Skip);
    }

    fn terminate_ticket(&self, cascade: &mut Cascade, actor: &UserRef, status: TicketStatus, event_type: AuditEventType) {
        cascade.ticket.status = status;
        cascade.ticket.completed_at = Some(Utc::now());

        let notify_steps: Vec<usize> = cascade
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.state.is_terminal() && s.step_type == StepType::NotifyStep)
            .map(|(i, _)| i)
            .collect();
        for idx in notify_steps {
            let step_id = cascade.steps[idx].step_id.clone();
            let definition = cascade.definition_for(&cascade.steps[idx]).clone();
            if let Some(StepKind::NotifyStep(notify)) = definition.find_step(&step_id).map(|s| &s.kind) {
                let branch = cascade.steps[idx].branch_identity.clone();
                let recipients = resolve_notify_recipients(&cascade.steps, &cascade.ticket, &branch, &notify.recipients);
                cascade.notify(notify.template_key, recipients);
            }
            cascade.steps[idx].state = StepState::Completed;
            cascade.steps[idx].completed_at = Some(Utc::now());
            cascade.touch(idx);
        }

        self.cancel_non_terminal_steps(cascade, None);
        cascade.audit(event_type, None, actor, HashMap::new());
    }

    fn complete_ticket(&self, cascade: &mut Cascade) {
        cascade.ticket.status = TicketStatus::Completed;
        cascade.ticket.completed_at = Some(Utc::now());
        let requester = cascade.ticket.requester.clone();
        cascade.audit(AuditEventType::TicketCompleted, None, &requester, HashMap::new());
    }

    // =========================================================================
    // Flush
    // =========================================================================

    async fn flush(&self, cascade: Cascade) -> Result<Ticket, EngineError> {
        let Cascade {
            ticket,
            ticket_is_new,
            steps,
            dirty,
            fresh,
            new_approval_tasks,
            notifications,
            audit_events,
            new_change_request,
            updated_change_request,
            new_info_request,
            updated_info_request,
            new_assignment,
            updated_assignment,
            ..
        } = cascade;

        let ticket = if ticket_is_new {
            self.tickets.create(ticket).await.map_err(repo_err)?
        } else {
            self.retry_update_ticket(ticket).await?
        };

        for step in steps {
            if !dirty.contains(&step.ticket_step_id) {
                continue;
            }
            if fresh.contains(&step.ticket_step_id) {
                self.steps.create(step).await.map_err(repo_err)?;
            } else {
                self.retry_update_step(step).await?;
            }
        }

        for task in new_approval_tasks {
            if task.version == 0 && task.decided_at.is_none() {
                self.approval_tasks.create(task).await.map_err(repo_err)?;
            } else {
                self.approval_tasks.update(&task, task.version).await.map_err(repo_err)?;
            }
        }

        for entry in notifications {
            self.outbox.create(entry).await.map_err(repo_err)?;
        }

        for event in &audit_events {
            self.audit.record_best_effort(event).await;
        }

        if let Some(cr) = new_change_request {
            self.change_requests.create(cr).await.map_err(repo_err)?;
        }
        if let Some(cr) = updated_change_request {
            let expected = cr.version;
            self.change_requests.update(&cr, expected).await.map_err(repo_err)?;
        }
        if let Some(ir) = new_info_request {
            self.info_requests.create(ir).await.map_err(repo_err)?;
        }
        if let Some(ir) = updated_info_request {
            let expected = ir.version;
            self.info_requests.update(&ir, expected).await.map_err(repo_err)?;
        }
        if let Some(a) = new_assignment {
            self.assignments.create(a).await.map_err(repo_err)?;
        }
        if let Some(a) = updated_assignment {
            let expected = a.version;
            self.assignments.update(&a, expected).await.map_err(repo_err)?;
        }

        Ok(ticket)
    }

    async fn retry_update_ticket(&self, mut ticket: Ticket) -> Result<Ticket, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let expected = ticket.version;
            match self.tickets.update(&ticket, expected).await {
                Ok(updated) => return Ok(updated),
                Err(_) if attempt < MAX_CONCURRENCY_RETRIES => {
                    if let Some(latest) = self.tickets.find_by_id(&ticket.ticket_id).await.map_err(repo_err)? {
                        ticket.version = latest.version;
                    }
                }
                Err(_) => return Err(EngineError::ConcurrencyExhausted(MAX_CONCURRENCY_RETRIES)),
            }
        }
    }

    async fn retry_update_step(&self, mut step: TicketStep) -> Result<TicketStep, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let expected = step.version;
            match self.steps.update(&step, expected).await {
                Ok(updated) => return Ok(updated),
                Err(_) if attempt < MAX_CONCURRENCY_RETRIES => {
                    if let Some(latest) = self.steps.find_by_id(&step.ticket_step_id).await.map_err(repo_err)? {
                        step.version = latest.version;
                    }
                }
                Err(_) => return Err(EngineError::ConcurrencyExhausted(MAX_CONCURRENCY_RETRIES)),
            }
        }
    }
}

/// A branch reaching a terminal step without an explicit join counts as
/// that branch's own completion unless the event that got it there was
/// a rejection or skip, in which case the branch is failed (§4.5).
fn branch_outcome_for_event(event: TransitionEvent) -> BranchExecutionState {
    match event {
        TransitionEvent::Reject => BranchExecutionState::Rejected,
        TransitionEvent::Skip | TransitionEvent::SkipStep => BranchExecutionState::Skipped,
        _ => BranchExecutionState::Completed,
    }
}

fn join_should_proceed(
    failure_policy: BranchFailurePolicy,
    join_mode: ForkJoinMode,
    completed: usize,
    failed: usize,
    total: usize,
) -> bool {
    if failure_policy == BranchFailurePolicy::FailAll && failed >= 1 {
        return false;
    }
    let terminal = completed + failed;
    let non_failed = total - failed;
    match join_mode {
        ForkJoinMode::All => completed == non_failed,
        ForkJoinMode::Any => {
            if failure_policy == BranchFailurePolicy::ContinueOthers {
                terminal >= 1
            } else {
                completed >= 1
            }
        }
        ForkJoinMode::Majority => {
            if failure_policy == BranchFailurePolicy::ContinueOthers {
                terminal * 2 > total
            } else {
                completed * 2 > non_failed
            }
        }
    }
}

fn find_start_step(definition: &WorkflowDefinition) -> Option<&StepDefId> {
    let targets: HashSet<&StepDefId> = definition.transitions.iter().map(|t| &t.to_step_id).collect();
    definition.steps.iter().map(|s| &s.step_id).find(|id| !targets.contains(id))
}

fn compute_branch_identities(definition: &WorkflowDefinition) -> HashMap<StepDefId, BranchIdentity> {
    let mut identities = HashMap::new();
    for step in &definition.steps {
        let StepKind::ForkStep(fork) = &step.kind else { continue };
        for branch in &fork.branches {
            walk_branch(definition, &step.step_id, branch, &mut identities);
        }
    }
    identities
}

fn walk_branch(definition: &WorkflowDefinition, fork_step_id: &str, branch: &BranchDef, identities: &mut HashMap<StepDefId, BranchIdentity>) {
    let mut frontier = vec![branch.start_step_id.clone()];
    let mut visited: HashSet<StepDefId> = HashSet::new();
    while let Some(step_id) = frontier.pop() {
        if !visited.insert(step_id.clone()) {
            continue;
        }
        let Some(step_def) = definition.find_step(&step_id) else { continue };
        if matches!(step_def.kind, StepKind::JoinStep(_)) {
            continue;
        }
        identities.entry(step_id.clone()).or_insert_with(|| BranchIdentity {
            branch_id: branch.branch_id.clone(),
            branch_name: branch.branch_name.clone(),
            parent_fork_step_id: fork_step_id.to_string(),
        });
        for t in definition.transitions.iter().filter(|t| t.from_step_id == step_id) {
            frontier.push(t.to_step_id.clone());
        }
    }
}

fn materialize_step(ticket: &Ticket, step_def: &StepDefinition, branch_identity: Option<BranchIdentity>) -> TicketStep {
    let step_type = match &step_def.kind {
        StepKind::FormStep(_) => StepType::FormStep,
        StepKind::ApprovalStep(_) => StepType::ApprovalStep,
        StepKind::TaskStep(_) => StepType::TaskStep,
        StepKind::NotifyStep(_) => StepType::NotifyStep,
        StepKind::ForkStep(_) => StepType::ForkStep,
        StepKind::JoinStep(_) => StepType::JoinStep,
        StepKind::SubWorkflowStep(_) => StepType::SubWorkflowStep,
    };
    TicketStep {
        ticket_step_id: TicketStepId::new(),
        ticket_id: ticket.ticket_id,
        step_id: step_def.step_id.clone(),
        step_name: step_def.step_name.clone(),
        step_type,
        state: StepState::NotStarted,
        assigned_to: None,
        data: ticketflow_domain::StepData::default(),
        started_at: None,
        due_at: None,
        completed_at: None,
        previous_state: None,
        branch_identity,
        sub_workflow_identity: None,
        version: 0,
    }
}

fn populate_linked_rows(
    definition: &WorkflowDefinition,
    ticket: &Ticket,
    link: &ticketflow_domain::LinkedSectionRef,
) -> Vec<ticketflow_domain::LinkedRow> {
    let Some(source_def) = definition.find_step(&link.source_step_id) else { return vec![] };
    let StepKind::FormStep(form) = &source_def.kind else { return vec![] };
    let Some(section) = form.sections.iter().find(|s| s.section_id == link.source_section_id) else { return vec![] };
    let Some(Value::Array(rows)) = ticket.form_values.get(&link.source_section_id) else { return vec![] };

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let mut context = HashMap::new();
            if let Value::Object(obj) = row {
                for field in &section.fields {
                    if let Some(value) = obj.get(&field.field_key) {
                        context.insert(
                            field.field_key.clone(),
                            ticketflow_domain::LinkedFieldValue { value: value.clone(), label: field.label.clone() },
                        );
                    }
                }
            }
            ticketflow_domain::LinkedRow { source_row_index: i, context, output_values: HashMap::new() }
        })
        .collect()
}

fn resolve_notify_recipients(
    steps: &[TicketStep],
    ticket: &Ticket,
    branch: &Option<BranchIdentity>,
    declared: &[NotifyRecipient],
) -> Vec<UserRef> {
    let scope = |s: &&TicketStep| match branch {
        Some(b) => s.branch_identity.as_ref().is_some_and(|sb| sb.branch_id == b.branch_id),
        None => true,
    };
    let mut out = vec![];
    for recipient in declared {
        match recipient {
            NotifyRecipient::Requester => out.push(ticket.requester.clone()),
            NotifyRecipient::AssignedAgent => {
                if let Some(last) = steps
                    .iter()
                    .filter(scope)
                    .filter(|s| s.step_type == StepType::TaskStep && s.assigned_to.is_some())
                    .max_by_key(|s| s.completed_at.or(s.started_at))
                {
                    if let Some(a) = &last.assigned_to {
                        out.push(a.clone());
                    }
                }
            }
            NotifyRecipient::Approvers => {
                if let Some(last) = steps
                    .iter()
                    .filter(scope)
                    .filter(|s| s.step_type == StepType::ApprovalStep)
                    .max_by_key(|s| s.completed_at.or(s.started_at))
                {
                    if last.data.parallel_approvers_info.is_empty() {
                        if let Some(a) = &last.assigned_to {
                            out.push(a.clone());
                        }
                    } else {
                        out.extend(last.data.parallel_approvers_info.clone());
                    }
                }
            }
        }
    }
    dedup_by_email(out)
}

fn dedup_by_email(users: Vec<UserRef>) -> Vec<UserRef> {
    let mut seen = HashSet::new();
    users.into_iter().filter(|u| seen.insert(u.email.to_ascii_lowercase())).collect()
}

/// The step a form field belongs to, for decorating a [`FieldChange`].
fn locate_field(definition: &WorkflowDefinition, field_key: &str) -> Option<(String, String, String)> {
    for step in &definition.steps {
        if let StepKind::FormStep(form) = &step.kind {
            for section in &form.sections {
                if let Some(field) = section.fields.iter().find(|f| f.field_key == field_key) {
                    return Some((step.step_id.clone(), step.step_name.clone(), field.label.clone()));
                }
            }
        }
    }
    None
}

/// Diffs `current` against `proposed`, decorating each differing key with
/// the form step/section it belongs to (§4.8).
fn compute_field_changes(
    definition: &WorkflowDefinition,
    current: &HashMap<String, Value>,
    proposed: &HashMap<String, Value>,
) -> Vec<FieldChange> {
    let mut keys: Vec<&String> = current.keys().chain(proposed.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut changes = Vec::new();
    for key in keys {
        let old_value = current.get(key).cloned();
        let new_value = proposed.get(key).cloned();
        if old_value == new_value {
            continue;
        }
        let kind = match (&old_value, &new_value) {
            (None, Some(_)) => FieldChangeKind::Added,
            (Some(_), None) => FieldChangeKind::Removed,
            _ => FieldChangeKind::Modified,
        };
        let (step_id, step_name, field_label) =
            locate_field(definition, key).unwrap_or_else(|| (String::new(), String::new(), key.clone()));
        changes.push(FieldChange { step_id, step_name, field_key: key.clone(), field_label, kind, old_value, new_value });
    }
    changes
}

/// Diffs the attachment id set, reusing `proposed`'s ids as the
/// `original_filename` carrier only when the caller has already resolved
/// them; this engine records ids alone (§4.8).
fn compute_attachment_changes(current: &[String], proposed: &[String]) -> Vec<AttachmentChange> {
    let current_set: HashSet<&String> = current.iter().collect();
    let proposed_set: HashSet<&String> = proposed.iter().collect();

    let mut changes = Vec::new();
    for id in proposed {
        if !current_set.contains(id) {
            changes.push(AttachmentChange { attachment_id: id.clone(), kind: AttachmentChangeKind::Added, original_filename: None });
        }
    }
    for id in current {
        if !proposed_set.contains(id) {
            changes.push(AttachmentChange { attachment_id: id.clone(), kind: AttachmentChangeKind::Removed, original_filename: None });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_all_requires_every_non_failed_branch_complete() {
        assert!(join_should_proceed(BranchFailurePolicy::ContinueOthers, ForkJoinMode::All, 2, 0, 2));
        assert!(!join_should_proceed(BranchFailurePolicy::ContinueOthers, ForkJoinMode::All, 1, 0, 2));
        assert!(join_should_proceed(BranchFailurePolicy::ContinueOthers, ForkJoinMode::All, 1, 1, 2));
    }

    #[test]
    fn join_any_distinguishes_continue_others_from_cancel_others() {
        assert!(join_should_proceed(BranchFailurePolicy::ContinueOthers, ForkJoinMode::Any, 0, 1, 2));
        assert!(!join_should_proceed(BranchFailurePolicy::CancelOthers, ForkJoinMode::Any, 0, 1, 2));
        assert!(join_should_proceed(BranchFailurePolicy::CancelOthers, ForkJoinMode::Any, 1, 0, 2));
    }

    #[test]
    fn join_majority_uses_terminal_for_continue_others_and_completed_otherwise() {
        assert!(join_should_proceed(BranchFailurePolicy::ContinueOthers, ForkJoinMode::Majority, 1, 1, 3));
        assert!(!join_should_proceed(BranchFailurePolicy::CancelOthers, ForkJoinMode::Majority, 1, 1, 3));
        assert!(join_should_proceed(BranchFailurePolicy::CancelOthers, ForkJoinMode::Majority, 2, 0, 3));
    }

    #[test]
    fn fail_all_blocks_the_join_once_any_branch_has_failed() {
        assert!(!join_should_proceed(BranchFailurePolicy::FailAll, ForkJoinMode::All, 1, 1, 2));
        assert!(!join_should_proceed(BranchFailurePolicy::FailAll, ForkJoinMode::Any, 1, 1, 2));
    }

    #[test]
    fn start_step_is_the_one_no_transition_targets() {
        let def = WorkflowDefinition {
            steps: vec![
                StepDefinition {
                    step_id: "F1".into(),
                    step_name: "Start".into(),
                    is_terminal: false,
                    due_minutes: None,
                    kind: StepKind::FormStep(ticketflow_domain::FormStepDef { sections: vec![] }),
                },
                StepDefinition {
                    step_id: "A1".into(),
                    step_name: "Approve".into(),
                    is_terminal: true,
                    due_minutes: None,
                    kind: StepKind::FormStep(ticketflow_domain::FormStepDef { sections: vec![] }),
                },
            ],
            transitions: vec![ticketflow_domain::Transition {
                from_step_id: "F1".into(),
                on_event: TransitionEvent::SubmitForm,
                to_step_id: "A1".into(),
                condition: None,
                priority: 0,
            }],
            lookup_tables: HashMap::new(),
        };
        assert_eq!(find_start_step(&def), Some(&"F1".to_string()));
    }

    #[test]
    fn branch_identities_stop_before_the_join() {
        use ticketflow_domain::{ForkStepDef, JoinStepDef};
        let def = WorkflowDefinition {
            steps: vec![
                StepDefinition {
                    step_id: "X1".into(),
                    step_name: "Fork".into(),
                    is_terminal: false,
                    due_minutes: None,
                    kind: StepKind::ForkStep(ForkStepDef {
                        branches: vec![BranchDef { branch_id: "b1".into(), branch_name: "B1".into(), start_step_id: "S1".into() }],
                        failure_policy: BranchFailurePolicy::ContinueOthers,
                    }),
                },
                StepDefinition {
                    step_id: "S1".into(),
                    step_name: "Branch step".into(),
                    is_terminal: false,
                    due_minutes: None,
                    kind: StepKind::TaskStep(ticketflow_domain::TaskStepDef { instructions: "do it".into(), output_fields: vec![], linked_section: None }),
                },
                StepDefinition {
                    step_id: "J1".into(),
                    step_name: "Join".into(),
                    is_terminal: false,
                    due_minutes: None,
                    kind: StepKind::JoinStep(JoinStepDef { source_fork_step_id: "X1".into(), join_mode: ForkJoinMode::All }),
                },
            ],
            transitions: vec![ticketflow_domain::Transition {
                from_step_id: "S1".into(),
                on_event: TransitionEvent::CompleteTask,
                to_step_id: "J1".into(),
                condition: None,
                priority: 0,
            }],
            lookup_tables: HashMap::new(),
        };
        let identities = compute_branch_identities(&def);
        assert!(identities.contains_key("S1"));
        assert!(!identities.contains_key("J1"));
    }
}
