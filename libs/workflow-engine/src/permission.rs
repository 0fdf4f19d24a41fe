//! The permission guard (§4.3): the one place every mutating ticket
//! operation is checked before anything is written. A pure function of
//! the actor, the ticket, the step, and (for info-request responses) the
//! step's open info request — no database access of its own.
//!
//! Identity checks always go through [`UserRef::is_same_person`]; this
//! module never re-derives its own notion of "same user".

use ticketflow_domain::{Actor, InfoRequest, InfoRequestStatus, StepState, StepType, Ticket, TicketStatus, TicketStep};

/// An action an actor might attempt against a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SubmitForm,
    Approve,
    Reject,
    RequestInfo,
    RespondInfo,
    CompleteTask,
    AddNote,
    Assign,
    Reassign,
}

/// Can `actor` perform `action` on `step`?
///
/// `all_steps` is every step materialized for `ticket` so far, used to
/// look up a preceding completed approval step for task assignment and
/// oversight notes. `open_info_request` is the step's currently `OPEN`
/// info request, if any — pass `None` when there isn't one.
#[must_use]
pub fn can_act_on_step(
    actor: &Actor,
    ticket: &Ticket,
    step: &TicketStep,
    action: Action,
    all_steps: &[TicketStep],
    open_info_request: Option<&InfoRequest>,
) -> bool {
    if ticket.status.is_terminal() {
        return false;
    }

    if ticket.status == TicketStatus::WaitingForCr || step.state == StepState::WaitingForCr {
        return action == Action::AddNote && can_add_note_during_cr(actor, ticket, step);
    }

    if step.state.is_terminal() {
        return false;
    }

    match step.step_type {
        StepType::FormStep => can_act_form_step(actor, ticket, step, action),
        StepType::ApprovalStep => {
            can_act_approval_step(actor, ticket, step, action, open_info_request)
        }
        StepType::TaskStep => {
            can_act_task_step(actor, ticket, step, action, all_steps, open_info_request)
        }
        StepType::NotifyStep | StepType::ForkStep | StepType::JoinStep | StepType::SubWorkflowStep => false,
    }
}

fn can_add_note_during_cr(actor: &Actor, ticket: &Ticket, step: &TicketStep) -> bool {
    if actor.is_same_person(&ticket.requester) {
        return true;
    }
    if ticket.manager_snapshot.as_ref().is_some_and(|m| actor.is_same_person(m)) {
        return true;
    }
    if step.assigned_to.as_ref().is_some_and(|a| actor.is_same_person(a)) {
        return true;
    }
    step.step_type == StepType::ApprovalStep && is_parallel_pending(actor, step)
}

fn can_act_form_step(actor: &Actor, ticket: &Ticket, step: &TicketStep, action: Action) -> bool {
    action == Action::SubmitForm
        && actor.is_same_person(&ticket.requester)
        && step.state == StepState::Active
}

fn is_parallel_pending(actor: &Actor, step: &TicketStep) -> bool {
    step.data
        .parallel_pending_approvers
        .iter()
        .any(|u| actor.is_same_person(u))
}

fn is_info_request_target(actor: &Actor, open_info_request: Option<&InfoRequest>) -> bool {
    open_info_request.is_some_and(|ir| {
        ir.status == InfoRequestStatus::Open && actor.is_same_person(&ir.recipient)
    })
}

fn can_act_approval_step(
    actor: &Actor,
    ticket: &Ticket,
    step: &TicketStep,
    action: Action,
    open_info_request: Option<&InfoRequest>,
) -> bool {
    let is_assigned_approver = step.assigned_to.as_ref().is_some_and(|a| actor.is_same_person(a));
    let is_parallel_approver = is_parallel_pending(actor, step);

    if is_assigned_approver || is_parallel_approver {
        match action {
            Action::Approve | Action::Reject => {
                return matches!(
                    step.state,
                    StepState::WaitingForApproval | StepState::WaitingForRequester | StepState::WaitingForAgent
                );
            }
            Action::RequestInfo => return step.state == StepState::WaitingForApproval,
            Action::AddNote => {
                return matches!(
                    step.state,
                    StepState::WaitingForApproval
                        | StepState::WaitingForRequester
                        | StepState::WaitingForAgent
                        | StepState::WaitingForCr
                );
            }
            _ => {}
        }
    }

    if action == Action::AddNote
        && matches!(
            step.state,
            StepState::WaitingForApproval | StepState::WaitingForRequester | StepState::WaitingForAgent | StepState::WaitingForCr
        )
        && ticket.manager_snapshot.as_ref().is_some_and(|m| actor.is_same_person(m))
    {
        return true;
    }

    if action == Action::RespondInfo {
        if !matches!(step.state, StepState::WaitingForRequester | StepState::WaitingForAgent) {
            return false;
        }
        if is_info_request_target(actor, open_info_request) {
            return true;
        }
        return step.state == StepState::WaitingForRequester && actor.is_same_person(&ticket.requester);
    }

    false
}

/// The primary (or sole) approver of a completed approval step, for task
/// assignment and oversight-note checks: parallel approvals only let
/// their primary approver act; single approvals fall back to
/// `assigned_to`.
fn approved_by(actor: &Actor, approval_step: &TicketStep) -> bool {
    if let Some(primary_email) = &approval_step.data.primary_approver_email {
        return actor.user.email.eq_ignore_ascii_case(primary_email);
    }
    approval_step
        .assigned_to
        .as_ref()
        .is_some_and(|a| actor.is_same_person(a))
}

fn preceding_completed_approver_matches(actor: &Actor, all_steps: &[TicketStep]) -> bool {
    all_steps
        .iter()
        .filter(|s| s.step_type == StepType::ApprovalStep && s.state == StepState::Completed)
        .any(|s| approved_by(actor, s))
}

fn can_act_task_step(
    actor: &Actor,
    ticket: &Ticket,
    step: &TicketStep,
    action: Action,
    all_steps: &[TicketStep],
    open_info_request: Option<&InfoRequest>,
) -> bool {
    if matches!(action, Action::Assign | Action::Reassign) {
        if !matches!(step.state, StepState::Active | StepState::WaitingForApproval) {
            return false;
        }
        if ticket.manager_snapshot.as_ref().is_some_and(|m| actor.is_same_person(m)) {
            return true;
        }
        return preceding_completed_approver_matches(actor, all_steps);
    }

    if step.assigned_to.as_ref().is_some_and(|a| actor.is_same_person(a)) {
        match action {
            Action::CompleteTask => return step.state == StepState::Active,
            Action::AddNote => {
                return matches!(
                    step.state,
                    StepState::Active | StepState::OnHold | StepState::WaitingForRequester | StepState::WaitingForAgent | StepState::WaitingForCr
                );
            }
            Action::RequestInfo => return step.state == StepState::Active,
            _ => {}
        }
    }

    if action == Action::AddNote {
        if !matches!(
            step.state,
            StepState::Active | StepState::OnHold | StepState::WaitingForRequester | StepState::WaitingForAgent | StepState::WaitingForCr
        ) {
            return false;
        }
        if ticket.manager_snapshot.as_ref().is_some_and(|m| actor.is_same_person(m)) {
            return true;
        }
        return preceding_completed_approver_matches(actor, all_steps);
    }

    if action == Action::RespondInfo {
        if !matches!(step.state, StepState::WaitingForRequester | StepState::WaitingForAgent) {
            return false;
        }
        if is_info_request_target(actor, open_info_request) {
            return true;
        }
        return step.state == StepState::WaitingForRequester && actor.is_same_person(&ticket.requester);
    }

    false
}

/// Can `actor` cancel `ticket`? Only the requester, and only before a
/// final state (skip is not cancellable-from, matching the other
/// terminal statuses being reachable by other means).
#[must_use]
pub fn can_cancel_ticket(actor: &Actor, ticket: &Ticket) -> bool {
    actor.is_same_person(&ticket.requester)
        && !matches!(
            ticket.status,
            TicketStatus::Completed | TicketStatus::Rejected | TicketStatus::Cancelled
        )
}

/// The actions `actor` can currently perform on `step`, for building a UI
/// affordance list.
#[must_use]
pub fn available_actions(
    actor: &Actor,
    ticket: &Ticket,
    step: &TicketStep,
    all_steps: &[TicketStep],
    open_info_request: Option<&InfoRequest>,
) -> Vec<Action> {
    let candidates: &[Action] = match step.step_type {
        StepType::FormStep => &[Action::SubmitForm],
        StepType::ApprovalStep => &[
            Action::Approve,
            Action::Reject,
            Action::RequestInfo,
            Action::RespondInfo,
        ],
        StepType::TaskStep => &[
            Action::CompleteTask,
            Action::RequestInfo,
            Action::RespondInfo,
            Action::Assign,
            Action::Reassign,
        ],
        StepType::NotifyStep | StepType::ForkStep | StepType::JoinStep | StepType::SubWorkflowStep => &[],
    };

    candidates
        .iter()
        .copied()
        .filter(|a| can_act_on_step(actor, ticket, step, *a, all_steps, open_info_request))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ticketflow_domain::{StepData, TicketId, TicketStepId, UserRef, WorkflowTemplateId, WorkflowVersionId};
    use std::collections::HashMap;

    fn actor(email: &str) -> Actor {
        Actor::new(UserRef::from_email(email), vec![])
    }

    fn ticket(requester: &str, manager: Option<&str>, status: TicketStatus) -> Ticket {
        Ticket {
            ticket_id: TicketId::new(),
            workflow_template_id: WorkflowTemplateId::new(),
            workflow_version_id: WorkflowVersionId::new(),
            title: "t".into(),
            description: String::new(),
            status,
            current_step_id: Some("A1".into()),
            active_branches: vec![],
            requester: UserRef::from_email(requester),
            manager_snapshot: manager.map(UserRef::from_email),
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

    fn step(step_type: StepType, state: StepState, assigned_to: Option<&str>) -> TicketStep {
        TicketStep {
            ticket_step_id: TicketStepId::new(),
            ticket_id: TicketId::new(),
            step_id: "A1".into(),
            step_name: "Step".into(),
            step_type,
            state,
            assigned_to: assigned_to.map(UserRef::from_email),
            data: StepData::default(),
            started_at: None,
            due_at: None,
            completed_at: None,
            previous_state: None,
            branch_identity: None,
            sub_workflow_identity: None,
            version: 0,
        }
    }

    #[test]
    fn only_requester_can_submit_form_when_active() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let s = step(StepType::FormStep, StepState::Active, None);
        assert!(can_act_on_step(&actor("alice@x.com"), &t, &s, Action::SubmitForm, &[], None));
        assert!(!can_act_on_step(&actor("bob@x.com"), &t, &s, Action::SubmitForm, &[], None));
    }

    #[test]
    fn form_step_blocks_submit_when_not_active() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let s = step(StepType::FormStep, StepState::NotStarted, None);
        assert!(!can_act_on_step(&actor("alice@x.com"), &t, &s, Action::SubmitForm, &[], None));
    }

    #[test]
    fn assigned_approver_can_approve_or_reject_while_waiting() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let s = step(StepType::ApprovalStep, StepState::WaitingForApproval, Some("carol@x.com"));
        assert!(can_act_on_step(&actor("carol@x.com"), &t, &s, Action::Approve, &[], None));
        assert!(can_act_on_step(&actor("carol@x.com"), &t, &s, Action::Reject, &[], None));
        assert!(!can_act_on_step(&actor("dave@x.com"), &t, &s, Action::Approve, &[], None));
    }

    #[test]
    fn parallel_pending_approver_can_approve() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let mut s = step(StepType::ApprovalStep, StepState::WaitingForApproval, Some("carol@x.com"));
        s.data.parallel_pending_approvers = vec![UserRef::from_email("erin@x.com")];
        assert!(can_act_on_step(&actor("erin@x.com"), &t, &s, Action::Approve, &[], None));
    }

    #[test]
    fn manager_can_add_note_on_approval_step() {
        let t = ticket("alice@x.com", Some("mgr@x.com"), TicketStatus::InProgress);
        let s = step(StepType::ApprovalStep, StepState::WaitingForApproval, Some("carol@x.com"));
        assert!(can_act_on_step(&actor("mgr@x.com"), &t, &s, Action::AddNote, &[], None));
    }

    #[test]
    fn assigned_agent_can_complete_task_only_when_active() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let active = step(StepType::TaskStep, StepState::Active, Some("frank@x.com"));
        assert!(can_act_on_step(&actor("frank@x.com"), &t, &active, Action::CompleteTask, &[], None));

        let on_hold = step(StepType::TaskStep, StepState::OnHold, Some("frank@x.com"));
        assert!(!can_act_on_step(&actor("frank@x.com"), &t, &on_hold, Action::CompleteTask, &[], None));
    }

    #[test]
    fn primary_parallel_approver_can_assign_task() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let task_step = step(StepType::TaskStep, StepState::Active, None);
        let mut prior_approval = step(StepType::ApprovalStep, StepState::Completed, Some("carol@x.com"));
        prior_approval.data.primary_approver_email = Some("carol@x.com".into());
        assert!(can_act_on_step(
            &actor("carol@x.com"),
            &t,
            &task_step,
            Action::Assign,
            &[prior_approval],
            None
        ));
    }

    #[test]
    fn info_request_target_can_respond_while_waiting_for_agent() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let s = step(StepType::TaskStep, StepState::WaitingForAgent, Some("frank@x.com"));
        let ir = InfoRequest {
            info_request_id: ticketflow_domain::InfoRequestId::new(),
            ticket_step_id: s.ticket_step_id,
            requester: UserRef::from_email("frank@x.com"),
            recipient: UserRef::from_email("grace@x.com"),
            subject: "q".into(),
            question: "?".into(),
            status: InfoRequestStatus::Open,
            response: None,
            response_attachment_ids: vec![],
            created_at: Utc::now(),
            responded_at: None,
            version: 0,
        };
        assert!(can_act_on_step(&actor("grace@x.com"), &t, &s, Action::RespondInfo, &[], Some(&ir)));
        assert!(!can_act_on_step(&actor("someone-else@x.com"), &t, &s, Action::RespondInfo, &[], Some(&ir)));
    }

    #[test]
    fn terminal_ticket_blocks_every_action() {
        let t = ticket("alice@x.com", None, TicketStatus::Completed);
        let s = step(StepType::TaskStep, StepState::Active, Some("frank@x.com"));
        assert!(!can_act_on_step(&actor("frank@x.com"), &t, &s, Action::CompleteTask, &[], None));
    }

    #[test]
    fn waiting_for_cr_only_allows_notes_from_participants() {
        let t = ticket("alice@x.com", Some("mgr@x.com"), TicketStatus::WaitingForCr);
        let s = step(StepType::TaskStep, StepState::WaitingForCr, Some("frank@x.com"));
        assert!(can_act_on_step(&actor("frank@x.com"), &t, &s, Action::AddNote, &[], None));
        assert!(can_act_on_step(&actor("mgr@x.com"), &t, &s, Action::AddNote, &[], None));
        assert!(!can_act_on_step(&actor("frank@x.com"), &t, &s, Action::CompleteTask, &[], None));
        assert!(!can_act_on_step(&actor("stranger@x.com"), &t, &s, Action::AddNote, &[], None));
    }

    #[test]
    fn can_cancel_ticket_only_for_requester_before_final_state() {
        let open = ticket("alice@x.com", None, TicketStatus::InProgress);
        assert!(can_cancel_ticket(&actor("alice@x.com"), &open));
        assert!(!can_cancel_ticket(&actor("bob@x.com"), &open));

        let done = ticket("alice@x.com", None, TicketStatus::Completed);
        assert!(!can_cancel_ticket(&actor("alice@x.com"), &done));
    }

    #[test]
    fn available_actions_lists_only_permitted_ones() {
        let t = ticket("alice@x.com", None, TicketStatus::InProgress);
        let s = step(StepType::FormStep, StepState::Active, None);
        assert_eq!(available_actions(&actor("alice@x.com"), &t, &s, &[], None), vec![Action::SubmitForm]);
        assert!(available_actions(&actor("bob@x.com"), &t, &s, &[], None).is_empty());
    }
}
