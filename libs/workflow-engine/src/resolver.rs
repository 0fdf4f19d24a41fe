//! Approver resolution (§4.6): turns an `ApproverResolutionConfig` plus
//! the running ticket's data into the set of `UserRef`s who own an
//! approval step — a primary approver, a parallel set for parallel
//! steps, and any secondary users (`FROM_LOOKUP`) notified alongside the
//! primary without being voting members.
//!
//! Pure and side-effect free like the condition evaluator: every input
//! (the requester's manager snapshot, prior step assignees, lookup
//! tables) is handed in rather than fetched here.

use thiserror::Error;
use ticketflow_domain::{
    ApproverResolutionConfig, ParallelApprovalConfig, ParallelApprovalRule, Ticket, TicketStep,
    UserRef, WorkflowDefinition,
};

use crate::transition::evaluate_group;

#[derive(Debug, Error)]
pub enum ApproverResolutionError {
    #[error("approver resolution has no manager_snapshot, spoc_email, or other fallback to use")]
    NoFallbackAvailable,
    #[error("conditional approver resolution matched no rule and exhausted every fallback")]
    NoConditionalMatch,
}

/// The resolved owner(s) of an approval step.
#[derive(Debug, Clone)]
pub struct ResolvedApprovers {
    pub primary: UserRef,
    /// The full voting set for a parallel step; `[primary]` for a
    /// single-approver step.
    pub parallel: Vec<UserRef>,
    /// `FROM_LOOKUP` secondary users: notified alongside the primary but
    /// never a voting member.
    pub notify_also: Vec<UserRef>,
}

/// Resolve the approver(s) for an approval step definition's
/// `resolution`/`parallel` config.
///
/// `completed_steps` is every already-completed `TicketStep` for this
/// ticket, used by `STEP_ASSIGNEE`. `context` is the form/output data
/// `CONDITIONAL` rules and `FROM_LOOKUP` key fields are read against.
pub fn resolve_approvers(
    resolution: &ApproverResolutionConfig,
    parallel: Option<&ParallelApprovalConfig>,
    ticket: &Ticket,
    definition: &WorkflowDefinition,
    completed_steps: &[TicketStep],
    context: &serde_json::Value,
) -> Result<ResolvedApprovers, ApproverResolutionError> {
    let manager_fallback = || ticket.manager_snapshot.clone();

    let (primary, notify_also) = match resolution {
        ApproverResolutionConfig::RequesterManager { spoc_email } => {
            let user = manager_fallback()
                .or_else(|| spoc_email.clone().map(UserRef::from_email))
                .ok_or(ApproverResolutionError::NoFallbackAvailable)?;
            (user, vec![])
        }

        ApproverResolutionConfig::SpecificEmail { email } | ApproverResolutionConfig::SpocEmail { email } => {
            (UserRef::from_email(email.clone()), vec![])
        }

        ApproverResolutionConfig::Conditional { rules, fallback_email, spoc_email } => {
            let email = rules
                .iter()
                .find(|rule| evaluate_group(&rule.condition, context))
                .map(|rule| rule.approver_email.clone())
                .or_else(|| fallback_email.clone())
                .or_else(|| spoc_email.clone())
                .or_else(|| manager_fallback().map(|u| u.email))
                .ok_or(ApproverResolutionError::NoConditionalMatch)?;
            (UserRef::from_email(email), vec![])
        }

        ApproverResolutionConfig::StepAssignee { source_step_id, spoc_email } => {
            let user = completed_steps
                .iter()
                .find(|s| &s.step_id == source_step_id)
                .and_then(|s| s.assigned_to.clone())
                .or_else(|| spoc_email.clone().map(UserRef::from_email))
                .or_else(manager_fallback)
                .ok_or(ApproverResolutionError::NoFallbackAvailable)?;
            (user, vec![])
        }

        ApproverResolutionConfig::FromLookup { lookup_table, key_field, spoc_email } => {
            let key = context.get(key_field).and_then(|v| v.as_str()).unwrap_or_default();
            let row = definition.lookup_tables.get(lookup_table).and_then(|t| t.rows.get(key));
            match row {
                Some(row) => (
                    UserRef::from_email(row.primary_email.clone()),
                    row.secondary_emails.iter().cloned().map(UserRef::from_email).collect(),
                ),
                None => {
                    let user = spoc_email
                        .clone()
                        .map(UserRef::from_email)
                        .or_else(manager_fallback)
                        .ok_or(ApproverResolutionError::NoFallbackAvailable)?;
                    (user, vec![])
                }
            }
        }
    };

    let Some(parallel_cfg) = parallel else {
        return Ok(ResolvedApprovers {
            parallel: vec![primary.clone()],
            primary,
            notify_also,
        });
    };

    let mut set = vec![primary];
    if let Some(extra) = &parallel_cfg.additional_approver_email {
        set.push(UserRef::from_email(extra.clone()));
    }
    dedup_by_email(&mut set);

    let designated_primary = parallel_cfg
        .primary_approver_email
        .as_ref()
        .and_then(|email| set.iter().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
        .unwrap_or_else(|| set[0].clone());

    let _ = parallel_cfg.rule; // governs decision completeness (parallel_settled), not set membership

    Ok(ResolvedApprovers {
        primary: designated_primary,
        parallel: set,
        notify_also,
    })
}

fn dedup_by_email(users: &mut Vec<UserRef>) {
    let mut seen = std::collections::HashSet::new();
    users.retain(|u| seen.insert(u.email.to_ascii_lowercase()));
}

/// Whether enough parallel decisions are in to settle the step, per the
/// step's `ParallelApprovalRule`: `ALL` needs every task decided; `ANY`
/// needs one approval, or every task decided (to catch all-reject).
#[must_use]
pub fn parallel_settled(rule: ParallelApprovalRule, decisions: &[ticketflow_domain::ApprovalDecision]) -> bool {
    use ticketflow_domain::ApprovalDecision::{Approved, Pending};
    match rule {
        ParallelApprovalRule::All => decisions.iter().all(|d| *d != Pending),
        ParallelApprovalRule::Any => {
            decisions.iter().any(|d| *d == Approved) || decisions.iter().all(|d| *d != Pending)
        }
    }
}

/// The step's overall decision once settled: `ALL` requires every
/// decision to be `Approved`; `ANY` requires at least one `Approved`.
#[must_use]
pub fn parallel_outcome(
    rule: ParallelApprovalRule,
    decisions: &[ticketflow_domain::ApprovalDecision],
) -> ticketflow_domain::ApprovalDecision {
    use ticketflow_domain::ApprovalDecision::{Approved, Rejected};
    let approved = match rule {
        ParallelApprovalRule::All => decisions.iter().all(|d| *d == Approved),
        ParallelApprovalRule::Any => decisions.iter().any(|d| *d == Approved),
    };
    if approved { Approved } else { Rejected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use ticketflow_domain::{
        Condition, ConditionGroup, ConditionLogic, ConditionOperator, ConditionalApproverRule,
        LookupRow, LookupTable, TicketId, TicketStepId, WorkflowTemplateId, WorkflowVersionId,
    };

    fn ticket_with_manager(manager_email: Option<&str>) -> Ticket {
        Ticket {
            ticket_id: TicketId::new(),
            workflow_template_id: WorkflowTemplateId::new(),
            workflow_version_id: WorkflowVersionId::new(),
            title: "t".into(),
            description: String::new(),
            status: ticketflow_domain::TicketStatus::InProgress,
            current_step_id: Some("A1".into()),
            active_branches: vec![],
            requester: UserRef::from_email("alice@x.com"),
            manager_snapshot: manager_email.map(UserRef::from_email),
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

    fn empty_definition() -> WorkflowDefinition {
        WorkflowDefinition { steps: vec![], transitions: vec![], lookup_tables: HashMap::new() }
    }

    #[test]
    fn requester_manager_resolves_to_manager_snapshot() {
        let ticket = ticket_with_manager(Some("mgr@x.com"));
        let resolved = resolve_approvers(
            &ApproverResolutionConfig::RequesterManager { spoc_email: None },
            None,
            &ticket,
            &empty_definition(),
            &[],
            &serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(resolved.primary.email, "mgr@x.com");
    }

    #[test]
    fn requester_manager_without_snapshot_falls_back_to_spoc() {
        let ticket = ticket_with_manager(None);
        let resolved = resolve_approvers(
            &ApproverResolutionConfig::RequesterManager { spoc_email: Some("spoc@x.com".into()) },
            None,
            &ticket,
            &empty_definition(),
            &[],
            &serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(resolved.primary.email, "spoc@x.com");
    }

    #[test]
    fn requester_manager_with_neither_manager_nor_spoc_errors() {
        let ticket = ticket_with_manager(None);
        let err = resolve_approvers(
            &ApproverResolutionConfig::RequesterManager { spoc_email: None },
            None,
            &ticket,
            &empty_definition(),
            &[],
            &serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, ApproverResolutionError::NoFallbackAvailable));
    }

    #[test]
    fn conditional_picks_first_matching_rule_else_fallback_chain() {
        let ticket = ticket_with_manager(Some("mgr@x.com"));
        let cfg = ApproverResolutionConfig::Conditional {
            rules: vec![ConditionalApproverRule {
                condition: ConditionGroup {
                    logic: ConditionLogic::And,
                    conditions: vec![Condition {
                        field_path: "amount".into(),
                        operator: ConditionOperator::GreaterThan,
                        value: serde_json::json!(1000),
                    }],
                    groups: vec![],
                },
                approver_email: "vp@x.com".into(),
            }],
            fallback_email: None,
            spoc_email: None,
        };
        let resolved =
            resolve_approvers(&cfg, None, &ticket, &empty_definition(), &[], &serde_json::json!({"amount": 5000})).unwrap();
        assert_eq!(resolved.primary.email, "vp@x.com");

        // No rule matches, no fallback/spoc configured -> falls back to manager_snapshot.
        let resolved =
            resolve_approvers(&cfg, None, &ticket, &empty_definition(), &[], &serde_json::json!({"amount": 10})).unwrap();
        assert_eq!(resolved.primary.email, "mgr@x.com");
    }

    #[test]
    fn step_assignee_resolves_from_completed_steps() {
        let ticket = ticket_with_manager(None);
        let step = TicketStep {
            ticket_step_id: TicketStepId::new(),
            ticket_id: ticket.ticket_id,
            step_id: "A1".into(),
            step_name: "Manager approval".into(),
            step_type: ticketflow_domain::StepType::ApprovalStep,
            state: ticketflow_domain::StepState::Completed,
            assigned_to: Some(UserRef::from_email("approver1@x.com")),
            data: ticketflow_domain::StepData::default(),
            started_at: None,
            due_at: None,
            completed_at: None,
            previous_state: None,
            branch_identity: None,
            sub_workflow_identity: None,
            version: 0,
        };
        let resolved = resolve_approvers(
            &ApproverResolutionConfig::StepAssignee { source_step_id: "A1".into(), spoc_email: None },
            None,
            &ticket,
            &empty_definition(),
            std::slice::from_ref(&step),
            &serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(resolved.primary.email, "approver1@x.com");
    }

    #[test]
    fn from_lookup_resolves_row_and_carries_secondary_users_to_notify() {
        let ticket = ticket_with_manager(None);
        let mut def = empty_definition();
        let mut rows = HashMap::new();
        rows.insert(
            "finance".into(),
            LookupRow {
                primary_email: "finance-lead@x.com".into(),
                secondary_emails: vec!["finance-2@x.com".into()],
            },
        );
        def.lookup_tables.insert("departments".into(), LookupTable { rows });

        let resolved = resolve_approvers(
            &ApproverResolutionConfig::FromLookup {
                lookup_table: "departments".into(),
                key_field: "department".into(),
                spoc_email: None,
            },
            None,
            &ticket,
            &def,
            &[],
            &serde_json::json!({"department": "finance"}),
        )
        .unwrap();
        assert_eq!(resolved.primary.email, "finance-lead@x.com");
        assert_eq!(resolved.notify_also.len(), 1);
        assert_eq!(resolved.notify_also[0].email, "finance-2@x.com");
    }

    #[test]
    fn parallel_set_includes_additional_approver_and_honors_explicit_primary() {
        let ticket = ticket_with_manager(Some("mgr@x.com"));
        let resolved = resolve_approvers(
            &ApproverResolutionConfig::RequesterManager { spoc_email: None },
            Some(&ParallelApprovalConfig {
                rule: ParallelApprovalRule::All,
                additional_approver_email: Some("extra@x.com".into()),
                primary_approver_email: Some("extra@x.com".into()),
            }),
            &ticket,
            &empty_definition(),
            &[],
            &serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(resolved.parallel.len(), 2);
        assert_eq!(resolved.primary.email, "extra@x.com");
    }

    #[test]
    fn parallel_settled_all_requires_every_decision() {
        use ticketflow_domain::ApprovalDecision::{Approved, Pending, Rejected};
        assert!(!parallel_settled(ParallelApprovalRule::All, &[Approved, Pending]));
        assert!(parallel_settled(ParallelApprovalRule::All, &[Approved, Rejected]));
    }

    #[test]
    fn parallel_settled_any_short_circuits_on_first_approval() {
        use ticketflow_domain::ApprovalDecision::{Approved, Pending};
        assert!(parallel_settled(ParallelApprovalRule::Any, &[Pending, Approved]));
    }

    #[test]
    fn parallel_outcome_all_requires_unanimous_approval() {
        use ticketflow_domain::ApprovalDecision::{Approved, Rejected};
        assert_eq!(parallel_outcome(ParallelApprovalRule::All, &[Approved, Approved]), Approved);
        assert_eq!(parallel_outcome(ParallelApprovalRule::All, &[Approved, Rejected]), Rejected);
    }

    #[test]
    fn parallel_outcome_any_requires_one_approval() {
        use ticketflow_domain::ApprovalDecision::{Approved, Rejected};
        assert_eq!(parallel_outcome(ParallelApprovalRule::Any, &[Rejected, Approved]), Approved);
    }
}
