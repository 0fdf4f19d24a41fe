//! The transition resolver (§4.5): `(step, event, context) -> next step`.
//!
//! Every outgoing transition from the current step for the given event is
//! a candidate; a transition without a `condition` always matches. Among
//! the candidates whose condition is satisfied (or absent), the highest
//! `priority` wins; ties keep the order the transitions were declared in
//! the workflow definition.

use serde_json::Value;
use thiserror::Error;
use ticketflow_domain::{Transition, TransitionEvent, WorkflowDefinition};

use super::conditions::evaluate_group;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("no transition from step '{from_step_id}' on event {on_event:?}")]
    NoMatchingTransition {
        from_step_id: String,
        on_event: TransitionEvent,
    },
}

/// Resolve the single transition that fires for `(from_step_id, event)`
/// given `context` (typically the ticket's form values / output data).
pub fn resolve_transition<'a>(
    definition: &'a WorkflowDefinition,
    from_step_id: &str,
    event: TransitionEvent,
    context: &Value,
) -> Result<&'a Transition, TransitionError> {
    let mut candidates: Vec<&Transition> = definition
        .outgoing_transitions(from_step_id, event)
        .into_iter()
        .filter(|t| match &t.condition {
            Some(group) => evaluate_group(group, context),
            None => true,
        })
        .collect();

    // Vec::sort_by is stable, so transitions with equal priority keep
    // their declaration order (i.e. their original position in
    // `definition.transitions`).
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    candidates.into_iter().next().ok_or_else(|| {
        TransitionError::NoMatchingTransition {
            from_step_id: from_step_id.to_string(),
            on_event: event,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use ticketflow_domain::{Condition, ConditionGroup, ConditionLogic, ConditionOperator, StepDefinition, StepKind};

    fn form_step(id: &str) -> StepDefinition {
        use ticketflow_domain::FormStepDef;
        StepDefinition {
            step_id: id.to_string(),
            step_name: id.to_string(),
            is_terminal: false,
            due_minutes: None,
            kind: StepKind::FormStep(FormStepDef { sections: vec![] }),
        }
    }

    fn definition(transitions: Vec<Transition>) -> WorkflowDefinition {
        WorkflowDefinition {
            steps: vec![form_step("A1"), form_step("B1"), form_step("C1")],
            transitions,
            lookup_tables: HashMap::new(),
        }
    }

    #[test]
    fn unconditional_transition_matches() {
        let def = definition(vec![Transition {
            from_step_id: "A1".into(),
            on_event: TransitionEvent::SubmitForm,
            to_step_id: "B1".into(),
            condition: None,
            priority: 0,
        }]);
        let next = resolve_transition(&def, "A1", TransitionEvent::SubmitForm, &json!({})).unwrap();
        assert_eq!(next.to_step_id, "B1");
    }

    #[test]
    fn higher_priority_wins_over_lower_when_both_satisfied() {
        let def = definition(vec![
            Transition {
                from_step_id: "A1".into(),
                on_event: TransitionEvent::SubmitForm,
                to_step_id: "B1".into(),
                condition: None,
                priority: 0,
            },
            Transition {
                from_step_id: "A1".into(),
                on_event: TransitionEvent::SubmitForm,
                to_step_id: "C1".into(),
                condition: None,
                priority: 10,
            },
        ]);
        let next = resolve_transition(&def, "A1", TransitionEvent::SubmitForm, &json!({})).unwrap();
        assert_eq!(next.to_step_id, "C1");
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let def = definition(vec![
            Transition {
                from_step_id: "A1".into(),
                on_event: TransitionEvent::SubmitForm,
                to_step_id: "B1".into(),
                condition: None,
                priority: 5,
            },
            Transition {
                from_step_id: "A1".into(),
                on_event: TransitionEvent::SubmitForm,
                to_step_id: "C1".into(),
                condition: None,
                priority: 5,
            },
        ]);
        let next = resolve_transition(&def, "A1", TransitionEvent::SubmitForm, &json!({})).unwrap();
        assert_eq!(next.to_step_id, "B1", "first-declared transition should win ties");
    }

    #[test]
    fn unsatisfied_condition_is_skipped_in_favor_of_next_candidate() {
        let gated = Transition {
            from_step_id: "A1".into(),
            on_event: TransitionEvent::SubmitForm,
            to_step_id: "B1".into(),
            condition: Some(ConditionGroup {
                logic: ConditionLogic::And,
                conditions: vec![Condition {
                    field_path: "amount".into(),
                    operator: ConditionOperator::GreaterThan,
                    value: json!(1000),
                }],
                groups: vec![],
            }),
            priority: 10,
        };
        let fallback = Transition {
            from_step_id: "A1".into(),
            on_event: TransitionEvent::SubmitForm,
            to_step_id: "C1".into(),
            condition: None,
            priority: 0,
        };
        let def = definition(vec![gated, fallback]);

        let next = resolve_transition(&def, "A1", TransitionEvent::SubmitForm, &json!({"amount": 50})).unwrap();
        assert_eq!(next.to_step_id, "C1");
    }

    #[test]
    fn no_matching_transition_is_an_error() {
        let def = definition(vec![]);
        let err = resolve_transition(&def, "A1", TransitionEvent::SubmitForm, &json!({})).unwrap_err();
        assert!(matches!(err, TransitionError::NoMatchingTransition { .. }));
    }
}
