//! The condition evaluator DSL (§4.2): a closed, side-effect-free set of
//! comparisons over dot-path lookups into a ticket's form/context data,
//! combined by `AND`/`OR` groups. Never calls out to the database or the
//! clock; every evaluation is a pure function of the context handed in.
//!
//! Evaluation is fail-closed: a condition whose field path resolves to
//! nothing is simply not satisfied rather than raising an error, so an
//! author's typo in a `field_path` degrades a workflow to "never takes
//! this branch" rather than crashing the engine mid-ticket.

use serde_json::Value;
use ticketflow_domain::{Condition, ConditionGroup, ConditionLogic, ConditionOperator};

/// Evaluate a condition group against a form/context map. `context` is
/// typically a ticket's `form_values` merged with step output values,
/// addressed by `field_path` entries like `"manager_approval.amount"`.
#[must_use]
pub fn evaluate_group(group: &ConditionGroup, context: &Value) -> bool {
    let direct = group.conditions.iter().map(|c| evaluate_condition(c, context));
    let nested = group.groups.iter().map(|g| evaluate_group(g, context));
    let mut results = direct.chain(nested);

    match group.logic {
        ConditionLogic::And => results.all(|r| r),
        ConditionLogic::Or => results.any(|r| r),
    }
}

/// Evaluate a single comparison. Returns `false` (never panics, never
/// errors) when the field path is absent or the operand types don't
/// support the requested operator.
#[must_use]
pub fn evaluate_condition(condition: &Condition, context: &Value) -> bool {
    let field = resolve_path(context, &condition.field_path);

    match condition.operator {
        ConditionOperator::IsEmpty => is_empty(field),
        ConditionOperator::IsNotEmpty => !is_empty(field),
        ConditionOperator::Equals => field.is_some_and(|v| values_equal(v, &condition.value)),
        ConditionOperator::NotEquals => field.is_some_and(|v| !values_equal(v, &condition.value)),
        ConditionOperator::GreaterThan => compare_numbers(field, &condition.value, |a, b| a > b),
        ConditionOperator::LessThan => compare_numbers(field, &condition.value, |a, b| a < b),
        ConditionOperator::GreaterThanOrEquals => {
            compare_numbers(field, &condition.value, |a, b| a >= b)
        }
        ConditionOperator::LessThanOrEquals => {
            compare_numbers(field, &condition.value, |a, b| a <= b)
        }
        ConditionOperator::Contains => contains(field, &condition.value),
        ConditionOperator::NotContains => !contains(field, &condition.value),
        ConditionOperator::In => contains(Some(&condition.value), field.unwrap_or(&Value::Null)),
        ConditionOperator::NotIn => {
            !contains(Some(&condition.value), field.unwrap_or(&Value::Null))
        }
    }
}

/// Resolve a dot-separated path into a JSON object, e.g. `"a.b.c"`.
fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn is_empty(field: Option<&Value>) -> bool {
    match field {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn values_equal(field: &Value, expected: &Value) -> bool {
    field == expected
}

fn compare_numbers(field: Option<&Value>, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (field.and_then(Value::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// `CONTAINS`: field is a string containing `expected` as a substring, or
/// an array containing `expected` as an element. `IN`/`NOT_IN` reuse this
/// with operands swapped (`expected` is the list, `field` the needle).
fn contains(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        Some(Value::String(s)) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        Some(Value::Array(items)) => items.contains(expected),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(field_path: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field_path: field_path.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn equals_matches_exact_value() {
        let ctx = json!({"amount": 500});
        assert!(evaluate_condition(
            &condition("amount", ConditionOperator::Equals, json!(500)),
            &ctx
        ));
        assert!(!evaluate_condition(
            &condition("amount", ConditionOperator::Equals, json!(501)),
            &ctx
        ));
    }

    #[test]
    fn nested_dot_path_resolves() {
        let ctx = json!({"requester": {"department": "finance"}});
        assert!(evaluate_condition(
            &condition(
                "requester.department",
                ConditionOperator::Equals,
                json!("finance")
            ),
            &ctx
        ));
    }

    #[test]
    fn missing_field_is_fail_closed_not_an_error() {
        let ctx = json!({});
        assert!(!evaluate_condition(
            &condition("missing", ConditionOperator::Equals, json!("x")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &condition("missing", ConditionOperator::GreaterThan, json!(5)),
            &ctx
        ));
    }

    #[test]
    fn greater_than_and_less_than_or_equals() {
        let ctx = json!({"amount": 1000});
        assert!(evaluate_condition(
            &condition("amount", ConditionOperator::GreaterThan, json!(999)),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("amount", ConditionOperator::LessThanOrEquals, json!(1000)),
            &ctx
        ));
        assert!(!evaluate_condition(
            &condition("amount", ConditionOperator::LessThan, json!(1000)),
            &ctx
        ));
    }

    #[test]
    fn contains_on_string_and_array() {
        let ctx = json!({"note": "urgent request", "tags": ["urgent", "finance"]});
        assert!(evaluate_condition(
            &condition("note", ConditionOperator::Contains, json!("urgent")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("tags", ConditionOperator::Contains, json!("finance")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &condition("tags", ConditionOperator::NotContains, json!("finance")),
            &ctx
        ));
    }

    #[test]
    fn in_and_not_in_check_membership_of_the_expected_list() {
        let ctx = json!({"status": "approved"});
        assert!(evaluate_condition(
            &condition("status", ConditionOperator::In, json!(["approved", "skipped"])),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("status", ConditionOperator::NotIn, json!(["rejected"])),
            &ctx
        ));
    }

    #[test]
    fn is_empty_and_is_not_empty() {
        let ctx = json!({"note": "", "tags": ["a"], "absent_handled": null});
        assert!(evaluate_condition(
            &condition("note", ConditionOperator::IsEmpty, Value::Null),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("tags", ConditionOperator::IsNotEmpty, Value::Null),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("missing", ConditionOperator::IsEmpty, Value::Null),
            &ctx
        ));
    }

    #[test]
    fn and_group_requires_every_condition() {
        let ctx = json!({"amount": 500, "department": "finance"});
        let group = ConditionGroup {
            logic: ConditionLogic::And,
            conditions: vec![
                condition("amount", ConditionOperator::GreaterThan, json!(100)),
                condition("department", ConditionOperator::Equals, json!("finance")),
            ],
            groups: vec![],
        };
        assert!(evaluate_group(&group, &ctx));

        let group = ConditionGroup {
            logic: ConditionLogic::And,
            conditions: vec![
                condition("amount", ConditionOperator::GreaterThan, json!(1000)),
                condition("department", ConditionOperator::Equals, json!("finance")),
            ],
            groups: vec![],
        };
        assert!(!evaluate_group(&group, &ctx));
    }

    #[test]
    fn or_group_requires_any_condition() {
        let ctx = json!({"amount": 50});
        let group = ConditionGroup {
            logic: ConditionLogic::Or,
            conditions: vec![
                condition("amount", ConditionOperator::GreaterThan, json!(1000)),
                condition("amount", ConditionOperator::LessThan, json!(100)),
            ],
            groups: vec![],
        };
        assert!(evaluate_group(&group, &ctx));
    }

    #[test]
    fn nested_groups_combine_with_parent_logic() {
        let ctx = json!({"amount": 500, "department": "finance", "urgent": false});
        let inner = ConditionGroup {
            logic: ConditionLogic::Or,
            conditions: vec![
                condition("department", ConditionOperator::Equals, json!("finance")),
                condition("urgent", ConditionOperator::Equals, json!(true)),
            ],
            groups: vec![],
        };
        let outer = ConditionGroup {
            logic: ConditionLogic::And,
            conditions: vec![condition("amount", ConditionOperator::GreaterThan, json!(100))],
            groups: vec![inner],
        };
        assert!(evaluate_group(&outer, &ctx));
    }

    #[test]
    fn empty_group_is_vacuously_satisfied() {
        let group = ConditionGroup {
            logic: ConditionLogic::And,
            conditions: vec![],
            groups: vec![],
        };
        assert!(evaluate_group(&group, &json!({})));
    }
}
