//! Evaluation of polling conditions against a polled result.

use serde_json::Value;

use crate::{
    model::{ConditionOperator, PollingCondition},
    template::reference,
};

/// Status values that mark a result as not ready yet when no condition is configured.
const PENDING_STATUSES: [&str; 4] = ["pending", "processing", "running", "queued"];

/// Looks `condition.field` up in `result` and applies the operator.
/// A missing path is absent and never panics.
pub fn evaluate(
    condition: &PollingCondition,
    result: &Value,
) -> bool {
    let actual = reference::project(result, &condition.field);
    evaluate_comparison(actual, condition.operator, condition.value.as_ref())
}

/// `null`, or an object whose `status` is one of the pending statuses.
pub fn is_pending_marker(result: &Value) -> bool {
    match result {
        Value::Null => true,
        Value::Object(map) => map
            .get("status")
            .and_then(Value::as_str)
            .map(|status| PENDING_STATUSES.iter().any(|p| p.eq_ignore_ascii_case(status)))
            .unwrap_or(false),
        _ => false,
    }
}

fn evaluate_comparison(
    actual: Option<&Value>,
    operator: ConditionOperator,
    expected: Option<&Value>,
) -> bool {
    match operator {
        ConditionOperator::Exists => is_present(actual),
        ConditionOperator::NotExists => !is_present(actual),
        ConditionOperator::Equals => actual == expected,
        ConditionOperator::NotEquals => actual != expected,
        ConditionOperator::Contains => match (actual, expected) {
            (Some(actual), Some(expected)) => eval_contains(actual, expected),
            _ => false,
        },
        ConditionOperator::GreaterThan => eval_cmp(actual, expected, |a, b| a > b),
        ConditionOperator::LessThan => eval_cmp(actual, expected, |a, b| a < b),
    }
}

fn is_present(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

fn eval_contains(
    actual: &Value,
    expected: &Value,
) -> bool {
    match (actual, expected) {
        (Value::String(s), Value::String(e)) => s.contains(e.as_str()),
        (Value::Array(items), e) => items.contains(e),
        _ => false,
    }
}

fn eval_cmp<F>(
    actual: Option<&Value>,
    expected: Option<&Value>,
    cmp: F,
) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (actual.and_then(as_number), expected.and_then(as_number)) {
        (Some(a), Some(e)) => cmp(a, e),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
