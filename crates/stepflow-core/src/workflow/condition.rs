//! Condition evaluation for skip checks, loop breaks and `condition` steps.

use stepflow_types::workflow::{ConditionOperator, StepCondition};

use super::context::ExecutionContext;
use super::expression::{ExpressionResolver, format_value, unwrap_response};

/// True when every condition holds (an empty list holds).
pub fn evaluate_conditions(
    conditions: &[StepCondition],
    resolver: &ExpressionResolver,
    ctx: &ExecutionContext,
) -> bool {
    conditions
        .iter()
        .all(|c| evaluate_condition(c, resolver, ctx))
}

/// Evaluate one field/operator/value guard. Unresolvable fields compare as "".
pub fn evaluate_condition(
    condition: &StepCondition,
    resolver: &ExpressionResolver,
    ctx: &ExecutionContext,
) -> bool {
    let actual = field_text(&condition.field, resolver, ctx);
    let expected = resolver.render(&condition.value, ctx);
    let result = compare(&actual, condition.operator, &expected);
    tracing::debug!(
        field = condition.field.as_str(),
        operator = ?condition.operator,
        result,
        "evaluated condition"
    );
    result
}

fn field_text(field: &str, resolver: &ExpressionResolver, ctx: &ExecutionContext) -> String {
    let field = field.trim();
    let expr = field
        .strip_prefix('{')
        .and_then(|f| f.strip_suffix('}'))
        .unwrap_or(field);
    resolver
        .resolve(expr, ctx)
        .map(|v| format_value(&unwrap_response(v)))
        .unwrap_or_default()
}

fn compare(actual: &str, operator: ConditionOperator, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();
    match operator {
        ConditionOperator::Equals => actual == expected,
        ConditionOperator::NotEquals => actual != expected,
        ConditionOperator::Contains => actual.contains(expected),
        ConditionOperator::NotContains => !actual.contains(expected),
        ConditionOperator::Empty => actual.is_empty(),
        ConditionOperator::NotEmpty => !actual.is_empty(),
    }
}

/// Evaluate a rendered `condition` step expression.
///
/// Order: `true`/`false` literal, `a != b`, `a == b`, `a contains b`, then any
/// non-empty text is true.
pub fn evaluate_expression(rendered: &str) -> bool {
    let text = rendered.trim();
    if text.eq_ignore_ascii_case("true") {
        return true;
    }
    if text.eq_ignore_ascii_case("false") {
        return false;
    }
    if let Some((left, right)) = text.split_once("!=") {
        return operand(left) != operand(right);
    }
    if let Some((left, right)) = text.split_once("==") {
        return operand(left) == operand(right);
    }
    if let Some((left, right)) = text.split_once(" contains ") {
        return operand(left).contains(operand(right));
    }
    !text.is_empty()
}

fn operand(raw: &str) -> &str {
    let raw = raw.trim();
    for q in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    raw
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
