// SPDX-License-Identifier: MIT

//! Condition expression evaluator

use super::ast::{CompareOp, Expression, Literal};
use crate::kinetic::workflow::state::WorkflowState;
use serde_json::Value;

/// Evaluate a condition expression against workflow state
pub fn evaluate(expr: &Expression, state: &WorkflowState) -> bool {
    match expr {
        Expression::True => true,
        Expression::False => false,
        Expression::Compare { left, op, right } => evaluate_compare(left, *op, right, state),
        Expression::Truthy(path) => is_truthy(state.get_path(path)),
        Expression::And(left, right) => evaluate(left, state) && evaluate(right, state),
        Expression::Or(left, right) => evaluate(left, state) || evaluate(right, state),
        Expression::Not(inner) => !evaluate(inner, state),
    }
}

fn evaluate_compare(left: &str, op: CompareOp, right: &Literal, state: &WorkflowState) -> bool {
    let left_value = state.get_path(left);

    match op {
        CompareOp::Eq => values_equal(left_value, right),
        CompareOp::NotEq => !values_equal(left_value, right),
        CompareOp::Gt => compare_numbers(left_value, right, |a, b| a > b),
        CompareOp::Gte => compare_numbers(left_value, right, |a, b| a >= b),
        CompareOp::Lt => compare_numbers(left_value, right, |a, b| a < b),
        CompareOp::Lte => compare_numbers(left_value, right, |a, b| a <= b),
        CompareOp::Contains => check_contains(left_value, right),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn literal_matches(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::Null, Literal::Null) => true,
        (Value::String(s), Literal::String(rs)) => s == rs,
        (Value::Number(n), Literal::Number(rn)) => n
            .as_f64()
            .map(|f| (f - rn).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Bool(b), Literal::Boolean(rb)) => b == rb,
        _ => false,
    }
}

fn values_equal(left: Option<&Value>, right: &Literal) -> bool {
    match left {
        None => *right == Literal::Null,
        Some(value) => literal_matches(value, right),
    }
}

fn compare_numbers<F>(left: Option<&Value>, right: &Literal, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (left.and_then(|v| v.as_f64()), right) {
        (Some(f), Literal::Number(rn)) => cmp(f, *rn),
        _ => false,
    }
}

fn check_contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(substr)) => s.contains(substr.as_str()),
        (Some(Value::Array(arr)), literal) => arr.iter().any(|v| literal_matches(v, literal)),
        _ => false,
    }
}
