//! Condition Evaluator (spec §2 component C, §4.2): a small predicate DSL
//! evaluated against a `SystemProfile`, used by `Recipe::requires`,
//! `ChoiceOption::requires`, and `ConfigTemplate::condition`.
//!
//! A condition is JSON: either a combinator (`and`/`or`/`not`) or a map of
//! dotted profile paths to predicates. A bare value under a path means
//! equality; `{"op": value}` selects one of `eq|ne|gt|gte|lt|lte|in|regex|
//! semver_gte|semver_in_range`. A path that doesn't resolve in the profile
//! evaluates to `false` rather than erroring (spec §4.2).

pub mod version;

use regex::Regex;
use serde_json::Value;

/// Walks a dotted path (`"hardware.ram_total_mb"`) through a JSON value.
/// Missing segments yield `None`, which the evaluator treats as `false`.
fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn eval_predicate(actual: &Value, op: &str, expected: &Value) -> bool {
    match op {
        "eq" => actual == expected,
        "ne" => actual != expected,
        "gt" => matches!((as_f64(actual), as_f64(expected)), (Some(a), Some(b)) if a > b),
        "gte" => matches!((as_f64(actual), as_f64(expected)), (Some(a), Some(b)) if a >= b),
        "lt" => matches!((as_f64(actual), as_f64(expected)), (Some(a), Some(b)) if a < b),
        "lte" => matches!((as_f64(actual), as_f64(expected)), (Some(a), Some(b)) if a <= b),
        "in" => expected
            .as_array()
            .map(|arr| arr.iter().any(|v| v == actual))
            .unwrap_or(false),
        "regex" => match (as_str(actual), as_str(expected)) {
            (Some(a), Some(pattern)) => Regex::new(pattern).map(|re| re.is_match(a)).unwrap_or(false),
            _ => false,
        },
        "semver_gte" => match (as_str(actual), as_str(expected)) {
            (Some(a), Some(floor)) => version::gte(a, floor),
            _ => false,
        },
        "semver_in_range" => match (as_str(actual), expected.as_array()) {
            (Some(a), Some(bounds)) if bounds.len() == 2 => {
                match (as_str(&bounds[0]), as_str(&bounds[1])) {
                    (Some(lo), Some(hi)) => version::in_range(a, lo, hi),
                    _ => false,
                }
            }
            _ => false,
        },
        _ => false,
    }
}

fn eval_leaf(actual: Option<&Value>, predicate: &Value) -> bool {
    let Some(actual) = actual else { return false };
    match predicate {
        Value::Object(map) if map.len() == 1 => {
            let (op, expected) = map.iter().next().unwrap();
            eval_predicate(actual, op, expected)
        }
        other => actual == other,
    }
}

/// Evaluates a condition against a profile expressed as a JSON document
/// (the caller serializes `SystemProfile` once per resolution; see
/// `installer-core::types::SystemProfile`).
pub fn evaluate(condition: &Value, profile: &Value) -> bool {
    match condition {
        Value::Object(map) => {
            if let Some(and) = map.get("and").and_then(Value::as_array) {
                return and.iter().all(|c| evaluate(c, profile));
            }
            if let Some(or) = map.get("or").and_then(Value::as_array) {
                return or.iter().any(|c| evaluate(c, profile));
            }
            if let Some(not) = map.get("not") {
                return !evaluate(not, profile);
            }
            map.iter()
                .all(|(path, predicate)| eval_leaf(resolve_path(profile, path), predicate))
        }
        Value::Bool(b) => *b,
        Value::Null => true,
        _ => false,
    }
}
