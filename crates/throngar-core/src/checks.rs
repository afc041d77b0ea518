//! Check evaluation. All checks in a step's list run and are recorded,
//! mirroring the teacher's `assertions::evaluate_all` — a single failed
//! check does not short-circuit the rest.

use crate::model::{Check, CheckOp, CheckSource};
use crate::response::AdapterResponse;

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

pub fn evaluate_all(checks: &[Check], response: &AdapterResponse) -> Vec<CheckOutcome> {
    checks.iter().map(|c| evaluate_one(c, response)).collect()
}

fn evaluate_one(check: &Check, response: &AdapterResponse) -> CheckOutcome {
    let actual = resolve_source(&check.source, response);
    let (passed, detail) = match actual {
        Some(value) => apply_op(&check.op, &value),
        None => (false, Some("source value not present".to_string())),
    };
    CheckOutcome {
        name: check.name.clone(),
        passed,
        detail,
    }
}

fn resolve_source(source: &CheckSource, response: &AdapterResponse) -> Option<serde_json::Value> {
    match source {
        CheckSource::Status => response.status.map(|s| serde_json::Value::Number(s.into())),
        CheckSource::Header { name } => response
            .headers
            .get(&name.to_lowercase())
            .map(|v| serde_json::Value::String(v.clone())),
        CheckSource::Body => response.body.clone().map(serde_json::Value::String),
        CheckSource::JsonPath { path } => {
            response.body_json().and_then(|v| crate::jsonpath::navigate(&v, path))
        }
    }
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn apply_op(op: &CheckOp, actual: &serde_json::Value) -> (bool, Option<String>) {
    match op {
        CheckOp::Equals { value } => {
            let passed = actual == value;
            (passed, (!passed).then(|| format!("expected {value}, got {actual}")))
        }
        CheckOp::Contains { value } => {
            let hay = match actual {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let passed = hay.contains(value.as_str());
            (passed, (!passed).then(|| format!("'{hay}' does not contain '{value}'")))
        }
        CheckOp::Exists => (true, None),
        CheckOp::Lt { value } => numeric_cmp(actual, *value, |a, b| a < b, "<"),
        CheckOp::Lte { value } => numeric_cmp(actual, *value, |a, b| a <= b, "<="),
        CheckOp::Gt { value } => numeric_cmp(actual, *value, |a, b| a > b, ">"),
        CheckOp::Gte { value } => numeric_cmp(actual, *value, |a, b| a >= b, ">="),
    }
}

fn numeric_cmp(
    actual: &serde_json::Value,
    expected: f64,
    cmp: impl Fn(f64, f64) -> bool,
    op_name: &str,
) -> (bool, Option<String>) {
    match as_f64(actual) {
        Some(n) => {
            let passed = cmp(n, expected);
            (passed, (!passed).then(|| format!("{n} {op_name} {expected} is false")))
        }
        None => (false, Some(format!("'{actual}' is not numeric"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> AdapterResponse {
        AdapterResponse {
            status: Some(status),
            headers: Default::default(),
            body: Some(body.to_string()),
            elapsed_ms: 10,
            size_bytes: body.len() as u64,
        }
    }

    #[test]
    fn status_gte_check_passes() {
        let check = Check {
            name: "ok".into(),
            source: CheckSource::Status,
            op: CheckOp::Gte { value: 200.0 },
        };
        let outcome = evaluate_one(&check, &response(200, "{}"));
        assert!(outcome.passed);
    }

    #[test]
    fn json_path_equals_check() {
        let check = Check {
            name: "id matches".into(),
            source: CheckSource::JsonPath { path: "user.id".into() },
            op: CheckOp::Equals { value: serde_json::json!(42) },
        };
        let outcome = evaluate_one(&check, &response(200, r#"{"user":{"id":42}}"#));
        assert!(outcome.passed);
    }

    #[test]
    fn all_checks_are_recorded_not_short_circuited() {
        let checks = vec![
            Check { name: "a".into(), source: CheckSource::Status, op: CheckOp::Equals { value: serde_json::json!(404) } },
            Check { name: "b".into(), source: CheckSource::Body, op: CheckOp::Contains { value: "ok".into() } },
        ];
        let outcomes = evaluate_all(&checks, &response(200, "all ok"));
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].passed);
        assert!(outcomes[1].passed);
    }

    #[test]
    fn missing_json_path_fails() {
        let check = Check {
            name: "missing".into(),
            source: CheckSource::JsonPath { path: "nope".into() },
            op: CheckOp::Exists,
        };
        let outcome = evaluate_one(&check, &response(200, "{}"));
        assert!(!outcome.passed);
    }
}
