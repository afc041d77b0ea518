//! The per-step result record that flows from the VU engine to the
//! metrics collector and, from there, to output sinks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub vu_id: u32,
    pub iteration: u64,
    pub scenario: String,
    pub step: String,
    pub action: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<std::collections::HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub response_size_bytes: u64,
    #[serde(default)]
    pub custom_metrics: std::collections::HashMap<String, f64>,
    /// Which attempt (1-based) this result represents when a step carries a
    /// retry policy — one result is emitted per attempt, not just the last.
    #[serde(default = "default_attempt")]
    pub attempt: u32,
}

fn default_attempt() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_optional_fields() {
        let r = TestResult {
            id: Uuid::new_v4(),
            vu_id: 1,
            iteration: 0,
            scenario: "s".into(),
            step: "login".into(),
            action: "rest".into(),
            timestamp: chrono::Utc::now(),
            duration_ms: 12,
            success: true,
            status: Some(200),
            error_kind: None,
            error_message: None,
            url: Some("http://x".into()),
            method: Some("GET".into()),
            response_headers: None,
            response_body: None,
            response_size_bytes: 0,
            custom_metrics: Default::default(),
            attempt: 1,
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("error_kind"));
    }
}
