//! The common response shape every protocol adapter normalizes into, so
//! checks/extracts/metrics never need to know which adapter produced a
//! result.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AdapterResponse {
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub elapsed_ms: u64,
    pub size_bytes: u64,
}

impl AdapterResponse {
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body.as_ref().and_then(|b| serde_json::from_str(b).ok())
    }
}
