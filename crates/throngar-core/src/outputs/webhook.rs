//! Webhook sink: posts each result (and the final summary) as JSON to an
//! arbitrary HTTP endpoint, reusing the teacher's `reqwest` client rather
//! than adding a second HTTP stack.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ThrongarError;
use crate::metrics::MetricsSummary;
use crate::result::TestResult;
use super::OutputSink;

pub struct WebhookSink {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self { url: url.into(), headers, client: reqwest::Client::new() }
    }

    fn post(&self, body: serde_json::Value) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.url).json(&body);
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }
        req
    }
}

#[async_trait]
impl OutputSink for WebhookSink {
    async fn initialize(&mut self) -> Result<(), ThrongarError> {
        Ok(())
    }

    async fn write_result(&mut self, result: &TestResult) -> Result<(), ThrongarError> {
        self.post(serde_json::json!({"type": "result", "payload": result}))
            .send()
            .await
            .map_err(ThrongarError::Http)?;
        Ok(())
    }

    async fn write_summary(&mut self, summary: &MetricsSummary) -> Result<(), ThrongarError> {
        self.post(serde_json::json!({
            "type": "summary",
            "total": summary.total,
            "success_rate": summary.success_rate,
            "throughput_per_sec": summary.throughput_per_sec,
        }))
        .send()
        .await
        .map_err(ThrongarError::Http)?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ThrongarError> {
        Ok(())
    }
}
