//! InfluxDB line-protocol sink, written over HTTP to the `/api/v2/write`
//! endpoint (or any InfluxDB-line-protocol-compatible ingest endpoint).

use async_trait::async_trait;

use crate::error::ThrongarError;
use crate::metrics::MetricsSummary;
use crate::result::TestResult;
use super::OutputSink;

pub struct InfluxSink {
    url: String,
    bucket: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(url: impl Into<String>, bucket: impl Into<String>, token: Option<String>) -> Self {
        Self { url: url.into(), bucket: bucket.into(), token, client: reqwest::Client::new() }
    }
}

fn to_line(result: &TestResult, bucket: &str) -> String {
    let status = result.status.map(|s| s.to_string()).unwrap_or_else(|| "none".into());
    format!(
        "throngar_result,bucket={bucket},scenario={},step={},action={} success={},duration_ms={}u,status=\"{}\" {}",
        result.scenario.replace(' ', "_"),
        result.step.replace(' ', "_"),
        result.action,
        result.success,
        result.duration_ms,
        status,
        result.timestamp.timestamp_nanos_opt().unwrap_or(0),
    )
}

#[async_trait]
impl OutputSink for InfluxSink {
    async fn initialize(&mut self) -> Result<(), ThrongarError> {
        Ok(())
    }

    async fn write_result(&mut self, result: &TestResult) -> Result<(), ThrongarError> {
        let line = to_line(result, &self.bucket);
        let mut req = self.client.post(&self.url).body(line);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Token {token}"));
        }
        req.send().await.map_err(ThrongarError::Http)?;
        Ok(())
    }

    async fn write_summary(&mut self, _summary: &MetricsSummary) -> Result<(), ThrongarError> {
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ThrongarError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn formats_line_protocol() {
        let result = TestResult {
            id: Uuid::new_v4(),
            vu_id: 1,
            iteration: 0,
            scenario: "checkout flow".into(),
            step: "add to cart".into(),
            action: "rest".into(),
            timestamp: chrono::Utc::now(),
            duration_ms: 50,
            success: true,
            status: Some(200),
            error_kind: None,
            error_message: None,
            url: None,
            method: None,
            response_headers: None,
            response_body: None,
            response_size_bytes: 10,
            custom_metrics: Default::default(),
            attempt: 1,
        };
        let line = to_line(&result, "loadtest");
        assert!(line.starts_with("throngar_result,bucket=loadtest"));
        assert!(line.contains("scenario=checkout_flow"));
        assert!(line.contains("duration_ms=50u"));
    }
}
