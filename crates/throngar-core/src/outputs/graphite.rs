//! Graphite plaintext protocol sink (`metric value timestamp\n` over TCP).

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::ThrongarError;
use crate::metrics::MetricsSummary;
use crate::result::TestResult;
use super::OutputSink;

pub struct GraphiteSink {
    host: String,
    port: u16,
    prefix: String,
    stream: Option<TcpStream>,
}

impl GraphiteSink {
    pub fn new(host: impl Into<String>, port: u16, prefix: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            prefix: prefix.unwrap_or_else(|| "throngar".to_string()),
            stream: None,
        }
    }

    fn metric_path(&self, result: &TestResult) -> String {
        format!(
            "{}.{}.{}.duration_ms",
            self.prefix,
            sanitize(&result.scenario),
            sanitize(&result.step)
        )
    }
}

fn sanitize(s: &str) -> String {
    s.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}

#[async_trait]
impl OutputSink for GraphiteSink {
    async fn initialize(&mut self) -> Result<(), ThrongarError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(ThrongarError::Io)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_result(&mut self, result: &TestResult) -> Result<(), ThrongarError> {
        let stream = self.stream.as_mut().ok_or_else(|| ThrongarError::Internal("sink not initialized".into()))?;
        let line = format!(
            "{} {} {}\n",
            self.metric_path(result),
            result.duration_ms,
            result.timestamp.timestamp()
        );
        stream.write_all(line.as_bytes()).await.map_err(ThrongarError::Io)?;
        Ok(())
    }

    async fn write_summary(&mut self, _summary: &MetricsSummary) -> Result<(), ThrongarError> {
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ThrongarError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().await.map_err(ThrongarError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_non_alphanumeric_chars() {
        assert_eq!(sanitize("checkout flow!"), "checkout_flow_");
    }
}
