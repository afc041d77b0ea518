use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::ThrongarError;
use crate::metrics::MetricsSummary;
use crate::result::TestResult;
use super::OutputSink;

pub struct JsonSink {
    path: String,
    file: Option<tokio::fs::File>,
    wrote_first: bool,
}

impl JsonSink {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), file: None, wrote_first: false }
    }
}

#[async_trait]
impl OutputSink for JsonSink {
    async fn initialize(&mut self) -> Result<(), ThrongarError> {
        let mut file = tokio::fs::File::create(&self.path).await?;
        file.write_all(b"[\n").await?;
        self.file = Some(file);
        Ok(())
    }

    async fn write_result(&mut self, result: &TestResult) -> Result<(), ThrongarError> {
        let file = self.file.as_mut().ok_or_else(|| ThrongarError::Internal("sink not initialized".into()))?;
        if self.wrote_first {
            file.write_all(b",\n").await?;
        }
        self.wrote_first = true;
        let line = serde_json::to_string(result)?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn write_summary(&mut self, _summary: &MetricsSummary) -> Result<(), ThrongarError> {
        // Summaries are written by the CLI to a separate file; the result
        // stream stays homogeneous.
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ThrongarError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(b"\n]\n").await?;
            file.flush().await?;
        }
        Ok(())
    }
}
