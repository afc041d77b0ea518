use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::ThrongarError;
use crate::metrics::MetricsSummary;
use crate::result::TestResult;
use super::OutputSink;

pub struct CsvSink {
    path: String,
    file: Option<tokio::fs::File>,
}

impl CsvSink {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), file: None }
    }

    const HEADER: &'static str = "timestamp,scenario,step,action,vu_id,iteration,attempt,success,status,duration_ms,size_bytes,error_kind\n";
}

#[async_trait]
impl OutputSink for CsvSink {
    async fn initialize(&mut self) -> Result<(), ThrongarError> {
        let mut file = tokio::fs::File::create(&self.path).await?;
        file.write_all(Self::HEADER.as_bytes()).await?;
        self.file = Some(file);
        Ok(())
    }

    async fn write_result(&mut self, result: &TestResult) -> Result<(), ThrongarError> {
        let file = self.file.as_mut().ok_or_else(|| ThrongarError::Internal("sink not initialized".into()))?;
        let line = format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}\n",
            result.timestamp.to_rfc3339(),
            csv_escape(&result.scenario),
            csv_escape(&result.step),
            result.action,
            result.vu_id,
            result.iteration,
            result.attempt,
            result.success,
            result.status.map(|s| s.to_string()).unwrap_or_default(),
            result.duration_ms,
            result.response_size_bytes,
            result.error_kind.clone().unwrap_or_default(),
        );
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn write_summary(&mut self, _summary: &MetricsSummary) -> Result<(), ThrongarError> {
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ThrongarError> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
