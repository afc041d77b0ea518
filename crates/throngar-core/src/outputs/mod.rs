//! Output sinks. Generalizes the teacher's one-shot
//! `results::export::{export_csv, export_json}` into a streaming
//! `OutputSink` trait fed from a bounded channel per sink, with
//! drop-and-warn backpressure instead of blocking the collector.

pub mod csv;
pub mod graphite;
pub mod influx;
pub mod json;
pub mod webhook;

use crate::error::ThrongarError;
use crate::metrics::MetricsSummary;
use crate::result::TestResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait OutputSink: Send {
    async fn initialize(&mut self) -> Result<(), ThrongarError>;
    async fn write_result(&mut self, result: &TestResult) -> Result<(), ThrongarError>;
    async fn write_summary(&mut self, summary: &MetricsSummary) -> Result<(), ThrongarError>;
    async fn finalize(&mut self) -> Result<(), ThrongarError>;
}

const SINK_QUEUE_CAPACITY: usize = 1024;

pub enum SinkMessage {
    Result(TestResult),
    Summary(MetricsSummary),
    Finalize,
}

/// Spawn a task owning `sink`, fed by a bounded channel. Returns the
/// sender; when the channel is full, `try_send` drops the message and
/// logs a warning rather than applying backpressure to the VU pool.
pub fn spawn_sink(mut sink: Box<dyn OutputSink>) -> mpsc::Sender<SinkMessage> {
    let (tx, mut rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = sink.initialize().await {
            tracing::error!(error = %e, "output sink failed to initialize");
            return;
        }
        while let Some(msg) = rx.recv().await {
            let outcome = match msg {
                SinkMessage::Result(r) => sink.write_result(&r).await,
                SinkMessage::Summary(s) => sink.write_summary(&s).await,
                SinkMessage::Finalize => sink.finalize().await,
            };
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "output sink write failed");
            }
        }
    });
    tx
}

pub fn try_send_result(tx: &mpsc::Sender<SinkMessage>, result: TestResult) {
    if tx.try_send(SinkMessage::Result(result)).is_err() {
        tracing::warn!("output sink queue full, dropping result");
    }
}
