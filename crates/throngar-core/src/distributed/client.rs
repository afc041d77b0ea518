//! Typed RPC client the coordinator uses to talk to worker nodes.
//!
//! Per the re-architecture guidance to replace ad-hoc HTTP calls with a
//! typed abstraction: every wire call is one method here, reusing the
//! teacher's `reqwest::Client` rather than introducing a second transport.

use std::time::Duration;

use crate::error::ThrongarError;
use crate::model::{Configuration, WorkerDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub config: Configuration,
    pub vu_range: (u32, u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Unix epoch millis at which every worker should begin executing.
    pub start_at_epoch_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusResponse {
    pub phase: super::WorkerPhase,
    pub active_vus: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResultsResponse {
    pub results: Vec<crate::result::TestResult>,
    pub done: bool,
}

#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn health(&self) -> Result<(), ThrongarError>;
    async fn status(&self) -> Result<WorkerStatusResponse, ThrongarError>;
    async fn prepare(&self, req: &PrepareRequest) -> Result<(), ThrongarError>;
    async fn start(&self, req: &StartRequest) -> Result<(), ThrongarError>;
    async fn stop(&self) -> Result<(), ThrongarError>;
    async fn fetch_results(&self) -> Result<WorkerResultsResponse, ThrongarError>;
}

/// The real HTTP-backed implementation, one per remote worker.
pub struct HttpWorkerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(descriptor: &WorkerDescriptor) -> Self {
        Self {
            base_url: format!("http://{}:{}", descriptor.host, descriptor.port),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("default worker RPC client should always build"),
        }
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn health(&self) -> Result<(), ThrongarError> {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        Ok(())
    }

    async fn status(&self) -> Result<WorkerStatusResponse, ThrongarError> {
        let resp = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        resp.json().await.map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))
    }

    async fn prepare(&self, req: &PrepareRequest) -> Result<(), ThrongarError> {
        let resp = self
            .client
            .post(format!("{}/prepare", self.base_url))
            .json(req)
            .send()
            .await
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(ThrongarError::WorkerBusy(format!("{} already has a run in progress", self.base_url)));
        }
        resp.error_for_status().map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        Ok(())
    }

    async fn start(&self, req: &StartRequest) -> Result<(), ThrongarError> {
        self.client
            .post(format!("{}/start", self.base_url))
            .json(req)
            .send()
            .await
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ThrongarError> {
        self.client
            .post(format!("{}/stop", self.base_url))
            .send()
            .await
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        Ok(())
    }

    async fn fetch_results(&self) -> Result<WorkerResultsResponse, ThrongarError> {
        let resp = self
            .client
            .get(format!("{}/results", self.base_url))
            .send()
            .await
            .map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))?;
        resp.json().await.map_err(|e| ThrongarError::WorkerUnreachable(e.to_string()))
    }
}
