pub mod client;
pub mod coordinator;
pub mod worker;

pub use client::WorkerClient;
pub use coordinator::Coordinator;
pub use worker::{worker_router, WorkerState};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Healthy,
    Unhealthy,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    Prepared,
    Running,
    Stopped,
    Error,
}
