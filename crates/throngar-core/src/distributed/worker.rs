//! Worker node HTTP surface. Exposes the endpoints the coordinator's
//! `HttpWorkerClient` calls, and drives a local scheduler run against the
//! VU range it was assigned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::model::{Configuration, LoadPhase, Stage};
use crate::protocol::HttpClientBuilder;
use crate::result::TestResult;

use super::client::{PrepareRequest, StartRequest, WorkerResultsResponse, WorkerStatusResponse};
use super::WorkerPhase;

struct Inner {
    phase: WorkerPhase,
    config: Option<Configuration>,
    vu_range: (u32, u32),
    active_vus: Arc<AtomicU32>,
    results: Vec<TestResult>,
    cancel: Option<CancellationToken>,
}

/// Shared state for one worker process. A worker only ever runs one
/// prepared configuration at a time; a second `/prepare` or `/start`
/// while already `Running` is rejected with 409.
#[derive(Clone)]
pub struct WorkerState {
    inner: Arc<RwLock<Inner>>,
    run_lock: Arc<Mutex<()>>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                phase: WorkerPhase::Idle,
                config: None,
                vu_range: (0, 0),
                active_vus: Arc::new(AtomicU32::new(0)),
                results: Vec::new(),
                cancel: None,
            })),
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn worker_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/prepare", post(prepare))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/results", get(results))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn status(State(state): State<WorkerState>) -> impl IntoResponse {
    let inner = state.inner.read().await;
    Json(WorkerStatusResponse { phase: inner.phase.clone(), active_vus: inner.active_vus.load(Ordering::Relaxed) })
}

async fn prepare(State(state): State<WorkerState>, Json(req): Json<PrepareRequest>) -> impl IntoResponse {
    let mut inner = state.inner.write().await;
    if inner.phase == WorkerPhase::Running {
        return (StatusCode::CONFLICT, "a run is already in progress").into_response();
    }
    inner.config = Some(req.config);
    inner.vu_range = req.vu_range;
    inner.active_vus.store(0, Ordering::Relaxed);
    inner.results.clear();
    inner.phase = WorkerPhase::Prepared;
    StatusCode::OK.into_response()
}

async fn start(State(state): State<WorkerState>, Json(req): Json<StartRequest>) -> impl IntoResponse {
    {
        let inner = state.inner.read().await;
        if inner.phase == WorkerPhase::Running {
            return (StatusCode::CONFLICT, "a run is already in progress").into_response();
        }
        if inner.config.is_none() {
            return (StatusCode::BAD_REQUEST, "worker has not been prepared").into_response();
        }
    }

    let config = { state.inner.read().await.config.clone().unwrap() };
    let vu_range = { state.inner.read().await.vu_range };
    let active_vus = { state.inner.read().await.active_vus.clone() };
    let cancel = CancellationToken::new();
    {
        let mut inner = state.inner.write().await;
        inner.phase = WorkerPhase::Running;
        inner.cancel = Some(cancel.clone());
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let delay_ms = (req.start_at_epoch_ms - now_ms).max(0) as u64;
    let state2 = state.clone();
    tokio::spawn(async move {
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        run_assigned_range(state2, config, vu_range, active_vus, cancel).await;
    });

    StatusCode::OK.into_response()
}

/// Caps the phase's VU budget to this worker's assigned share
/// (`vu_range.1 - vu_range.0`), keeping `ramp_up`/`duration` unscaled so
/// the per-worker spawn rate stays in proportion to the original aggregate
/// rate across all workers (§4.8 step 2).
fn cap_phase_to_share(phase: LoadPhase, share: u32) -> LoadPhase {
    match phase {
        LoadPhase::Basic { vus, ramp_up, duration, iterations } => {
            LoadPhase::Basic { vus: vus.min(share), ramp_up, duration, iterations }
        }
        LoadPhase::Stepping { stages } => LoadPhase::Stepping {
            stages: stages
                .into_iter()
                .map(|s| Stage { target: s.target.min(share), duration: s.duration, ramp_up: s.ramp_up })
                .collect(),
        },
        LoadPhase::Arrivals { rate, duration, max_vus, pre_allocated_vus } => LoadPhase::Arrivals {
            rate,
            duration,
            max_vus: max_vus.min(share),
            pre_allocated_vus,
        },
    }
}

async fn run_assigned_range(
    state: WorkerState,
    config: Configuration,
    vu_range: (u32, u32),
    active_vus: Arc<AtomicU32>,
    cancel: CancellationToken,
) {
    let _guard = state.run_lock.lock().await;

    let http = match HttpClientBuilder::new()
        .timeout(config.global.timeout.unwrap_or(std::time::Duration::from_secs(30)))
        .danger_accept_invalid_certs(false)
        .build()
    {
        Ok(c) => Arc::new(c),
        Err(_) => {
            let mut inner = state.inner.write().await;
            inner.phase = WorkerPhase::Error;
            return;
        }
    };

    let (result_tx, mut result_rx) = mpsc::channel::<TestResult>(1024);
    let scenarios = Arc::new(config.scenarios.clone());
    let global = Arc::new(config.global.clone());
    let csv_providers: Arc<HashMap<String, Arc<crate::providers::CsvProvider>>> = Arc::new(HashMap::new());

    let collector_state = state.clone();
    let collector = tokio::spawn(async move {
        while let Some(result) = result_rx.recv().await {
            let mut inner = collector_state.inner.write().await;
            inner.results.push(result);
        }
    });

    let phase = config.load.phases().into_iter().next();
    if let Some(phase) = phase {
        let share = vu_range.1 - vu_range.0;
        let capped_phase = cap_phase_to_share(phase, share);
        let scheduler_cfg = crate::scheduler::SchedulerConfig {
            scenarios,
            global,
            csv_providers,
            http,
            result_tx,
            cancel: cancel.clone(),
            active_vus: Some(active_vus),
        };
        crate::scheduler::run_phase(&capped_phase, &scheduler_cfg, vu_range.0).await;
        drop(scheduler_cfg);
    }

    let _ = collector.await;

    let mut inner = state.inner.write().await;
    inner.phase = WorkerPhase::Stopped;
}

async fn stop(State(state): State<WorkerState>) -> impl IntoResponse {
    let mut inner = state.inner.write().await;
    if let Some(cancel) = inner.cancel.take() {
        cancel.cancel();
    }
    inner.phase = WorkerPhase::Stopped;
    StatusCode::OK
}

async fn results(State(state): State<WorkerState>) -> impl IntoResponse {
    let mut inner = state.inner.write().await;
    let results = std::mem::take(&mut inner.results);
    let done = inner.phase != WorkerPhase::Running;
    Json(WorkerResultsResponse { results, done })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalConfig, LoadPhase, LoadSpec, RestStep, Scenario, Step, StepCommon};

    fn minimal_config() -> Configuration {
        Configuration {
            name: "smoke".into(),
            description: String::new(),
            global: GlobalConfig::default(),
            load: LoadSpec::Single(LoadPhase::Basic {
                vus: 1,
                ramp_up: None,
                duration: Some(std::time::Duration::from_secs(1)),
                iterations: None,
            }),
            scenarios: vec![Scenario {
                name: "s1".into(),
                weight: 1,
                loop_count: Some(1),
                csv: None,
                setup: vec![],
                steps: vec![Step::Rest(RestStep {
                    common: StepCommon { name: "get".into(), ..Default::default() },
                    method: "GET".into(),
                    url: "{{base_url}}/".into(),
                    headers: Default::default(),
                    body: None,
                    auth: None,
                })],
                teardown: vec![],
            }],
            outputs: vec![],
            report: None,
            workers: None,
            debug: Default::default(),
            environments: Default::default(),
        }
    }

    #[tokio::test]
    async fn starts_idle() {
        let state = WorkerState::new();
        let inner = state.inner.read().await;
        assert_eq!(inner.phase, WorkerPhase::Idle);
    }

    #[tokio::test]
    async fn prepare_sets_prepared_phase() {
        let state = WorkerState::new();
        let resp = prepare(
            State(state.clone()),
            Json(PrepareRequest { config: minimal_config(), vu_range: (0, 5) }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.inner.read().await.phase, WorkerPhase::Prepared);
    }

    #[test]
    fn cap_phase_to_share_caps_vus_but_leaves_ramp_up_alone() {
        let phase = LoadPhase::Basic {
            vus: 100,
            ramp_up: Some(std::time::Duration::from_secs(60)),
            duration: Some(std::time::Duration::from_secs(120)),
            iterations: None,
        };
        let capped = cap_phase_to_share(phase, 50);
        match capped {
            LoadPhase::Basic { vus, ramp_up, .. } => {
                assert_eq!(vus, 50);
                assert_eq!(ramp_up, Some(std::time::Duration::from_secs(60)));
            }
            _ => panic!("expected Basic"),
        }
    }

    #[tokio::test]
    async fn active_vus_reports_nonzero_while_a_run_is_in_flight() {
        let state = WorkerState::new();
        let mut config = minimal_config();
        config.load = LoadSpec::Single(LoadPhase::Basic {
            vus: 3,
            ramp_up: None,
            duration: Some(std::time::Duration::from_millis(200)),
            iterations: None,
        });
        let active_vus = state.inner.read().await.active_vus.clone();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(run_assigned_range(state.clone(), config, (0, 3), active_vus.clone(), cancel));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(active_vus.load(Ordering::Relaxed) > 0);

        run.await.unwrap();
        assert_eq!(active_vus.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn prepare_while_running_is_conflict() {
        let state = WorkerState::new();
        state.inner.write().await.phase = WorkerPhase::Running;
        let resp = prepare(
            State(state.clone()),
            Json(PrepareRequest { config: minimal_config(), vu_range: (0, 5) }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
