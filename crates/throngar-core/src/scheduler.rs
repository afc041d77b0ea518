//! Load-pattern scheduler.
//!
//! The teacher's `engine::executor::run_thread_group` only ever does a
//! linear ramp. This generalizes that into the three patterns spec'd:
//! `Basic` (ramp to N, hold), `Stepping` (ordered target stages), and
//! `Arrivals` (fixed request rate against a growable VU pool). The
//! ramp/stage math and the arrival pacer's carry-based fractional
//! accumulation are grounded in `other_examples/nogcio-wrkr`'s
//! `RampingU64Schedule`/`ArrivalPacer`; the semaphore-bounded VU pool with
//! dynamic growth is grounded in `other_examples/lance0-kaioken`'s
//! `ArrivalRateExecutor`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::model::{GlobalConfig, LoadPhase, Scenario};
use crate::protocol::HttpClient;
use crate::providers::csv::CsvProvider;
use crate::result::TestResult;
use crate::vu::{run_virtual_user, VuConfig};

/// Coordinates all VUs in a run starting at the same instant (T0), avoiding
/// startup skew — grounded in `nogcio-wrkr`'s `StartSignal`
/// (`AtomicBool` + `Notify`) pattern.
#[derive(Clone)]
pub struct StartSignal {
    released: Arc<std::sync::atomic::AtomicBool>,
    notify: Arc<Notify>,
}

impl StartSignal {
    pub fn new() -> Self {
        Self {
            released: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        self.notify.notified().await;
    }
}

pub struct SchedulerConfig {
    pub scenarios: Arc<Vec<Scenario>>,
    pub global: Arc<GlobalConfig>,
    pub csv_providers: Arc<std::collections::HashMap<String, Arc<CsvProvider>>>,
    pub http: Arc<HttpClient>,
    pub result_tx: mpsc::Sender<TestResult>,
    pub cancel: CancellationToken,
    /// Live count of VUs currently spawned, for callers (the worker's
    /// `/status` route) that need to observe it mid-run. `None` when no one
    /// is watching.
    pub active_vus: Option<Arc<AtomicU32>>,
}

/// Run one load phase to completion. A fresh child token is derived from
/// `cfg.cancel` for this phase alone: the phase functions cancel it when
/// they're done, which must never reach back up and cancel the run-wide
/// token (or a later phase in a multi-phase run would start pre-cancelled).
/// Cancelling `cfg.cancel` itself (e.g. ctrl-c) still propagates down into
/// the child and stops the phase early, same as before.
pub async fn run_phase(phase: &LoadPhase, cfg: &SchedulerConfig, vu_id_start: u32) -> u32 {
    let phase_cancel = cfg.cancel.child_token();
    match phase {
        LoadPhase::Basic { vus, ramp_up, duration, iterations } => {
            run_basic(*vus, *ramp_up, *duration, *iterations, cfg, &phase_cancel, vu_id_start).await
        }
        LoadPhase::Stepping { stages } => run_stepping(stages, cfg, &phase_cancel, vu_id_start).await,
        LoadPhase::Arrivals { rate, duration, max_vus, pre_allocated_vus } => {
            let pre_allocated = pre_allocated_vus.unwrap_or_else(|| (*max_vus).min(10));
            run_arrivals(*rate, *duration, *max_vus, pre_allocated, cfg, &phase_cancel, vu_id_start).await
        }
    }
}

fn spawn_vu(
    id: u32,
    cfg: &SchedulerConfig,
    phase_cancel: &CancellationToken,
    max_iterations: Option<u64>,
    start_signal: Option<StartSignal>,
    ready_barrier: Option<Arc<Barrier>>,
    join_set: &mut JoinSet<()>,
) {
    let vu_cfg = VuConfig {
        id,
        scenarios: cfg.scenarios.clone(),
        global: cfg.global.clone(),
        csv_providers: cfg.csv_providers.clone(),
        result_tx: cfg.result_tx.clone(),
        cancel: phase_cancel.clone(),
        http: cfg.http.clone(),
        max_iterations,
    };
    let active_vus = cfg.active_vus.clone();
    join_set.spawn(async move {
        if let Some(barrier) = ready_barrier {
            let barrier = barrier.clone();
            tokio::task::spawn_blocking(move || barrier.wait()).await.ok();
        }
        if let Some(signal) = start_signal {
            signal.wait().await;
        }
        if let Some(counter) = &active_vus {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        run_virtual_user(vu_cfg).await;
        if let Some(counter) = &active_vus {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    });
}

/// Ramp linearly from 0 to `vus` over `ramp_up`, then either hold for the
/// remainder of `duration`, or — if `iterations` was given instead — wait
/// for every VU to finish its own iteration count and end the phase there.
async fn run_basic(
    vus: u32,
    ramp_up: Option<Duration>,
    duration: Option<Duration>,
    iterations: Option<u64>,
    cfg: &SchedulerConfig,
    phase_cancel: &CancellationToken,
    vu_id_start: u32,
) -> u32 {
    let mut join_set = JoinSet::new();
    let ramp_up = ramp_up.unwrap_or(Duration::ZERO);
    let per_vu_delay = if vus > 0 { ramp_up / vus } else { Duration::ZERO };

    for i in 0..vus {
        if phase_cancel.is_cancelled() {
            break;
        }
        spawn_vu(vu_id_start + i, cfg, phase_cancel, iterations, None, None, &mut join_set);
        if !per_vu_delay.is_zero() {
            tokio::time::sleep(per_vu_delay).await;
        }
    }

    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration.saturating_sub(ramp_up)) => {}
                _ = phase_cancel.cancelled() => {}
            }
        }
        None => {
            // iteration-terminated: wait for every VU to finish on its own,
            // but still honor an external cancellation (ctrl-c, next-phase skip).
            tokio::select! {
                _ = async { while join_set.join_next().await.is_some() {} } => {}
                _ = phase_cancel.cancelled() => {}
            }
        }
    }
    phase_cancel.cancel();
    while join_set.join_next().await.is_some() {}
    vu_id_start + vus
}

/// Walk an ordered list of stages, each either ramping the live VU count
/// linearly toward `target` over the stage's `ramp_up` (step-function,
/// i.e. all at once, if `ramp_up` is absent), then holding for the rest of
/// the stage's `duration`.
async fn run_stepping(stages: &[crate::model::Stage], cfg: &SchedulerConfig, phase_cancel: &CancellationToken, vu_id_start: u32) -> u32 {
    let mut join_set = JoinSet::new();
    let mut next_id = vu_id_start;
    let mut current = 0u32;

    for stage in stages {
        if phase_cancel.is_cancelled() {
            break;
        }
        let delta = stage.target as i64 - current as i64;
        if delta > 0 {
            let to_spawn = delta as u32;
            let ramp_up = stage.ramp_up.unwrap_or(Duration::ZERO);
            let per_vu_delay = if ramp_up.is_zero() { Duration::ZERO } else { ramp_up / to_spawn.max(1) };
            for _ in 0..to_spawn {
                if phase_cancel.is_cancelled() {
                    break;
                }
                spawn_vu(next_id, cfg, phase_cancel, None, None, None, &mut join_set);
                next_id += 1;
                if !per_vu_delay.is_zero() {
                    tokio::time::sleep(per_vu_delay).await;
                }
            }
            current = stage.target;
            tokio::select! {
                _ = tokio::time::sleep(stage.duration.saturating_sub(ramp_up)) => {}
                _ = phase_cancel.cancelled() => {}
            }
        } else {
            tokio::select! {
                _ = tokio::time::sleep(stage.duration) => {}
                _ = phase_cancel.cancelled() => {}
            }
        }
    }

    phase_cancel.cancel();
    while join_set.join_next().await.is_some() {}
    next_id
}

/// Spawn iterations at a fixed rate against a growable, semaphore-bounded
/// VU pool. Iterations that can't acquire a VU when the pool is already at
/// `max_vus` are dropped and counted, per the spec's documented
/// saturation policy.
async fn run_arrivals(
    rate: u32,
    duration: Duration,
    max_vus: u32,
    pre_allocated_vus: u32,
    cfg: &SchedulerConfig,
    phase_cancel: &CancellationToken,
    vu_id_start: u32,
) -> u32 {
    if rate == 0 {
        tracing::warn!("arrivals phase rate is 0, no iterations spawned");
        return vu_id_start;
    }

    let effective_pre_allocated = pre_allocated_vus.min(max_vus).max(1);
    let vus_available = Arc::new(Semaphore::new(effective_pre_allocated as usize));
    let vus_active = Arc::new(AtomicU32::new(0));
    let dropped = Arc::new(AtomicU64::new(0));
    let mut total_allocated = effective_pre_allocated;

    let interval = Duration::from_nanos(1_000_000_000u64 / rate as u64);
    let start = Instant::now();
    let mut next_spawn = start + interval;
    let mut join_set = JoinSet::new();
    let mut next_id = vu_id_start;

    while start.elapsed() < duration {
        if phase_cancel.is_cancelled() {
            break;
        }
        let now = Instant::now();
        if next_spawn > now {
            tokio::select! {
                _ = tokio::time::sleep(next_spawn - now) => {}
                _ = phase_cancel.cancelled() => break,
            }
        }
        next_spawn += interval;

        let permit = match vus_available.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) if total_allocated < max_vus => {
                let to_add = (max_vus - total_allocated).min(10);
                vus_available.add_permits(to_add as usize);
                total_allocated += to_add;
                vus_available.clone().try_acquire_owned().ok()
            }
            Err(_) => None,
        };

        match permit {
            Some(permit) => {
                let vu_cfg = VuConfig {
                    id: next_id,
                    scenarios: cfg.scenarios.clone(),
                    global: cfg.global.clone(),
                    csv_providers: cfg.csv_providers.clone(),
                    result_tx: cfg.result_tx.clone(),
                    cancel: phase_cancel.clone(),
                    http: cfg.http.clone(),
                    max_iterations: None,
                };
                next_id += 1;
                let active = vus_active.clone();
                let active_vus = cfg.active_vus.clone();
                join_set.spawn(async move {
                    active.fetch_add(1, Ordering::Relaxed);
                    if let Some(counter) = &active_vus {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    run_virtual_user(vu_cfg).await;
                    active.fetch_sub(1, Ordering::Relaxed);
                    if let Some(counter) = &active_vus {
                        counter.fetch_sub(1, Ordering::Relaxed);
                    }
                    drop(permit);
                });
            }
            None => {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tracing::info!(dropped = dropped.load(Ordering::Relaxed), "arrivals phase finished");
    phase_cancel.cancel();
    while join_set.join_next().await.is_some() {}
    next_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_signal_releases_waiters() {
        let signal = StartSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        signal.release();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_returns_immediately_if_already_released() {
        let signal = StartSignal::new();
        signal.release();
        tokio::time::timeout(Duration::from_millis(50), signal.wait()).await.unwrap();
    }
}
