//! Distributed coordinator: splits a configuration's VU budget across
//! worker nodes and drives the Initialize/Distribute/Prepare/Start/Run/
//! Stop lifecycle.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ThrongarError;
use crate::model::{Configuration, DistributionStrategy, LoadPhase, WorkerDescriptor};
use crate::result::TestResult;

use super::client::{PrepareRequest, StartRequest, WorkerClient};
use super::{WorkerHealth, WorkerPhase};

pub struct Coordinator {
    workers: Vec<WorkerDescriptor>,
    clients: Vec<Arc<dyn WorkerClient>>,
    strategy: DistributionStrategy,
    sync_start: bool,
    health: HashMap<usize, WorkerHealth>,
    missed_heartbeats: HashMap<usize, u32>,
    /// Rotates which worker the remainder/next share lands on across
    /// successive `distribute()` calls, so a multi-phase run doesn't always
    /// pile the odd VU onto worker 0.
    rr_cursor: Cell<u32>,
}

impl Coordinator {
    pub fn new(
        workers: Vec<WorkerDescriptor>,
        clients: Vec<Arc<dyn WorkerClient>>,
        strategy: DistributionStrategy,
        sync_start: bool,
    ) -> Self {
        let health = (0..workers.len()).map(|i| (i, WorkerHealth::Healthy)).collect();
        Self {
            workers,
            clients,
            strategy,
            sync_start,
            health,
            missed_heartbeats: HashMap::new(),
            rr_cursor: Cell::new(0),
        }
    }

    /// Split `total_vus` across workers per the configured strategy.
    /// Returns one `(start, end)` exclusive VU-id range per worker, in
    /// `self.workers` order.
    pub fn distribute(&self, total_vus: u32) -> Vec<(u32, u32)> {
        let n = self.workers.len() as u32;
        if n == 0 {
            return vec![];
        }
        let shares: Vec<u32> = match self.strategy {
            DistributionStrategy::Even => even_shares(total_vus, n),
            DistributionStrategy::CapacityBased => {
                let total_capacity: u32 = self.workers.iter().map(|w| w.capacity).sum();
                if total_capacity == 0 {
                    even_shares(total_vus, n)
                } else {
                    capacity_shares(total_vus, &self.workers, total_capacity)
                }
            }
            DistributionStrategy::RoundRobin => {
                let start = self.rr_cursor.get();
                self.rr_cursor.set((start + 1) % n);
                round_robin_shares(total_vus, n, start)
            }
            DistributionStrategy::Geographic => geographic_shares(total_vus, &self.workers),
        };

        let mut ranges = Vec::with_capacity(shares.len());
        let mut cursor = 0u32;
        for share in shares {
            ranges.push((cursor, cursor + share));
            cursor += share;
        }
        ranges
    }

    pub async fn initialize(&self) -> Result<(), ThrongarError> {
        for client in &self.clients {
            client.health().await?;
        }
        Ok(())
    }

    pub async fn prepare_all(&self, config: &Configuration, total_vus: u32) -> Result<(), ThrongarError> {
        let ranges = self.distribute(total_vus);
        for (client, range) in self.clients.iter().zip(ranges.iter()) {
            client
                .prepare(&PrepareRequest { config: config.clone(), vu_range: *range })
                .await?;
        }
        Ok(())
    }

    /// Compute T0 and tell every worker to start at that instant, so runs
    /// across geographically distant workers begin in lockstep rather than
    /// being skewed by per-worker RPC latency.
    pub async fn start_all(&self) -> Result<(), ThrongarError> {
        let skew_budget_ms = if self.sync_start { 2_000 } else { 0 };
        let start_at = chrono::Utc::now().timestamp_millis() + skew_budget_ms;
        for client in &self.clients {
            client.start(&StartRequest { start_at_epoch_ms: start_at }).await?;
        }
        Ok(())
    }

    /// Poll every worker's `/status` until none report `Running`, for
    /// iteration-terminated phases where the coordinator has no fixed
    /// duration to sleep against.
    pub async fn await_all_stopped(&self, poll_interval: Duration) {
        loop {
            let mut any_running = false;
            for client in &self.clients {
                if let Ok(resp) = client.status().await {
                    if resp.phase == WorkerPhase::Running {
                        any_running = true;
                    }
                }
            }
            if !any_running {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn stop_all(&self) -> Result<(), ThrongarError> {
        for client in &self.clients {
            client.stop().await?;
        }
        Ok(())
    }

    pub async fn collect_all_results(&self) -> Result<Vec<TestResult>, ThrongarError> {
        let mut out = Vec::new();
        for client in &self.clients {
            let resp = client.fetch_results().await?;
            out.extend(resp.results);
        }
        Ok(out)
    }

    /// One heartbeat poll. A worker that misses one consecutive check
    /// becomes `Unhealthy`; two consecutive misses become `Disconnected`.
    pub async fn poll_health(&mut self, heartbeat_interval: Duration) {
        for (i, client) in self.clients.iter().enumerate() {
            match tokio::time::timeout(heartbeat_interval, client.health()).await {
                Ok(Ok(())) => {
                    self.health.insert(i, WorkerHealth::Healthy);
                    self.missed_heartbeats.insert(i, 0);
                }
                _ => {
                    let misses = self.missed_heartbeats.entry(i).or_insert(0);
                    *misses += 1;
                    let state = if *misses >= 2 { WorkerHealth::Disconnected } else { WorkerHealth::Unhealthy };
                    self.health.insert(i, state);
                }
            }
        }
    }

    pub fn health_snapshot(&self) -> HashMap<usize, WorkerHealth> {
        self.health.clone()
    }
}

fn even_shares(total: u32, n: u32) -> Vec<u32> {
    let base = total / n;
    let remainder = total % n;
    (0..n).map(|i| base + if i < remainder { 1 } else { 0 }).collect()
}

fn capacity_shares(total: u32, workers: &[WorkerDescriptor], total_capacity: u32) -> Vec<u32> {
    let mut shares: Vec<u32> = workers
        .iter()
        .map(|w| ((w.capacity as u64 * total as u64) / total_capacity as u64) as u32)
        .collect();
    let assigned: u32 = shares.iter().sum();
    // Distribute any rounding remainder to the highest-capacity workers.
    let mut remainder = total.saturating_sub(assigned);
    let mut order: Vec<usize> = (0..workers.len()).collect();
    order.sort_by(|&a, &b| workers[b].capacity.cmp(&workers[a].capacity));
    for &i in &order {
        if remainder == 0 {
            break;
        }
        shares[i] += 1;
        remainder -= 1;
    }
    shares
}

/// Deal VUs one at a time round-robin across `n` workers starting at
/// `start`, so the odd remainder lands on a different worker each time
/// `distribute()` is called rather than always on worker 0.
fn round_robin_shares(total: u32, n: u32, start: u32) -> Vec<u32> {
    let base = total / n;
    let remainder = total % n;
    let mut shares = vec![base; n as usize];
    for k in 0..remainder {
        let idx = ((start + k) % n) as usize;
        shares[idx] += 1;
    }
    shares
}

/// Split `total` evenly across distinct `region`s first, then evenly
/// across the workers within each region. Workers with no region are
/// grouped into a single "unassigned" region.
fn geographic_shares(total: u32, workers: &[WorkerDescriptor]) -> Vec<u32> {
    let mut regions: Vec<(&str, Vec<usize>)> = Vec::new();
    for (i, w) in workers.iter().enumerate() {
        let key = w.region.as_deref().unwrap_or("unassigned");
        match regions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, indices)) => indices.push(i),
            None => regions.push((key, vec![i])),
        }
    }

    let region_totals = even_shares(total, regions.len() as u32);
    let mut shares = vec![0u32; workers.len()];
    for ((_, indices), region_total) in regions.into_iter().zip(region_totals) {
        let worker_totals = even_shares(region_total, indices.len() as u32);
        for (idx, share) in indices.into_iter().zip(worker_totals) {
            shares[idx] = share;
        }
    }
    shares
}

pub fn total_vus_for_phase(phase: &LoadPhase) -> u32 {
    match phase {
        LoadPhase::Basic { vus, .. } => *vus,
        LoadPhase::Stepping { stages } => stages.iter().map(|s| s.target).max().unwrap_or(0),
        LoadPhase::Arrivals { max_vus, .. } => *max_vus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(host: &str, capacity: u32) -> WorkerDescriptor {
        WorkerDescriptor { host: host.into(), port: 8080, capacity, region: None }
    }

    fn coordinator(workers: Vec<WorkerDescriptor>, strategy: DistributionStrategy) -> Coordinator {
        Coordinator::new(workers, vec![], strategy, false)
    }

    #[test]
    fn even_distribution_splits_remainder_to_first_workers() {
        let c = coordinator(vec![worker("a", 1), worker("b", 1), worker("c", 1)], DistributionStrategy::Even);
        let ranges = c.distribute(10);
        let sizes: Vec<u32> = ranges.iter().map(|(s, e)| e - s).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn capacity_based_distribution_weights_by_capacity() {
        let c = coordinator(vec![worker("a", 1), worker("b", 3)], DistributionStrategy::CapacityBased);
        let ranges = c.distribute(8);
        let sizes: Vec<u32> = ranges.iter().map(|(s, e)| e - s).collect();
        assert_eq!(sizes, vec![2, 6]);
    }

    #[test]
    fn ranges_are_contiguous_and_exclusive() {
        let c = coordinator(vec![worker("a", 1), worker("b", 1)], DistributionStrategy::Even);
        let ranges = c.distribute(5);
        assert_eq!(ranges[0].1, ranges[1].0);
        assert_eq!(ranges.last().unwrap().1, 5);
    }

    #[test]
    fn no_workers_yields_no_ranges() {
        let c = coordinator(vec![], DistributionStrategy::Even);
        assert!(c.distribute(10).is_empty());
    }

    #[test]
    fn round_robin_rotates_the_remainder_across_calls() {
        let c = coordinator(vec![worker("a", 1), worker("b", 1), worker("c", 1)], DistributionStrategy::RoundRobin);
        let first: Vec<u32> = c.distribute(10).iter().map(|(s, e)| e - s).collect();
        let second: Vec<u32> = c.distribute(10).iter().map(|(s, e)| e - s).collect();
        assert_eq!(first, vec![4, 3, 3]);
        assert_eq!(second, vec![3, 4, 3]);
    }

    #[test]
    fn geographic_distribution_splits_by_region_first() {
        let mut a = worker("a", 1);
        a.region = Some("us".into());
        let mut b = worker("b", 1);
        b.region = Some("us".into());
        let mut c = worker("c", 1);
        c.region = Some("eu".into());
        let coordinator = coordinator(vec![a, b, c], DistributionStrategy::Geographic);
        let ranges = coordinator.distribute(8);
        let sizes: Vec<u32> = ranges.iter().map(|(s, e)| e - s).collect();
        // 8 VUs split 4/4 between us/eu, then us's 4 split 2/2 across a and b.
        assert_eq!(sizes, vec![2, 2, 4]);
    }

    #[test]
    fn total_vus_for_stepping_phase_is_max_target() {
        let phase = LoadPhase::Stepping {
            stages: vec![
                crate::model::Stage { target: 5, duration: Duration::from_secs(1), ramp_up: None },
                crate::model::Stage { target: 20, duration: Duration::from_secs(1), ramp_up: None },
                crate::model::Stage { target: 10, duration: Duration::from_secs(1), ramp_up: None },
            ],
        };
        assert_eq!(total_vus_for_phase(&phase), 20);
    }
}
