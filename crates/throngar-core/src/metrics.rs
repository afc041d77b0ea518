//! Metrics collector: Start/Record/Snapshot/Finalize over the stream of
//! `TestResult`s.
//!
//! Grounded directly in the teacher's `engine::aggregator::StreamingAggregator`:
//! exact percentiles via a full sort of the buffered response-time vector,
//! and 1-second `BTreeMap` timeline buckets. The exact-vs-reservoir choice
//! is documented in DESIGN.md — the teacher's structure is exact, and a
//! configurable cap on the buffered sample vector bounds memory instead of
//! switching to an approximate method.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde::Serialize;

use crate::result::TestResult;

const DEFAULT_PERCENTILES: [f64; 5] = [50.0, 75.0, 90.0, 95.0, 99.0];
const DEFAULT_SAMPLE_CAP: usize = 1_000_000;
const TOP_ERRORS: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketStats {
    pub count: u64,
    pub success: u64,
    pub total_duration_ms: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StepStats {
    pub count: u64,
    pub success: u64,
    durations: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub min_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
    pub percentiles: HashMap<String, f64>,
    pub throughput_per_sec: f64,
    pub bytes_per_sec: f64,
    pub status_histogram: HashMap<u16, u64>,
    pub error_kind_distribution: HashMap<String, u64>,
    pub top_errors: Vec<(String, u64)>,
    pub per_step: HashMap<String, (u64, u64)>,
    pub timeline: BTreeMap<u64, BucketStats>,
}

pub struct StreamingAggregator {
    start: Instant,
    percentiles: Vec<f64>,
    sample_cap: usize,
    durations: Vec<u64>,
    total: u64,
    success: u64,
    bytes: u64,
    status_histogram: HashMap<u16, u64>,
    error_kind_distribution: HashMap<String, u64>,
    error_exemplars: HashMap<String, u64>,
    per_step: HashMap<String, StepStats>,
    timeline: BTreeMap<u64, BucketStats>,
}

impl StreamingAggregator {
    pub fn new(percentiles: Option<Vec<f64>>) -> Self {
        Self {
            start: Instant::now(),
            percentiles: percentiles.unwrap_or_else(|| DEFAULT_PERCENTILES.to_vec()),
            sample_cap: DEFAULT_SAMPLE_CAP,
            durations: Vec::new(),
            total: 0,
            success: 0,
            bytes: 0,
            status_histogram: HashMap::new(),
            error_kind_distribution: HashMap::new(),
            error_exemplars: HashMap::new(),
            per_step: HashMap::new(),
            timeline: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, result: &TestResult) {
        self.total += 1;
        if result.success {
            self.success += 1;
        }
        if self.durations.len() < self.sample_cap {
            self.durations.push(result.duration_ms);
        }
        self.bytes += result.response_size_bytes;

        if let Some(status) = result.status {
            *self.status_histogram.entry(status).or_insert(0) += 1;
        }
        if let Some(kind) = &result.error_kind {
            *self.error_kind_distribution.entry(kind.clone()).or_insert(0) += 1;
            let mut message: String = result.error_message.clone().unwrap_or_default();
            message.truncate(200);
            let key = format!(
                "{}|{}|{:?}|{}",
                result.scenario, result.action, result.status, message
            );
            *self.error_exemplars.entry(key).or_insert(0) += 1;
        }

        let step_entry = self.per_step.entry(result.step.clone()).or_insert_with(|| StepStats {
            count: 0,
            success: 0,
            durations: Vec::new(),
        });
        step_entry.count += 1;
        if result.success {
            step_entry.success += 1;
        }
        step_entry.durations.push(result.duration_ms);

        let bucket_key = self.start.elapsed().as_secs();
        let bucket = self.timeline.entry(bucket_key).or_default();
        bucket.count += 1;
        if result.success {
            bucket.success += 1;
        }
        bucket.total_duration_ms += result.duration_ms;
        bucket.bytes += result.response_size_bytes;
    }

    pub fn snapshot(&self) -> MetricsSummary {
        self.build_summary()
    }

    pub fn finalize(self) -> MetricsSummary {
        self.build_summary()
    }

    fn build_summary(&self) -> MetricsSummary {
        let mut sorted = self.durations.clone();
        sorted.sort_unstable();

        let min_ms = sorted.first().copied().unwrap_or(0);
        let max_ms = sorted.last().copied().unwrap_or(0);
        let avg_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        let percentiles = self
            .percentiles
            .iter()
            .map(|p| (format!("p{p}"), percentile(&sorted, *p)))
            .collect();

        let elapsed_secs = self.start.elapsed().as_secs_f64().max(0.001);
        let throughput_per_sec = self.total as f64 / elapsed_secs;
        let bytes_per_sec = self.bytes as f64 / elapsed_secs;

        let mut top_errors: Vec<(String, u64)> = self.error_exemplars.clone().into_iter().collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1));
        top_errors.truncate(TOP_ERRORS);

        let per_step = self
            .per_step
            .iter()
            .map(|(name, stats)| (name.clone(), (stats.count, stats.success)))
            .collect();

        MetricsSummary {
            total: self.total,
            success: self.success,
            failed: self.total - self.success,
            success_rate: if self.total == 0 { 0.0 } else { self.success as f64 / self.total as f64 },
            min_ms,
            avg_ms,
            max_ms,
            percentiles,
            throughput_per_sec,
            bytes_per_sec,
            status_histogram: self.status_histogram.clone(),
            error_kind_distribution: self.error_kind_distribution.clone(),
            top_errors,
            per_step,
            timeline: self.timeline.clone(),
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower] as f64
    } else {
        let frac = rank - lower as f64;
        sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn result(duration_ms: u64, success: bool, status: Option<u16>) -> TestResult {
        TestResult {
            id: Uuid::new_v4(),
            vu_id: 1,
            iteration: 0,
            scenario: "s".into(),
            step: "step1".into(),
            action: "rest".into(),
            timestamp: chrono::Utc::now(),
            duration_ms,
            success,
            status,
            error_kind: if success { None } else { Some("protocol_error".into()) },
            error_message: if success { None } else { Some("boom".into()) },
            url: None,
            method: None,
            response_headers: None,
            response_body: None,
            response_size_bytes: 100,
            custom_metrics: Default::default(),
            attempt: 1,
        }
    }

    #[test]
    fn records_success_rate() {
        let mut agg = StreamingAggregator::new(None);
        agg.record(&result(10, true, Some(200)));
        agg.record(&result(20, false, Some(500)));
        let summary = agg.snapshot();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.success_rate, 0.5);
    }

    #[test]
    fn percentile_of_single_value() {
        let mut agg = StreamingAggregator::new(None);
        agg.record(&result(42, true, Some(200)));
        let summary = agg.snapshot();
        assert_eq!(summary.percentiles["p50"], 42.0);
    }

    #[test]
    fn min_avg_max() {
        let mut agg = StreamingAggregator::new(None);
        for d in [10, 20, 30] {
            agg.record(&result(d, true, Some(200)));
        }
        let summary = agg.snapshot();
        assert_eq!(summary.min_ms, 10);
        assert_eq!(summary.max_ms, 30);
        assert_eq!(summary.avg_ms, 20.0);
    }

    #[test]
    fn status_histogram_tallies() {
        let mut agg = StreamingAggregator::new(None);
        agg.record(&result(1, true, Some(200)));
        agg.record(&result(1, true, Some(200)));
        agg.record(&result(1, false, Some(500)));
        let summary = agg.snapshot();
        assert_eq!(summary.status_histogram[&200], 2);
        assert_eq!(summary.status_histogram[&500], 1);
    }

    #[test]
    fn top_errors_truncates_and_sorts() {
        let mut agg = StreamingAggregator::new(None);
        for _ in 0..5 {
            agg.record(&result(1, false, Some(500)));
        }
        let summary = agg.snapshot();
        assert_eq!(summary.top_errors[0].1, 5);
    }

    #[test]
    fn timeline_buckets_by_elapsed_second() {
        let mut agg = StreamingAggregator::new(None);
        agg.record(&result(1, true, Some(200)));
        let summary = agg.snapshot();
        assert_eq!(summary.timeline.len(), 1);
        assert_eq!(summary.timeline.values().next().unwrap().count, 1);
    }
}
