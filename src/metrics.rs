//! Throughput, latency and decision-mix tracking for the scoring service.

use crate::error::ErrorClass;
use crate::types::decision::{Decision, ScoreResponse};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the scoring service
pub struct PipelineMetrics {
    /// Requests answered with a response
    pub requests_processed: AtomicU64,
    /// Requests that failed as a whole
    pub requests_failed: AtomicU64,
    /// Rows that received a decision
    pub rows_scored: AtomicU64,
    /// Rows rejected individually
    pub rows_rejected: AtomicU64,
    decisions: RwLock<BTreeMap<Decision, u64>>,
    failures_by_class: RwLock<BTreeMap<String, u64>>,
    /// Request processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// P(fraud) distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            rows_rejected: AtomicU64::new(0),
            decisions: RwLock::new(BTreeMap::new()),
            failures_by_class: RwLock::new(BTreeMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record an answered request
    pub fn record_response(&self, processing_time: Duration, response: &ScoreResponse) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        self.rows_scored
            .fetch_add(response.results.len() as u64, Ordering::Relaxed);
        self.rows_rejected
            .fetch_add(response.rejected.len() as u64, Ordering::Relaxed);

        {
            let mut times = self.processing_times.write();
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent window
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        {
            let mut decisions = self.decisions.write();
            let mut buckets = self.score_buckets.write();
            for row in &response.results {
                *decisions.entry(row.decision).or_insert(0) += 1;
                let bucket = (row.score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
                buckets[bucket] += 1;
            }
        }

        if !response.rejected.is_empty() {
            let mut failures = self.failures_by_class.write();
            for row in &response.rejected {
                *failures.entry(row.error_class.to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Record a request that failed as a whole
    pub fn record_failure(&self, class: ErrorClass) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        *self
            .failures_by_class
            .write()
            .entry(class.to_string())
            .or_insert(0) += 1;
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = self.processing_times.read().clone();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Scored rows per second since start
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_decisions(&self) -> BTreeMap<Decision, u64> {
        self.decisions.read().clone()
    }

    pub fn get_failures_by_class(&self) -> BTreeMap<String, u64> {
        self.failures_by_class.read().clone()
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let requests = self.requests_processed.load(Ordering::Relaxed);
        let failed = self.requests_failed.load(Ordering::Relaxed);
        let scored = self.rows_scored.load(Ordering::Relaxed);
        let rejected = self.rows_rejected.load(Ordering::Relaxed);

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let decisions = self.get_decisions();
        let failures = self.get_failures_by_class();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             FRAUD RISK SCORING - METRICS SUMMARY             ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests: {:>8} ok / {:>6} failed  │  {:>7.1} rows/s      ║",
            requests, failed, throughput
        );
        info!(
            "║ Rows Scored: {:>8}  │  Rows Rejected: {:>8}              ║",
            scored, rejected
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Decisions:                                                   ║");
        for (decision, count) in &decisions {
            let pct = if scored > 0 {
                (*count as f64 / scored as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:8}: {:>8} ({:>5.1}%)                                ║", decision.as_str(), count, pct);
        }
        if !failures.is_empty() {
            info!("║ Failures by class:                                           ║");
            for (class, count) in &failures {
                info!("║   {:18}: {:>8}                               ║", class, count);
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Score Distribution:                                          ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a summary every `interval_secs`
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::decision::{RejectedRow, ScoredRow};

    fn scored(seq: i64, score: f64, decision: Decision) -> ScoredRow {
        ScoredRow {
            transaction_seq: seq,
            score,
            decision,
            threshold_low: 0.3,
            threshold_high: Some(0.7),
            model_version: "v1".to_string(),
            reasons: Vec::new(),
        }
    }

    #[test]
    fn test_record_response() {
        let metrics = PipelineMetrics::new();
        let response = ScoreResponse {
            request_id: "r1".to_string(),
            model_version: "v1".to_string(),
            registry_version: 1,
            results: vec![
                scored(1, 0.1, Decision::Allow),
                scored(2, 0.5, Decision::Review),
                scored(3, 1.0, Decision::Block),
            ],
            rejected: vec![RejectedRow {
                transaction_seq: 4,
                error_class: ErrorClass::BadInput,
                message: "bad date".to_string(),
            }],
        };
        metrics.record_response(Duration::from_micros(250), &response);
        metrics.record_failure(ErrorClass::Unavailable);

        assert_eq!(metrics.requests_processed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.rows_scored.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.rows_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_decisions().get(&Decision::Block), Some(&1));

        let dist = metrics.get_score_distribution();
        assert_eq!(dist[1], 1);
        assert_eq!(dist[5], 1);
        assert_eq!(dist[9], 1);

        let failures = metrics.get_failures_by_class();
        assert_eq!(failures.get("bad_input"), Some(&1));
        assert_eq!(failures.get("unavailable"), Some(&1));
    }

    #[test]
    fn test_processing_stats() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.get_processing_stats(), ProcessingStats::default());

        let empty = ScoreResponse {
            request_id: "r".to_string(),
            model_version: "v1".to_string(),
            registry_version: 1,
            results: Vec::new(),
            rejected: Vec::new(),
        };
        for us in [100, 300, 200] {
            metrics.record_response(Duration::from_micros(us), &empty);
        }
        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.mean_us, 200);
        assert_eq!(stats.p50_us, 200);
        assert_eq!(stats.max_us, 300);
    }
}
