//! Run statistics for all simulated users.
//!
//! Latencies go into HDR histograms (1μs to 60s, 3 significant digits), the
//! same way for the run as a whole and for each task name. Counters are
//! shared by every user through an `Arc<RunStats>`; the final report reads
//! one [`StatsSnapshot`] at shutdown.

use hdrhistogram::Histogram;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::errors::ErrorCategory;

const HISTOGRAM_MAX_US: u64 = 60_000_000;

/// Thread-safe latency histogram, values stored in microseconds.
pub struct LatencyHistogram {
    histogram: Mutex<Histogram<u64>>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, HISTOGRAM_MAX_US, 3)
            .expect("histogram bounds are static and valid");

        Self {
            histogram: Mutex::new(histogram),
        }
    }

    pub fn record(&self, latency: Duration) {
        let latency_us = latency.as_micros().min(u128::from(HISTOGRAM_MAX_US)) as u64;
        let clamped = latency_us.clamp(1, HISTOGRAM_MAX_US);

        let mut hist = self.histogram.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = hist.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    fn summary(&self) -> LatencySummary {
        let hist = self.histogram.lock().unwrap_or_else(|e| e.into_inner());
        if hist.is_empty() {
            return LatencySummary::default();
        }
        LatencySummary {
            median_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
            p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct LatencySummary {
    median_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    mean_ms: f64,
    max_ms: f64,
}

#[derive(Default)]
struct TaskStats {
    requests: u64,
    failures: u64,
    latencies: LatencyHistogram,
}

/// Aggregate counters over every tracked request of a run.
pub struct RunStats {
    started: Instant,
    requests: AtomicU64,
    failures: AtomicU64,
    points_sent: AtomicU64,
    user_startup_failures: AtomicU64,
    latencies: LatencyHistogram,
    tasks: Mutex<HashMap<String, TaskStats>>,
    failure_categories: Mutex<HashMap<ErrorCategory, u64>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            points_sent: AtomicU64::new(0),
            user_startup_failures: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            tasks: Mutex::new(HashMap::new()),
            failure_categories: Mutex::new(HashMap::new()),
        }
    }

    /// Records one tracked request.
    ///
    /// `outcome` is `Err(category)` for any non-success response or transport
    /// error; the latency is recorded either way.
    pub fn record(
        &self,
        task: &str,
        points: usize,
        latency: Duration,
        outcome: Result<(), ErrorCategory>,
    ) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.points_sent.fetch_add(points as u64, Ordering::Relaxed);
        self.latencies.record(latency);

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            let entry = tasks.entry(task.to_string()).or_default();
            entry.requests += 1;
            entry.latencies.record(latency);
            if outcome.is_err() {
                entry.failures += 1;
            }
        }

        if let Err(category) = outcome {
            self.failures.fetch_add(1, Ordering::Relaxed);
            let mut categories = self
                .failure_categories
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *categories.entry(category).or_insert(0) += 1;
        }
    }

    pub fn record_user_startup_failure(&self) {
        self.user_startup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Reads the final aggregate view of the run.
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.elapsed();
        let requests = self.requests();
        let overall = self.latencies.summary();

        let rps = if elapsed.as_secs_f64() > 0.0 {
            requests as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let tasks = {
            let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            let mut snapshots: Vec<TaskSnapshot> = tasks
                .iter()
                .map(|(name, stats)| {
                    let summary = stats.latencies.summary();
                    TaskSnapshot {
                        name: name.clone(),
                        requests: stats.requests,
                        failures: stats.failures,
                        median_ms: summary.median_ms,
                        p95_ms: summary.p95_ms,
                        p99_ms: summary.p99_ms,
                        mean_ms: summary.mean_ms,
                        max_ms: summary.max_ms,
                    }
                })
                .collect();
            snapshots.sort_by(|a, b| a.name.cmp(&b.name));
            snapshots
        };

        let failures_by_category = self
            .failure_categories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(category, count)| (*category, *count))
            .collect();

        StatsSnapshot {
            requests,
            failures: self.failures(),
            points_sent: self.points_sent.load(Ordering::Relaxed),
            user_startup_failures: self.user_startup_failures.load(Ordering::Relaxed),
            median_ms: overall.median_ms,
            p95_ms: overall.p95_ms,
            p99_ms: overall.p99_ms,
            rps,
            elapsed,
            tasks,
            failures_by_category,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task view inside a [`StatsSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time copy of the run statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub points_sent: u64,
    pub user_startup_failures: u64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub rps: f64,
    pub elapsed: Duration,

    /// Sorted by task name
    pub tasks: Vec<TaskSnapshot>,

    pub failures_by_category: BTreeMap<ErrorCategory, u64>,
}

impl StatsSnapshot {
    pub fn task(&self, name: &str) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}
