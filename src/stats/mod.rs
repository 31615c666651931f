//! Statistics collection
//!
//! Workers hand every successful completion to the [`MetricsAggregator`] as a
//! [`Sample`]. The aggregator first asks the [`RampController`] whether the
//! sample is past the warm-up window, then folds it into the submitting
//! worker's shard:
//!
//! - one `Mutex` per worker, cache-line padded, so recording never contends
//!   with other workers and never false-shares
//! - counters plus an HdrHistogram per shard, O(1) per sample and constant
//!   memory for any run length
//!
//! At the end of the run [`MetricsAggregator::finalize`] merges the shards
//! into one read-only [`MetricsSnapshot`]. Progress while the run is going
//! is tracked separately by [`progress::Progress`].
//!
//! # Example
//!
//! ```
//! use holebench::stats::{MetricsAggregator, Sample};
//! use std::time::{Duration, Instant};
//!
//! let metrics = MetricsAggregator::new(1, Duration::ZERO).unwrap();
//! let start = metrics.ramp().mark_start();
//! metrics.record(0, Sample {
//!     latency: Duration::from_micros(80),
//!     bytes: 4096,
//!     completed_at: start + Duration::from_millis(1),
//! });
//!
//! let snapshot = metrics.finalize().unwrap();
//! assert_eq!(snapshot.ops, 1);
//! assert_eq!(snapshot.bytes, 4096);
//! ```

pub mod histogram;
pub mod progress;
pub mod ramp;

use crate::Result;
use crate::util::format::per_second;
use crossbeam::utils::CachePadded;
use histogram::LatencyHistogram;
use ramp::RampController;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One successful write, as seen by the statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub latency: Duration,
    pub bytes: u32,
    pub completed_at: Instant,
}

/// Cache-line aligned atomic counter
///
/// Shared by all workers, so it gets a cache line of its own.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct AlignedCounter {
    value: AtomicU64,
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `val` and return the new total
    #[inline]
    pub fn add(&self, val: u64) -> u64 {
        self.value.fetch_add(val, Ordering::Relaxed) + val
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-worker accumulator
#[derive(Debug)]
struct Shard {
    ops: u64,
    bytes: u64,
    failed: u64,
    histogram: LatencyHistogram,
    last_completed: Option<Instant>,
}

impl Shard {
    fn new() -> Result<Self> {
        Ok(Self {
            ops: 0,
            bytes: 0,
            failed: 0,
            histogram: LatencyHistogram::new()?,
            last_completed: None,
        })
    }
}

/// Latency summary of the measured samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub p999: Duration,
    pub max: Duration,
}

impl LatencySummary {
    fn from_histogram(hist: &LatencyHistogram) -> Option<Self> {
        Some(Self {
            min: hist.min()?,
            mean: hist.mean()?,
            p50: hist.percentile(50.0)?,
            p99: hist.percentile(99.0)?,
            p999: hist.percentile(99.9)?,
            max: hist.max()?,
        })
    }
}

/// Final, read-only statistics of a run
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Successful writes measured after the ramp
    pub ops: u64,
    /// Bytes written by those operations
    pub bytes: u64,
    /// Operations that finished with an error, ramp or not
    pub failed_ops: u64,
    /// Successful writes kept out of the statistics by the ramp
    pub ramp_discarded: u64,
    /// From the end of the ramp to the last measured completion
    pub window: Duration,
    /// `None` when no sample survived the ramp
    pub latency: Option<LatencySummary>,
    /// Per-worker measured op counts
    pub worker_ops: Vec<u64>,
}

impl MetricsSnapshot {
    /// Bytes per second over the measurement window
    pub fn throughput(&self) -> f64 {
        per_second(self.bytes, self.window)
    }

    pub fn ops_per_sec(&self) -> f64 {
        per_second(self.ops, self.window)
    }

    /// True when no sample was measured
    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }
}

/// Thread-safe accumulator of samples from all workers
#[derive(Debug)]
pub struct MetricsAggregator {
    ramp: RampController,
    shards: Vec<CachePadded<Mutex<Shard>>>,
    failed: AlignedCounter,
}

impl MetricsAggregator {
    /// Aggregator for `workers` workers with a `ramp` warm-up window
    pub fn new(workers: usize, ramp: Duration) -> Result<Self> {
        let shards = (0..workers.max(1))
            .map(|_| Shard::new().map(|shard| CachePadded::new(Mutex::new(shard))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ramp: RampController::new(ramp),
            shards,
            failed: AlignedCounter::new(),
        })
    }

    pub fn ramp(&self) -> &RampController {
        &self.ramp
    }

    /// Record a successful write by `worker`
    ///
    /// Returns false if the ramp kept the sample out of the statistics.
    pub fn record(&self, worker: usize, sample: Sample) -> bool {
        if !self.ramp.admit(&sample) {
            return false;
        }

        let mut shard = self.shard(worker);
        shard.ops += 1;
        shard.bytes += sample.bytes as u64;
        shard.histogram.record(sample.latency);
        shard.last_completed = shard.last_completed.max(Some(sample.completed_at));
        true
    }

    /// Record a failed write by `worker`, returning the run-wide failure count
    pub fn record_failure(&self, worker: usize) -> u64 {
        self.shard(worker).failed += 1;
        self.failed.add(1)
    }

    /// Failed operations so far, across all workers
    pub fn failed_ops(&self) -> u64 {
        self.failed.get()
    }

    /// Merge all shards into the final snapshot
    pub fn finalize(&self) -> Result<MetricsSnapshot> {
        let mut histogram = LatencyHistogram::new()?;
        let mut ops = 0;
        let mut bytes = 0;
        let mut last_completed = None;
        let mut worker_ops = Vec::with_capacity(self.shards.len());

        for index in 0..self.shards.len() {
            let shard = self.shard(index);
            histogram.merge(&shard.histogram)?;
            ops += shard.ops;
            bytes += shard.bytes;
            last_completed = last_completed.max(shard.last_completed);
            worker_ops.push(shard.ops);
        }

        let window = match (self.ramp.measurement_start(), last_completed) {
            (Some(start), Some(last)) => last.saturating_duration_since(start),
            _ => Duration::ZERO,
        };

        Ok(MetricsSnapshot {
            ops,
            bytes,
            failed_ops: self.failed.get(),
            ramp_discarded: self.ramp.discarded(),
            window,
            latency: LatencySummary::from_histogram(&histogram),
            worker_ops,
        })
    }

    fn shard(&self, worker: usize) -> MutexGuard<'_, Shard> {
        // Out-of-range workers share the last shard rather than panic
        let index = worker.min(self.shards.len() - 1);
        // A shard only holds counters; a panicked holder leaves them usable
        self.shards[index].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(latency_us: u64, completed_at: Instant) -> Sample {
        Sample {
            latency: Duration::from_micros(latency_us),
            bytes: 4096,
            completed_at,
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsAggregator::new(2, Duration::ZERO).unwrap();
        let snapshot = metrics.finalize().unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.latency.is_none());
        assert_eq!(snapshot.window, Duration::ZERO);
        assert_eq!(snapshot.throughput(), 0.0);
        assert_eq!(snapshot.worker_ops, vec![0, 0]);
    }

    #[test]
    fn test_counts_and_window() {
        let metrics = MetricsAggregator::new(2, Duration::ZERO).unwrap();
        let start = metrics.ramp().mark_start();

        for i in 1..=10 {
            metrics.record(0, sample(i * 10, start + Duration::from_millis(i * 100)));
        }
        metrics.record(1, sample(500, start + Duration::from_millis(500)));

        let snapshot = metrics.finalize().unwrap();
        assert_eq!(snapshot.ops, 11);
        assert_eq!(snapshot.bytes, 11 * 4096);
        assert_eq!(snapshot.window, Duration::from_secs(1));
        assert_eq!(snapshot.worker_ops, vec![10, 1]);
        assert!((snapshot.ops_per_sec() - 11.0).abs() < 1e-9);
        assert!((snapshot.throughput() - 11.0 * 4096.0).abs() < 1e-6);

        let latency = snapshot.latency.unwrap();
        assert!(latency.min <= latency.p50);
        assert!(latency.p50 <= latency.p99);
        assert!(latency.p99 <= latency.p999);
        assert!(latency.p999 <= latency.max);
    }

    #[test]
    fn test_ramp_samples_excluded() {
        let metrics = MetricsAggregator::new(1, Duration::from_secs(1)).unwrap();
        let start = metrics.ramp().mark_start();

        assert!(!metrics.record(0, sample(10, start + Duration::from_millis(100))));
        assert!(!metrics.record(0, sample(10, start + Duration::from_millis(900))));
        assert!(metrics.record(0, sample(10, start + Duration::from_millis(1500))));

        let snapshot = metrics.finalize().unwrap();
        assert_eq!(snapshot.ops, 1);
        assert_eq!(snapshot.ramp_discarded, 2);
        assert_eq!(snapshot.window, Duration::from_millis(500));
    }

    #[test]
    fn test_failures_counted_across_workers() {
        let metrics = MetricsAggregator::new(3, Duration::ZERO).unwrap();
        assert_eq!(metrics.record_failure(0), 1);
        assert_eq!(metrics.record_failure(2), 2);
        assert_eq!(metrics.failed_ops(), 2);
        assert_eq!(metrics.finalize().unwrap().failed_ops, 2);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(MetricsAggregator::new(4, Duration::ZERO).unwrap());
        let start = metrics.ramp().mark_start();

        std::thread::scope(|s| {
            for worker in 0..4 {
                let metrics = &metrics;
                s.spawn(move || {
                    for i in 0..1000 {
                        metrics.record(worker, sample(1 + i % 50, start + Duration::from_micros(i)));
                    }
                });
            }
        });

        let snapshot = metrics.finalize().unwrap();
        assert_eq!(snapshot.ops, 4000);
        assert_eq!(snapshot.bytes, 4000 * 4096);
        assert_eq!(snapshot.worker_ops, vec![1000; 4]);
    }

    #[test]
    fn test_aligned_counter() {
        let counter = AlignedCounter::new();
        assert_eq!(std::mem::align_of::<AlignedCounter>(), 64);
        assert_eq!(counter.add(5), 5);
        assert_eq!(counter.add(2), 7);
        assert_eq!(counter.get(), 7);
    }
}
