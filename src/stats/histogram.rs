//! Latency histogram using HdrHistogram
//!
//! Thin wrapper that records [`Duration`]s in nanoseconds and answers
//! percentile queries. Recording is O(1) and memory stays constant no matter
//! how long the run is.
//!
//! # Features
//!
//! - **Wide range**: 1 nanosecond to 1 hour
//! - **Precision**: 3 significant digits, so every reported value is within
//!   0.1% of the recorded one
//! - **Mergeable**: per-worker histograms fold into one at the end of a run
//!
//! # Example
//!
//! ```
//! use holebench::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new().unwrap();
//! hist.record(Duration::from_micros(100));
//! hist.record(Duration::from_micros(200));
//!
//! assert_eq!(hist.len(), 2);
//! assert!(hist.percentile(50.0).unwrap() <= hist.percentile(99.0).unwrap());
//! ```

use crate::error::BenchError;
use crate::Result;
use hdrhistogram::Histogram;
use std::io;
use std::time::Duration;

/// Lowest trackable latency, 1ns
const LOWEST_NANOS: u64 = 1;

/// Highest trackable latency, 1 hour
const HIGHEST_NANOS: u64 = 3_600_000_000_000;

/// Significant digits, i.e. 0.1% precision
const SIGFIG: u8 = 3;

/// Latency histogram wrapper
///
/// Tracks latencies from 1 nanosecond to 1 hour with 3 significant digits.
/// Values outside that range are clamped rather than dropped.
///
/// # Precision
///
/// - Values are accurate to within 0.1% of the recorded value
/// - Recording and querying are O(1)
/// - Memory use is fixed by the range and precision, not by the sample count
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create an empty histogram covering 1ns to 1 hour
    ///
    /// # Errors
    ///
    /// `BenchError::Resource` if the bucket array cannot be set up.
    pub fn new() -> Result<Self> {
        let histogram = Histogram::new_with_bounds(LOWEST_NANOS, HIGHEST_NANOS, SIGFIG)
            .map_err(|e| {
                BenchError::resource(
                    "allocate latency histogram",
                    io::Error::new(io::ErrorKind::OutOfMemory, e.to_string()),
                )
            })?;
        Ok(Self { histogram })
    }

    /// Record one latency sample
    ///
    /// # Arguments
    ///
    /// * `latency` - Submit-to-completion time; clamped into the tracked range
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let value = nanos.clamp(LOWEST_NANOS, HIGHEST_NANOS);
        // In range after clamping, so this cannot fail
        let _ = self.histogram.record(value);
    }

    /// Latency at `percentile`
    ///
    /// # Arguments
    ///
    /// * `percentile` - Percentile to query, 0.0 to 100.0 (e.g. 99.9)
    ///
    /// # Returns
    ///
    /// The recorded value at that percentile, or `None` if nothing was recorded.
    ///
    /// # Example
    ///
    /// ```
    /// use holebench::stats::histogram::LatencyHistogram;
    /// use std::time::Duration;
    ///
    /// let mut hist = LatencyHistogram::new().unwrap();
    /// for us in 1..=1000 {
    ///     hist.record(Duration::from_micros(us));
    /// }
    ///
    /// let p99 = hist.percentile(99.0).unwrap();
    /// assert!(p99 >= Duration::from_micros(980) && p99 <= Duration::from_micros(1000));
    /// ```
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.value_at_percentile(percentile)))
    }

    /// Smallest recorded latency, `None` if empty
    pub fn min(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.min()))
    }

    /// Largest recorded latency, `None` if empty
    pub fn max(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.max()))
    }

    /// Arithmetic mean of the recorded latencies, `None` if empty
    pub fn mean(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.mean() as u64))
    }

    /// Number of samples recorded
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }

    /// Add every sample of `other` to this histogram
    ///
    /// Used to fold the per-worker histograms into one at the end of a run.
    ///
    /// # Errors
    ///
    /// `BenchError::Resource` if the combined counts cannot be stored.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<()> {
        self.histogram.add(&other.histogram).map_err(|e| {
            BenchError::resource(
                "merge latency histograms",
                io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            )
        })
    }
}
