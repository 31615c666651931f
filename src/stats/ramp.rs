//! Ramp-up gate
//!
//! The clock starts at the first submitted request, not at process start, so
//! file creation and backend setup never eat into the warm-up window. Samples
//! that complete inside `[start, start + ramp)` still count as finished work
//! but are kept out of the reported statistics.

use super::Sample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RampController {
    ramp: Duration,
    start: OnceLock<Instant>,
    discarded: AtomicU64,
}

impl RampController {
    pub fn new(ramp: Duration) -> Self {
        Self {
            ramp,
            start: OnceLock::new(),
            discarded: AtomicU64::new(0),
        }
    }

    /// Record the first submission; later calls keep the original instant
    pub fn mark_start(&self) -> Instant {
        *self.start.get_or_init(Instant::now)
    }

    /// Time of the first submission, if any
    pub fn start(&self) -> Option<Instant> {
        self.start.get().copied()
    }

    /// First instant whose completions are measured
    pub fn measurement_start(&self) -> Option<Instant> {
        self.start().map(|start| start + self.ramp)
    }

    /// Decide whether `sample` enters the statistics
    ///
    /// Returns false and counts the sample as discarded while ramping. A
    /// sample seen before any submission was marked starts the clock itself.
    pub fn admit(&self, sample: &Sample) -> bool {
        if self.ramp.is_zero() {
            return true;
        }
        let start = *self.start.get_or_init(|| sample.completed_at);
        if sample.completed_at < start + self.ramp {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            true
        }
    }

    /// Samples kept out of the statistics so far
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(completed_at: Instant) -> Sample {
        Sample {
            latency: Duration::from_micros(10),
            bytes: 4096,
            completed_at,
        }
    }

    #[test]
    fn test_zero_ramp_admits_everything() {
        let ramp = RampController::new(Duration::ZERO);
        let start = ramp.mark_start();
        assert!(ramp.admit(&sample_at(start)));
        assert_eq!(ramp.discarded(), 0);
        assert_eq!(ramp.measurement_start(), Some(start));
    }

    #[test]
    fn test_samples_inside_window_are_discarded() {
        let ramp = RampController::new(Duration::from_secs(2));
        let start = ramp.mark_start();

        assert!(!ramp.admit(&sample_at(start)));
        assert!(!ramp.admit(&sample_at(start + Duration::from_millis(1999))));
        assert!(ramp.admit(&sample_at(start + Duration::from_secs(2))));
        assert!(ramp.admit(&sample_at(start + Duration::from_secs(5))));
        assert_eq!(ramp.discarded(), 2);
    }

    #[test]
    fn test_start_is_set_once() {
        let ramp = RampController::new(Duration::from_secs(1));
        assert!(ramp.start().is_none());
        let first = ramp.mark_start();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ramp.mark_start(), first);
        assert_eq!(ramp.measurement_start(), Some(first + Duration::from_secs(1)));
    }

    #[test]
    fn test_ramp_longer_than_run_discards_all() {
        let ramp = RampController::new(Duration::from_secs(3600));
        let start = ramp.mark_start();
        for i in 0..100 {
            assert!(!ramp.admit(&sample_at(start + Duration::from_millis(i))));
        }
        assert_eq!(ramp.discarded(), 100);
    }
}
