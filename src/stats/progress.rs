//! Run progress
//!
//! Workers report every block that reached a final state, written or given
//! up on. Each time the run-wide count crosses a multiple of the reporting
//! interval, the worker that crossed it logs how much of the plan remains.

use super::AlignedCounter;

/// Finished blocks between two progress lines
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Run-wide count of finished write blocks
#[derive(Debug)]
pub struct Progress {
    planned: u64,
    interval: u64,
    finished: AlignedCounter,
}

/// One progress report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub finished: u64,
    pub planned: u64,
    /// Share of the planned writes still outstanding, 0.0 - 100.0
    pub remaining_percent: f64,
}

impl Progress {
    /// Track `planned` writes, reporting every `interval` finished blocks
    ///
    /// An `interval` of 0 turns reporting off.
    pub fn new(planned: u64, interval: u64) -> Self {
        Self {
            planned,
            interval,
            finished: AlignedCounter::new(),
        }
    }

    /// Count one finished block
    ///
    /// # Returns
    ///
    /// `Some` for exactly one caller per interval boundary, `None` otherwise.
    pub fn advance(&self) -> Option<ProgressUpdate> {
        let finished = self.finished.add(1);
        if self.interval == 0 || self.planned == 0 || finished % self.interval != 0 {
            return None;
        }

        let remaining = self.planned.saturating_sub(finished);
        Some(ProgressUpdate {
            finished,
            planned: self.planned,
            remaining_percent: remaining as f64 * 100.0 / self.planned as f64,
        })
    }

    pub fn finished(&self) -> u64 {
        self.finished.get()
    }
}
