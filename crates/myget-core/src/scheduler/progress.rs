//! Progress snapshots handed to the front end on every scheduler tick.
//!
//! The engine renders nothing; a [`ProgressSink`] receives per-block
//! `(start, downloaded, size)` plus the expected total and elapsed time.

use std::time::Duration;

use crate::block::BlockSnapshot;

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Expected size, `None` when the server did not say.
    pub total: Option<u64>,
    pub blocks: Vec<BlockSnapshot>,
    /// Time since the transfer phase started.
    pub elapsed: Duration,
    /// Bytes already on disk from an earlier run.
    pub resumed_bytes: u64,
}

impl ProgressSnapshot {
    /// Bytes received across all active blocks.
    pub fn bytes_done(&self) -> u64 {
        self.blocks
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.downloaded.max(0) as u64)
            .sum()
    }

    pub fn active_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_active()).count()
    }

    /// Download rate of this run in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done().saturating_sub(self.resumed_bytes) as f64 / secs
    }

    /// Fraction complete in [0.0, 1.0]; `None` for an unknown total.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.bytes_done() as f64 / total as f64).min(1.0))
    }

    /// Estimated time remaining (None if the total or the rate is unknown).
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.total?.saturating_sub(self.bytes_done());
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

/// Receives progress from the engine's control thread.
pub trait ProgressSink {
    fn report(&mut self, progress: &ProgressSnapshot);

    /// Called once after the last tick, whatever the outcome.
    fn finish(&mut self, _progress: &ProgressSnapshot) {}
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _progress: &ProgressSnapshot) {}
}
