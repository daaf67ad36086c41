//! Control-thread scheduling: merges, reaping and the active count.
//!
//! Each tick walks the block array in order. A block whose worker finished
//! its range early (`Waiting`) absorbs the forward neighbour that starts at
//! its end, provided that neighbour has no progress and is idle or done.
//! Exited workers are joined and their files closed. A revoked neighbour's
//! thread is left to unwind on its own and reaped on a later tick, so the
//! control thread never waits on a connection. The tick returns how many
//! blocks are still live.

mod progress;

pub use progress::{NullProgress, ProgressSink, ProgressSnapshot};

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::block::{Block, BlockSnapshot, BlockState};
use crate::retry::TransferError;
use crate::worker::WorkerOutcome;

pub(crate) struct Scheduler {
    blocks: Arc<[Block]>,
    workers: Vec<Option<JoinHandle<WorkerOutcome>>>,
    failure: Option<TransferError>,
}

impl Scheduler {
    pub(crate) fn new(blocks: Arc<[Block]>) -> Self {
        let workers = (0..blocks.len()).map(|_| None).collect();
        Self {
            blocks,
            workers,
            failure: None,
        }
    }

    pub(crate) fn attach(&mut self, index: usize, handle: JoinHandle<WorkerOutcome>) {
        self.workers[index] = Some(handle);
    }

    pub(crate) fn snapshots(&self) -> Vec<BlockSnapshot> {
        self.blocks.iter().map(Block::snapshot).collect()
    }

    /// Bytes received across active blocks.
    pub(crate) fn downloaded(&self) -> u64 {
        self.blocks
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.downloaded().max(0) as u64)
            .sum()
    }

    /// First fatal error a worker reported.
    pub(crate) fn take_failure(&mut self) -> Option<TransferError> {
        self.failure.take()
    }

    /// One scheduling pass. Returns the number of blocks not yet joined.
    pub(crate) fn tick(&mut self) -> usize {
        let mut finished = 0;
        for i in 0..self.blocks.len() {
            match self.blocks[i].state() {
                BlockState::Waiting => {
                    self.try_absorb(i);
                }
                BlockState::Exited => {
                    self.reap(i, false);
                    self.blocks[i].set_state(BlockState::Joined);
                    finished += 1;
                }
                BlockState::Joined => {
                    if self.workers[i].is_none() {
                        finished += 1;
                    } else if self.workers[i].as_ref().map_or(false, JoinHandle::is_finished) {
                        self.reap(i, true);
                        finished += 1;
                    }
                }
                _ => {}
            }
        }
        self.blocks.len() - finished
    }

    /// Grow block `i` over its forward neighbour. Returns true on a merge.
    fn try_absorb(&mut self, i: usize) -> bool {
        let blocks = Arc::clone(&self.blocks);
        let block = &blocks[i];
        let end = block.end();
        let Some(j) = (i + 1..blocks.len()).find(|&j| blocks[j].is_active() && blocks[j].start() == end)
        else {
            return false;
        };
        let next = &blocks[j];
        if next.downloaded() != 0 {
            return false;
        }

        let revoked = match next.state() {
            BlockState::Stopped => {
                if !next.transition(BlockState::Stopped, BlockState::Cancelled) {
                    return false;
                }
                if next.downloaded() != 0 {
                    next.transition(BlockState::Cancelled, BlockState::Stopped);
                    return false;
                }
                true
            }
            BlockState::Exited | BlockState::Joined => false,
            _ => return false,
        };

        let extra = next.size();
        block.grow(extra);
        if !block.transition(BlockState::Waiting, BlockState::Woken) {
            // The worker gave up waiting; hand the neighbour back.
            block.grow(-extra);
            if revoked {
                next.transition(BlockState::Cancelled, BlockState::Stopped);
            }
            return false;
        }

        tracing::debug!(
            "block {} absorbed block {} ({} bytes at {}), now {}..{}",
            i,
            j,
            extra,
            end,
            block.start(),
            block.end()
        );
        next.invalidate();
        if next.state() == BlockState::Exited {
            self.reap(j, true);
            next.set_state(BlockState::Joined);
        } else {
            // The revoked worker parks until it sees JOINED; `tick` reaps it
            // once its thread has finished.
            next.set_state(BlockState::Joined);
        }
        true
    }

    /// Join worker `i` and close its file, rolling back bytes that never
    /// reached the disk. Errors of absorbed blocks are moot.
    fn reap(&mut self, i: usize, absorbed: bool) {
        let Some(handle) = self.workers[i].take() else {
            return;
        };
        let blocks = Arc::clone(&self.blocks);
        let block = &blocks[i];
        let outcome = match handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("worker {} panicked", i);
                self.record(TransferError::Protocol(format!("worker {} panicked", i)));
                return;
            }
        };
        debug_assert_eq!(outcome.index, i);

        if let Some(file) = outcome.file {
            if let Err(e) = file.close() {
                tracing::warn!("block {}: {}", i, e);
                block.roll_back(e.unflushed);
                if !absorbed {
                    self.record(TransferError::Storage(e.source));
                }
            }
        }
        match outcome.result {
            Ok(()) => tracing::debug!(
                "worker {} joined with {}/{} bytes",
                i,
                block.downloaded(),
                block.size()
            ),
            Err(e) if e.is_cancelled() || absorbed => {}
            Err(e) => self.record(e),
        }
    }

    fn record(&mut self, e: TransferError) {
        if self.failure.is_none() {
            self.failure = Some(e);
        }
    }

    /// Join every worker not yet joined (after the halt flag was raised).
    pub(crate) fn halt_all(&mut self) {
        for i in 0..self.blocks.len() {
            let absorbed = self.blocks[i].state() == BlockState::Joined;
            if !absorbed || self.workers[i].is_some() {
                self.reap(i, absorbed);
                self.blocks[i].set_state(BlockState::Joined);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn blocks(ranges: &[(i64, i64, i64)]) -> Arc<[Block]> {
        ranges
            .iter()
            .map(|&(start, downloaded, size)| {
                Block::new(BlockSnapshot {
                    start,
                    downloaded,
                    size,
                })
            })
            .collect()
    }

    fn active_ranges(s: &Scheduler) -> Vec<(i64, i64)> {
        let mut r: Vec<_> = s
            .snapshots()
            .into_iter()
            .filter(|b| b.is_active())
            .map(|b| (b.start, b.end()))
            .collect();
        r.sort();
        r
    }

    fn assert_tiles(s: &Scheduler, size: i64) {
        let mut cursor = 0;
        for (start, end) in active_ranges(s) {
            assert_eq!(start, cursor, "gap or overlap at {}", start);
            cursor = end;
        }
        assert_eq!(cursor, size);
    }

    #[test]
    fn waiting_block_absorbs_idle_neighbour() {
        let b = blocks(&[(0, 250, 250), (250, 0, 250), (500, 10, 500)]);
        b[0].set_state(BlockState::Waiting);
        let mut s = Scheduler::new(Arc::clone(&b));

        assert_eq!(s.tick(), 2);
        assert_eq!(b[0].size(), 500);
        assert_eq!(b[0].state(), BlockState::Woken);
        assert_eq!(b[1].start(), -1);
        assert_eq!(b[1].size(), 0);
        assert_eq!(b[1].state(), BlockState::Joined);
        assert_tiles(&s, 1000);
    }

    #[test]
    fn neighbour_with_progress_is_kept() {
        let b = blocks(&[(0, 4, 4), (4, 1, 4)]);
        b[0].set_state(BlockState::Waiting);
        let mut s = Scheduler::new(Arc::clone(&b));
        assert_eq!(s.tick(), 2);
        assert_eq!(b[0].size(), 4);
        assert_eq!(b[0].state(), BlockState::Waiting);
        assert_eq!(b[1].state(), BlockState::Stopped);
    }

    #[test]
    fn transferring_neighbour_is_kept() {
        let b = blocks(&[(0, 4, 4), (4, 0, 4)]);
        b[0].set_state(BlockState::Waiting);
        b[1].set_state(BlockState::Transferring);
        let mut s = Scheduler::new(Arc::clone(&b));
        s.tick();
        assert_eq!(b[0].size(), 4);
        assert!(b[1].is_active());
    }

    #[test]
    fn lost_wake_race_releases_neighbour() {
        let b = blocks(&[(0, 4, 4), (4, 0, 4)]);
        b[0].set_state(BlockState::Exited);
        let mut s = Scheduler::new(Arc::clone(&b));
        assert!(!s.try_absorb(0));
        assert_eq!(b[0].size(), 4);
        assert_eq!(b[1].state(), BlockState::Stopped);
        assert_tiles(&s, 8);
    }

    #[test]
    fn exited_zero_progress_neighbour_is_absorbed() {
        let b = blocks(&[(0, 4, 4), (4, 0, 4)]);
        b[0].set_state(BlockState::Waiting);
        b[1].set_state(BlockState::Exited);
        let mut s = Scheduler::new(Arc::clone(&b));
        s.attach(
            1,
            thread::spawn(|| WorkerOutcome {
                index: 1,
                file: None,
                result: Err(TransferError::Http(500)),
            }),
        );
        assert_eq!(s.tick(), 1);
        assert_eq!(b[0].size(), 8);
        assert!(s.take_failure().is_none());
    }

    #[test]
    fn merge_does_not_wait_for_revoked_worker() {
        use std::sync::mpsc;
        use std::time::{Duration, Instant};

        let b = blocks(&[(0, 4, 4), (4, 0, 4)]);
        b[0].set_state(BlockState::Waiting);
        let mut s = Scheduler::new(Arc::clone(&b));
        // Neighbour's worker is stuck "connecting" until released.
        let (release, stuck) = mpsc::channel::<()>();
        s.attach(
            1,
            thread::spawn(move || {
                let _ = stuck.recv();
                WorkerOutcome {
                    index: 1,
                    file: None,
                    result: Err(TransferError::Cancelled),
                }
            }),
        );

        let started = Instant::now();
        assert_eq!(s.tick(), 2);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(b[0].size(), 8);
        assert_eq!(b[0].state(), BlockState::Woken);
        assert_eq!(b[1].state(), BlockState::Joined);
        assert_tiles(&s, 8);

        // Still counted live until its thread is gone.
        assert_eq!(s.tick(), 2);
        release.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while s.tick() != 1 {
            assert!(Instant::now() < deadline, "absorbed worker never reaped");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(s.take_failure().is_none());
    }

    #[test]
    fn halt_all_reaps_pending_absorbed_worker() {
        let b = blocks(&[(0, 4, 4), (4, 0, 4)]);
        b[0].set_state(BlockState::Waiting);
        let mut s = Scheduler::new(Arc::clone(&b));
        s.attach(
            1,
            thread::spawn(|| WorkerOutcome {
                index: 1,
                file: None,
                result: Err(TransferError::Http(500)),
            }),
        );
        s.tick();
        s.halt_all();
        assert!(s.workers.iter().all(Option::is_none));
        assert!(s.take_failure().is_none());
    }

    #[test]
    fn chained_merges_skip_absorbed_entries() {
        let b = blocks(&[(0, 2, 2), (2, 0, 2), (4, 0, 2), (6, 0, 2)]);
        b[0].set_state(BlockState::Waiting);
        let mut s = Scheduler::new(Arc::clone(&b));
        s.tick();
        assert_eq!(b[0].end(), 4);

        // Worker consumed the grown range and waits again.
        b[0].progress().store(4, std::sync::atomic::Ordering::Release);
        b[0].set_state(BlockState::Waiting);
        s.tick();
        assert_eq!(b[0].end(), 6);
        assert_eq!(b[2].state(), BlockState::Joined);
        assert_tiles(&s, 8);
    }

    #[test]
    fn exited_workers_are_reaped_and_failures_kept() {
        let b = blocks(&[(0, 4, 4), (4, 1, 4)]);
        b[0].set_state(BlockState::Exited);
        b[1].set_state(BlockState::Exited);
        let mut s = Scheduler::new(Arc::clone(&b));
        s.attach(
            0,
            thread::spawn(|| WorkerOutcome {
                index: 0,
                file: None,
                result: Ok(()),
            }),
        );
        s.attach(
            1,
            thread::spawn(|| WorkerOutcome {
                index: 1,
                file: None,
                result: Err(TransferError::Http(404)),
            }),
        );
        assert_eq!(s.tick(), 0);
        assert!(b.iter().all(|b| b.state() == BlockState::Joined));
        assert!(matches!(s.take_failure(), Some(TransferError::Http(404))));
        assert_eq!(s.downloaded(), 5);
    }

    #[test]
    fn merges_preserve_tiling() {
        // Every combination of neighbour state and progress around a waiting block.
        let states = [
            BlockState::Stopped,
            BlockState::Transferring,
            BlockState::Waiting,
            BlockState::Exited,
            BlockState::Joined,
        ];
        for (k, state) in states.iter().enumerate() {
            for progress in [0, 3] {
                let b = blocks(&[(0, 5, 5), (5, progress, 5), (10, 0, 7)]);
                b[0].set_state(BlockState::Waiting);
                b[1].set_state(*state);
                b[2].set_state(states[(k + 1) % states.len()]);
                let mut s = Scheduler::new(Arc::clone(&b));
                s.tick();
                s.tick();
                assert_tiles(&s, 17);
                let total: i64 = b.iter().filter(|b| b.is_active()).map(|b| b.downloaded()).sum();
                assert_eq!(total, 5 + progress);
            }
        }
    }

    #[test]
    fn halt_all_joins_everything() {
        let b = blocks(&[(0, 1, 4), (4, 0, 4)]);
        b[0].set_state(BlockState::Transferring);
        let mut s = Scheduler::new(Arc::clone(&b));
        s.attach(
            0,
            thread::spawn(|| WorkerOutcome {
                index: 0,
                file: None,
                result: Err(TransferError::Cancelled),
            }),
        );
        s.halt_all();
        assert!(b.iter().all(|b| b.state() == BlockState::Joined));
        assert!(s.take_failure().is_none());
        assert_eq!(s.snapshots()[0].downloaded, 1);
    }
}
