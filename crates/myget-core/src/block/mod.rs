//! Blocks: the unit of work of a segmented download.
//!
//! A block is one contiguous byte range of the target file plus its progress
//! and lifecycle state. All fields are atomics shared between the owning
//! worker and the scheduler, under a single-writer discipline:
//!
//! - the owning worker writes `downloaded` and drives its own transitions
//!   (`Stopped → Transferring → Waiting → Exited`, `Woken → Transferring`);
//! - the scheduler writes `size` only while the block is `Waiting`, and
//!   `start`/`size`/`downloaded` of a neighbour only after revoking it.
//!
//! Every transition that can race with the other side is a compare-and-swap.

mod partition;

pub use partition::plan_blocks;

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

/// Start offset of a block that was absorbed by its neighbour.
pub const INVALID_START: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    /// Idle: initial state, and between attempts after a transport failure.
    Stopped = 0,
    /// The worker is streaming bytes into the block.
    Transferring = 1,
    /// Assigned range delivered; the worker is waiting to be handed more.
    Waiting = 2,
    /// The scheduler grew the block; its worker resumes transferring.
    Woken = 3,
    /// The worker returned and awaits reaping.
    Exited = 4,
    /// Thread reaped and file closed.
    Joined = 5,
    /// Revoked by the scheduler while idle with zero progress; the worker
    /// parks until the block is `Joined` or released back to `Stopped`.
    Cancelled = 6,
}

impl BlockState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BlockState::Stopped,
            1 => BlockState::Transferring,
            2 => BlockState::Waiting,
            3 => BlockState::Woken,
            4 => BlockState::Exited,
            5 => BlockState::Joined,
            _ => BlockState::Cancelled,
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockState::Stopped => "stopped",
            BlockState::Transferring => "transferring",
            BlockState::Waiting => "waiting",
            BlockState::Woken => "woken",
            BlockState::Exited => "exited",
            BlockState::Joined => "joined",
            BlockState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Plain copy of a block's range and progress (persisted in the resume trailer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub start: i64,
    pub downloaded: i64,
    pub size: i64,
}

impl BlockSnapshot {
    pub fn new(start: i64, size: i64) -> Self {
        Self {
            start,
            downloaded: 0,
            size,
        }
    }

    pub fn is_active(&self) -> bool {
        self.start >= 0
    }

    /// Exclusive end offset (meaningless for an unbounded block).
    pub fn end(&self) -> i64 {
        self.start + self.size
    }
}

#[derive(Debug)]
pub struct Block {
    start: AtomicI64,
    size: AtomicI64,
    downloaded: AtomicI64,
    state: AtomicU8,
}

impl Block {
    pub fn new(snapshot: BlockSnapshot) -> Self {
        Self {
            start: AtomicI64::new(snapshot.start),
            size: AtomicI64::new(snapshot.size),
            downloaded: AtomicI64::new(snapshot.downloaded),
            state: AtomicU8::new(BlockState::Stopped as u8),
        }
    }

    pub fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            start: self.start(),
            downloaded: self.downloaded(),
            size: self.size(),
        }
    }

    pub fn start(&self) -> i64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn downloaded(&self) -> i64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Running total handed to the block's writer.
    pub fn progress(&self) -> &AtomicI64 {
        &self.downloaded
    }

    pub fn end(&self) -> i64 {
        self.start() + self.size()
    }

    pub fn is_active(&self) -> bool {
        self.start() >= 0
    }

    /// True for the single unknown-size block.
    pub fn is_unbounded(&self) -> bool {
        self.size() < 0
    }

    /// Bytes still owed to this block (`None` when unbounded).
    pub fn remaining(&self) -> Option<u64> {
        let size = self.size();
        if size < 0 {
            return None;
        }
        Some((size - self.downloaded()).max(0) as u64)
    }

    /// Absolute offset of the next byte to fetch.
    pub fn resume_offset(&self) -> u64 {
        (self.start() + self.downloaded()).max(0) as u64
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The scheduler took this block away from its worker (`Cancelled`) or
    /// already merged it (`Joined`).
    pub fn is_revoked(&self) -> bool {
        matches!(self.state(), BlockState::Cancelled | BlockState::Joined)
    }

    /// Unconditional store; only for transitions no other thread races with.
    pub fn set_state(&self, state: BlockState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Compare-and-swap `from → to`. Returns false if the state was not `from`.
    pub fn transition(&self, from: BlockState, to: BlockState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Non-resumable transfers restart from byte 0 on every attempt.
    pub(crate) fn reset_progress(&self) {
        self.downloaded.store(0, Ordering::Release);
    }

    /// Give back bytes that were counted but never reached the disk.
    pub(crate) fn roll_back(&self, bytes: usize) {
        let bytes = bytes as i64;
        let _ = self
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some((d - bytes).max(0)));
    }

    /// Scheduler only: extend a `Waiting` block by `bytes`.
    pub(crate) fn grow(&self, bytes: i64) {
        self.size.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Scheduler only: mark an absorbed block inactive.
    pub(crate) fn invalidate(&self) {
        self.start.store(INVALID_START, Ordering::Release);
        self.size.store(0, Ordering::Release);
        self.downloaded.store(0, Ordering::Release);
    }
}
