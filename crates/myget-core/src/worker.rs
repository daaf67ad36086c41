//! Worker threads: one OS thread per active block.
//!
//! A worker calls the backend until its block is done, retrying transport
//! failures without limit. Its block index is fixed at spawn. The thread
//! returns its file handle and result through the join handle; the scheduler
//! closes the file.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::backend::{Backend, BlockTransfer};
use crate::block::{Block, BlockState};
use crate::control::HaltFlag;
use crate::retry::{classify, RetryDecision, RetryPolicy, TransferError};
use crate::storage::BufferedFile;
use crate::task::Task;

/// Poll period of a revoked worker waiting for the scheduler's verdict.
const PARK_POLL: Duration = Duration::from_millis(10);

/// Thread creation attempts before giving up on `WouldBlock`.
const SPAWN_ATTEMPTS: u32 = 10;
const SPAWN_BACKOFF: Duration = Duration::from_millis(50);

/// State every worker of one download shares.
pub(crate) struct Shared {
    pub backend: Arc<dyn Backend>,
    pub task: Task,
    pub blocks: Arc<[Block]>,
    pub working_path: PathBuf,
    pub buffer_bytes: usize,
    pub halt: HaltFlag,
    pub handoff_window: Duration,
    pub block_retry: RetryPolicy,
}

/// What a finished worker hands back to the scheduler.
pub(crate) struct WorkerOutcome {
    pub index: usize,
    /// `None` if the working file could not be opened.
    pub file: Option<BufferedFile>,
    pub result: Result<(), TransferError>,
}

/// Start the worker for block `index`, retrying thread creation with a
/// short backoff while the system is out of threads.
pub(crate) fn spawn(index: usize, shared: &Arc<Shared>) -> io::Result<JoinHandle<WorkerOutcome>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("block-{}", index))
            .spawn(move || run(index, &shared));
        match spawned {
            Ok(handle) => return Ok(handle),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && attempt < SPAWN_ATTEMPTS => {
                tracing::warn!("spawning worker {}: {}; retrying", index, e);
                thread::sleep(SPAWN_BACKOFF * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

fn run(index: usize, shared: &Shared) -> WorkerOutcome {
    let block = &shared.blocks[index];
    let mut file = match BufferedFile::with_capacity(&shared.working_path, shared.buffer_bytes) {
        Ok(f) => f,
        Err(e) => {
            let result = fail(block, &shared.halt, TransferError::Storage(e));
            return WorkerOutcome {
                index,
                file: None,
                result,
            };
        }
    };
    tracing::debug!(
        "worker {} started at {} (+{}/{})",
        index,
        block.start(),
        block.downloaded(),
        block.size()
    );
    let result = drive(index, block, &mut file, shared);
    WorkerOutcome {
        index,
        file: Some(file),
        result,
    }
}

fn drive(
    index: usize,
    block: &Block,
    file: &mut BufferedFile,
    shared: &Shared,
) -> Result<(), TransferError> {
    let mut attempt = 0u32;
    loop {
        if shared.halt.is_raised() {
            return Err(TransferError::Cancelled);
        }
        attempt += 1;
        if !shared.task.resumable {
            block.reset_progress();
        }

        let result = {
            let mut xfer = BlockTransfer::new(block, file, &shared.halt, shared.handoff_window);
            shared.backend.download(&shared.task, &mut xfer)
        };
        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        block.transition(BlockState::Transferring, BlockState::Stopped);
        if shared.halt.is_raised() {
            return Err(TransferError::Cancelled);
        }
        if block.is_revoked() {
            match park(block, &shared.halt) {
                Parked::Absorbed => return Ok(()),
                Parked::Halted => return Err(TransferError::Cancelled),
                Parked::Released => {
                    attempt = 0;
                    continue;
                }
            }
        }

        match shared.block_retry.decide(attempt, classify(&err)) {
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    "block {} attempt {} failed at offset {}: {}; retrying in {:?}",
                    index,
                    attempt,
                    block.resume_offset(),
                    err,
                    delay
                );
                pause(block, delay, &shared.halt);
            }
            RetryDecision::NoRetry => {
                tracing::warn!("block {} failed: {}", index, err);
                return fail(block, &shared.halt, err);
            }
        }
    }
}

/// Mark the block exited after a fatal error. A block the scheduler revoked
/// meanwhile waits for its verdict instead.
fn fail(block: &Block, halt: &HaltFlag, err: TransferError) -> Result<(), TransferError> {
    loop {
        if block.transition(BlockState::Stopped, BlockState::Exited) {
            return Err(err);
        }
        match park(block, halt) {
            Parked::Absorbed => return Ok(()),
            Parked::Halted => return Err(err),
            Parked::Released => continue,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Parked {
    /// Merged into a neighbour; nothing left to do.
    Absorbed,
    /// Handed back; transfer as usual.
    Released,
    Halted,
}

fn park(block: &Block, halt: &HaltFlag) -> Parked {
    loop {
        match block.state() {
            BlockState::Joined => return Parked::Absorbed,
            BlockState::Cancelled => {}
            _ => return Parked::Released,
        }
        if halt.is_raised() {
            return Parked::Halted;
        }
        thread::sleep(PARK_POLL);
    }
}

fn pause(block: &Block, delay: Duration, halt: &HaltFlag) {
    let deadline = Instant::now() + delay;
    while !halt.is_raised() && !block.is_revoked() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(PARK_POLL));
    }
}
