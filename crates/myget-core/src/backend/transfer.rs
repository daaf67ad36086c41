//! Streaming received bytes into a block, and the end-of-range handoff.
//!
//! Backends never touch block state directly. They ask [`BlockTransfer`]
//! where to (re)connect, push every received chunk through
//! [`BlockTransfer::receive`] and report a cleanly closed connection with
//! [`BlockTransfer::end_of_stream`]. The helper caps writes at the block's
//! range and runs the WAITING/WOKEN handoff when the range is exhausted.

use curl::easy::Easy;
use std::cell::{Cell, RefCell};
use std::thread;
use std::time::{Duration, Instant};

use crate::block::{Block, BlockState};
use crate::control::HaltFlag;
use crate::retry::TransferError;
use crate::storage::{BufferedFile, PullError};

/// Poll period while waiting to be handed more work.
const HANDOFF_POLL: Duration = Duration::from_millis(10);

/// What the backend should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep streaming (or, after `end_of_stream`, reconnect).
    Continue,
    /// The block is done and marked exited; stop transferring.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handoff {
    Woken,
    Exited,
}

/// A worker's view of its block for the duration of one `download` call.
pub struct BlockTransfer<'a> {
    block: &'a Block,
    file: &'a mut BufferedFile,
    halt: &'a HaltFlag,
    handoff_window: Duration,
}

impl<'a> BlockTransfer<'a> {
    pub(crate) fn new(
        block: &'a Block,
        file: &'a mut BufferedFile,
        halt: &'a HaltFlag,
        handoff_window: Duration,
    ) -> Self {
        Self {
            block,
            file,
            halt,
            handoff_window,
        }
    }

    pub fn block(&self) -> &Block {
        self.block
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_raised()
    }

    /// True once the engine halted or the scheduler revoked this block.
    /// Backends poll it while blocked on the network (connect, first byte).
    pub fn should_stop(&self) -> bool {
        self.halt.is_raised() || self.block.is_revoked()
    }

    /// Offset to request from, with the file positioned there.
    /// `None` once the block is complete and was not handed more work.
    pub fn next_offset(&mut self) -> Result<Option<u64>, TransferError> {
        loop {
            if self.should_stop() {
                return Err(TransferError::Cancelled);
            }
            if self.block.remaining() == Some(0) {
                match self.handoff()? {
                    Handoff::Woken => continue,
                    Handoff::Exited => return Ok(None),
                }
            }
            let offset = self.block.resume_offset();
            self.file.seek(offset).map_err(TransferError::Storage)?;
            return Ok(Some(offset));
        }
    }

    /// Accept one received chunk. Bytes past the block's range are only
    /// accepted if the block is woken with more work.
    pub fn receive(&mut self, mut chunk: &[u8]) -> Result<Flow, TransferError> {
        while !chunk.is_empty() {
            if self.halt.is_raised() || !self.begin() {
                return Err(TransferError::Cancelled);
            }
            let limit = self.block.remaining();
            if limit == Some(0) {
                match self.handoff()? {
                    Handoff::Woken => continue,
                    Handoff::Exited => return Ok(Flow::Finished),
                }
            }
            match self.file.pull_from(&mut chunk, self.block.progress(), limit) {
                Ok(_) => {}
                Err(PullError::Disk(e)) | Err(PullError::Source(e)) => {
                    return Err(TransferError::Storage(e))
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// The server closed the connection without error.
    pub fn end_of_stream(&mut self) -> Result<Flow, TransferError> {
        match self.block.remaining() {
            None => {
                if !self.begin() {
                    return Err(TransferError::Cancelled);
                }
                self.file.flush().map_err(TransferError::Storage)?;
                self.block
                    .transition(BlockState::Transferring, BlockState::Exited);
                Ok(Flow::Finished)
            }
            Some(0) => match self.handoff()? {
                Handoff::Woken => Ok(Flow::Continue),
                Handoff::Exited => Ok(Flow::Finished),
            },
            Some(_) => Err(TransferError::PartialTransfer {
                expected: self.block.size().max(0) as u64,
                received: self.block.downloaded().max(0) as u64,
            }),
        }
    }

    /// Claim the block for transferring. False if the scheduler revoked it.
    fn begin(&self) -> bool {
        match self.block.state() {
            BlockState::Transferring => true,
            BlockState::Stopped => self
                .block
                .transition(BlockState::Stopped, BlockState::Transferring),
            BlockState::Woken => self
                .block
                .transition(BlockState::Woken, BlockState::Transferring),
            _ => false,
        }
    }

    /// Range exhausted: wait briefly for the scheduler to grow the block.
    fn handoff(&mut self) -> Result<Handoff, TransferError> {
        if !self.begin() {
            return Err(TransferError::Cancelled);
        }
        self.file.flush().map_err(TransferError::Storage)?;
        self.block.set_state(BlockState::Waiting);

        let deadline = Instant::now() + self.handoff_window;
        while self.block.state() == BlockState::Waiting {
            if self.halt.is_raised() || Instant::now() >= deadline {
                if self
                    .block
                    .transition(BlockState::Waiting, BlockState::Exited)
                {
                    tracing::debug!(
                        "block at {} done with {} bytes",
                        self.block.start(),
                        self.block.downloaded()
                    );
                    return Ok(Handoff::Exited);
                }
                break;
            }
            thread::sleep(HANDOFF_POLL);
        }

        self.block
            .transition(BlockState::Woken, BlockState::Transferring);
        tracing::debug!(
            "block at {} woken, size now {}",
            self.block.start(),
            self.block.size()
        );
        Ok(Handoff::Woken)
    }
}

/// Checks the response status before the first body byte is written.
/// Arguments: last status code seen (if any) and the requested offset.
pub(crate) type StatusGate = fn(Option<u32>, u64) -> Result<(), TransferError>;

/// Accepts any response (FTP replies are checked by libcurl itself).
pub(crate) fn accept_any(_status: Option<u32>, _offset: u64) -> Result<(), TransferError> {
    Ok(())
}

/// Status code of an HTTP status line (`HTTP/1.1 206 Partial Content`).
pub(crate) fn parse_status_line(line: &[u8]) -> Option<u32> {
    let line = std::str::from_utf8(line).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Drive `xfer` to completion over libcurl, reconnecting after each handoff.
///
/// `prepare` sets the per-attempt options (range or resume offset) on the
/// handle before each connection.
pub(crate) fn stream_with_curl<F>(
    easy: &mut Easy,
    xfer: &mut BlockTransfer<'_>,
    gate: StatusGate,
    mut prepare: F,
) -> Result<(), TransferError>
where
    F: FnMut(&mut Easy, u64) -> Result<(), curl::Error>,
{
    easy.progress(true)?;
    while let Some(offset) = xfer.next_offset()? {
        prepare(easy, offset)?;
        if perform(easy, xfer, gate, offset)? == Flow::Finished {
            return Ok(());
        }
        if xfer.end_of_stream()? == Flow::Finished {
            return Ok(());
        }
    }
    Ok(())
}

enum Stop {
    Finished,
    Failed(TransferError),
}

/// One connection. `Continue` means the server closed the stream cleanly.
fn perform(
    easy: &mut Easy,
    xfer: &mut BlockTransfer<'_>,
    gate: StatusGate,
    offset: u64,
) -> Result<Flow, TransferError> {
    let halt = xfer.halt.clone();
    let block = xfer.block;
    let status: Cell<Option<u32>> = Cell::new(None);
    let gated = Cell::new(false);
    let stop: RefCell<Option<Stop>> = RefCell::new(None);

    let result = {
        let mut transfer = easy.transfer();
        transfer.header_function(|line| {
            if let Some(code) = parse_status_line(line) {
                status.set(Some(code));
            }
            true
        })?;
        transfer.progress_function(|_, _, _, _| !halt.is_raised() && !block.is_revoked())?;
        transfer.write_function(|data| {
            if !gated.replace(true) {
                if let Err(e) = gate(status.get(), offset) {
                    *stop.borrow_mut() = Some(Stop::Failed(e));
                    return Ok(0);
                }
            }
            match xfer.receive(data) {
                Ok(Flow::Continue) => Ok(data.len()),
                Ok(Flow::Finished) => {
                    *stop.borrow_mut() = Some(Stop::Finished);
                    Ok(0)
                }
                Err(e) => {
                    *stop.borrow_mut() = Some(Stop::Failed(e));
                    Ok(0)
                }
            }
        })?;
        transfer.perform()
    };

    match (stop.into_inner(), result) {
        (Some(Stop::Finished), _) => Ok(Flow::Finished),
        (Some(Stop::Failed(e)), _) => Err(e),
        (None, Err(_)) if halt.is_raised() || block.is_revoked() => Err(TransferError::Cancelled),
        (None, Err(e)) => Err(TransferError::Curl(e)),
        (None, Ok(())) => {
            if !gated.get() {
                gate(status.get(), offset)?;
            }
            Ok(Flow::Continue)
        }
    }
}
