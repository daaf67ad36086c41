//! Buffered block writer: one file handle plus a large in-memory buffer.
//!
//! Each block owns its own `BufferedFile` on the shared working file,
//! positioned inside the block's range. Bytes pulled from the network land in
//! the buffer and reach the disk in large batches.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Default write buffer size (1 MiB).
pub const FILE_BUFFER_SIZE: usize = 1024 * 1024;

/// Flush once free buffer space drops to this many bytes.
pub const MIN_BUFFER_LEFT: usize = 1024;

/// Anything a block can pull bytes from: "give me up to `buf.len()` bytes".
///
/// `Ok(0)` means end of data. Every `Read` is a source, so a received network
/// chunk can be offered as `&[u8]`.
pub trait TransferSource {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read + ?Sized> TransferSource for R {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// Failure while streaming a source into the file. Bytes accepted before the
/// failure are already counted in the caller's running total.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("reading transfer source: {0}")]
    Source(#[source] io::Error),
    #[error("writing to disk: {0}")]
    Disk(#[source] io::Error),
}

/// Close failed with buffered bytes that never reached the disk.
#[derive(Debug, Error)]
#[error("{unflushed} buffered bytes lost on close: {source}")]
pub struct CloseError {
    pub unflushed: usize,
    #[source]
    pub source: io::Error,
}

pub struct BufferedFile {
    file: File,
    buf: Box<[u8]>,
    len: usize,
    low_water: usize,
}

impl BufferedFile {
    /// Open `path` read+write (created if missing, never truncated) with the default buffer.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_capacity(path, FILE_BUFFER_SIZE)
    }

    pub fn with_capacity(path: &Path, capacity: usize) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let capacity = capacity.max(1);
        Ok(Self {
            file,
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            low_water: MIN_BUFFER_LEFT.min(capacity / 4),
        })
    }

    /// Bytes accepted but not yet written to disk.
    pub fn pending(&self) -> usize {
        self.len
    }

    fn space(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Buffer `data`, flushing whenever the buffer passes the low-water mark.
    pub fn write(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let n = data.len().min(self.space());
            self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
            self.len += n;
            data = &data[n..];
            if self.space() <= self.low_water {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Write the buffer to disk at the current position. On a partial failure
    /// the unwritten tail stays buffered. Returns the number of bytes written.
    pub fn flush(&mut self) -> io::Result<usize> {
        let total = self.len;
        let mut written = 0;
        while written < total {
            match self.file.write(&self.buf[written..total]) {
                Ok(0) => {
                    self.keep_tail(written, total);
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write back to file returned 0",
                    ));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.keep_tail(written, total);
                    return Err(e);
                }
            }
        }
        self.len = 0;
        Ok(total)
    }

    fn keep_tail(&mut self, written: usize, total: usize) {
        self.buf.copy_within(written..total, 0);
        self.len = total - written;
    }

    /// Reposition for subsequent writes. Flushes first so buffered bytes land
    /// at the position they were meant for.
    pub fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.flush()?;
        self.file.seek(SeekFrom::Start(offset))
    }

    pub fn truncate(&mut self, length: u64) -> io::Result<()> {
        self.flush()?;
        self.file.set_len(length)
    }

    /// Stream `source` into the file.
    ///
    /// Every accepted byte is added to `total` as soon as it is buffered.
    /// Stops at end of data, on error, or once `limit` bytes were consumed
    /// (`None` = unbounded). Never reads past `limit`.
    pub fn pull_from<S: TransferSource + ?Sized>(
        &mut self,
        source: &mut S,
        total: &AtomicI64,
        limit: Option<u64>,
    ) -> Result<u64, PullError> {
        let mut count = 0u64;
        loop {
            let want = match limit {
                Some(limit) if count >= limit => break,
                Some(limit) => self.space().min((limit - count).min(usize::MAX as u64) as usize),
                None => self.space(),
            };
            let n = source
                .pull(&mut self.buf[self.len..self.len + want])
                .map_err(PullError::Source)?;
            if n == 0 {
                break;
            }
            self.len += n;
            total.fetch_add(n as i64, Ordering::AcqRel);
            count += n as u64;
            if self.space() <= self.low_water {
                self.flush().map_err(PullError::Disk)?;
            }
        }
        Ok(count)
    }

    /// Flush and close. On failure reports how many accepted bytes never
    /// reached the disk so the owner can roll its progress back.
    pub fn close(mut self) -> Result<(), CloseError> {
        match self.flush() {
            Ok(_) => Ok(()),
            Err(source) => {
                let unflushed = self.len;
                self.len = 0;
                Err(CloseError { unflushed, source })
            }
        }
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        if self.len > 0 {
            if let Err(e) = self.flush() {
                tracing::warn!("dropping {} buffered bytes: {}", self.len, e);
            }
        }
    }
}
