//! Resume store: block state persisted as a trailer on the working file.
//!
//! The working file holds the payload bytes `[0, size)` followed, after an
//! interrupted run, by an encoded block array (see [`codec`]). A trailer that
//! fails any check is discarded and the download restarts from a fresh
//! partition.

mod codec;

pub use codec::{decode, encode, trailer_len, TrailerError, MAX_BLOCKS};

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::block::BlockSnapshot;

/// Reads the trailer of `path`, a working file for a `size`-byte download.
///
/// `None` when there is no trailer or it is unusable; the reason is logged.
pub fn load(path: &Path, size: u64) -> Option<Vec<BlockSnapshot>> {
    match read_trailer(path, size) {
        Ok(None) => None,
        Ok(Some(bytes)) => match decode(&bytes, size) {
            Ok(blocks) => Some(blocks),
            Err(e) => {
                tracing::warn!("discarding resume trailer of {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            tracing::debug!("no resume trailer in {}: {:#}", path.display(), e);
            None
        }
    }
}

fn read_trailer(path: &Path, size: u64) -> Result<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
    };
    let len = file.metadata().context("stat working file")?.len();
    if len <= size {
        return Ok(None);
    }
    let tail = usize::try_from(len - size).context("trailer too large")?;
    if tail > trailer_len(MAX_BLOCKS as usize) {
        anyhow::bail!("{} bytes past the payload, too many for a trailer", tail);
    }
    let mut bytes = vec![0u8; tail];
    file.seek(SeekFrom::Start(size))?;
    file.read_exact(&mut bytes).context("read trailer")?;
    Ok(Some(bytes))
}

/// Truncates `path` to `size` and appends the encoded `blocks`.
pub fn save(path: &Path, size: u64, blocks: &[BlockSnapshot]) -> Result<()> {
    let mut file = File::options()
        .write(true)
        .open(path)
        .with_context(|| format!("open {} to save resume state", path.display()))?;
    file.set_len(size).context("truncate before trailer")?;
    file.seek(SeekFrom::Start(size))?;
    file.write_all(&encode(blocks)).context("write trailer")?;
    file.sync_all().context("sync trailer")?;
    tracing::debug!(
        "saved resume trailer for {} blocks at offset {} of {}",
        blocks.len(),
        size,
        path.display()
    );
    Ok(())
}

/// A trailer found without knowing the payload size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTrailer {
    pub size: u64,
    pub blocks: Vec<BlockSnapshot>,
    /// The stored 8-byte checksum.
    pub checksum: [u8; 8],
}

/// Scans the tail of `path` for a valid trailer of any block count.
pub fn locate(path: &Path) -> Result<Option<LocatedTrailer>> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata().context("stat working file")?.len();
    let window = len.min(trailer_len(MAX_BLOCKS as usize) as u64);
    let mut tail = vec![0u8; window as usize];
    file.seek(SeekFrom::Start(len - window))?;
    file.read_exact(&mut tail).context("read file tail")?;

    for count in 1..=MAX_BLOCKS as usize {
        let tlen = trailer_len(count);
        if tlen > tail.len() {
            break;
        }
        let bytes = &tail[tail.len() - tlen..];
        if u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize != count {
            continue;
        }
        let size = len - tlen as u64;
        if let Ok(blocks) = decode(bytes, size) {
            let mut checksum = [0u8; 8];
            checksum.copy_from_slice(&bytes[tlen - 8..]);
            return Ok(Some(LocatedTrailer {
                size,
                blocks,
                checksum,
            }));
        }
    }
    Ok(None)
}
