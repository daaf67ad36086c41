//! Trailer wire format.
//!
//! ```text
//! count: u32 LE
//! count × { start: i64 LE, downloaded: i64 LE, size: i64 LE }
//! checksum: first 8 bytes of SHA-256(count ‖ triples)
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::block::{BlockSnapshot, INVALID_START};

/// Upper bound on blocks a trailer may describe.
pub const MAX_BLOCKS: u32 = 1024;

const COUNT_LEN: usize = 4;
const ENTRY_LEN: usize = 24;
const CHECKSUM_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrailerError {
    #[error("trailer truncated ({0} bytes)")]
    Truncated(usize),
    #[error("trailer is {actual} bytes, {expected} expected for its block count")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("trailer checksum mismatch")]
    Checksum,
    #[error("inconsistent block set: {0}")]
    Inconsistent(String),
}

/// Encoded size of a trailer describing `count` blocks.
pub fn trailer_len(count: usize) -> usize {
    COUNT_LEN + ENTRY_LEN * count + CHECKSUM_LEN
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

pub fn encode(blocks: &[BlockSnapshot]) -> Vec<u8> {
    let mut out = Vec::with_capacity(trailer_len(blocks.len()));
    out.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
    for b in blocks {
        out.extend_from_slice(&b.start.to_le_bytes());
        out.extend_from_slice(&b.downloaded.to_le_bytes());
        out.extend_from_slice(&b.size.to_le_bytes());
    }
    let sum = checksum(&out);
    out.extend_from_slice(&sum);
    out
}

fn read_i64(bytes: &[u8], at: usize) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    i64::from_le_bytes(word)
}

/// Decodes a trailer and checks it against a file of `file_size` bytes.
pub fn decode(bytes: &[u8], file_size: u64) -> Result<Vec<BlockSnapshot>, TrailerError> {
    if bytes.len() < trailer_len(0) {
        return Err(TrailerError::Truncated(bytes.len()));
    }
    let mut word = [0u8; COUNT_LEN];
    word.copy_from_slice(&bytes[..COUNT_LEN]);
    let count = u32::from_le_bytes(word);
    if count == 0 || count > MAX_BLOCKS {
        return Err(TrailerError::Inconsistent(format!("block count {}", count)));
    }

    let expected = trailer_len(count as usize);
    if bytes.len() != expected {
        return Err(TrailerError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let (body, sum) = bytes.split_at(expected - CHECKSUM_LEN);
    if checksum(body) != sum {
        return Err(TrailerError::Checksum);
    }

    let blocks: Vec<BlockSnapshot> = (0..count as usize)
        .map(|i| {
            let at = COUNT_LEN + i * ENTRY_LEN;
            BlockSnapshot {
                start: read_i64(body, at),
                downloaded: read_i64(body, at + 8),
                size: read_i64(body, at + 16),
            }
        })
        .collect();

    validate(&blocks, file_size)?;
    Ok(blocks)
}

/// Active blocks, in array order, must tile `[0, file_size)` exactly.
fn validate(blocks: &[BlockSnapshot], file_size: u64) -> Result<(), TrailerError> {
    let file_size = i64::try_from(file_size)
        .map_err(|_| TrailerError::Inconsistent("file size out of range".into()))?;
    let mut cursor = 0i64;
    let mut active = 0usize;

    for (i, b) in blocks.iter().enumerate() {
        if b.start == INVALID_START {
            if b.size != 0 || b.downloaded != 0 {
                return Err(TrailerError::Inconsistent(format!("absorbed block {} not cleared", i)));
            }
            continue;
        }
        if b.start < 0 || b.size < 0 || b.downloaded < 0 || b.downloaded > b.size {
            return Err(TrailerError::Inconsistent(format!("block {} out of range", i)));
        }
        if b.start != cursor {
            return Err(TrailerError::Inconsistent(format!(
                "block {} starts at {}, expected {}",
                i, b.start, cursor
            )));
        }
        cursor = b
            .start
            .checked_add(b.size)
            .filter(|end| *end <= file_size)
            .ok_or_else(|| TrailerError::Inconsistent(format!("block {} past end of file", i)))?;
        active += 1;
    }

    if active == 0 {
        return Err(TrailerError::Inconsistent("no active blocks".into()));
    }
    if cursor != file_size {
        return Err(TrailerError::Inconsistent(format!(
            "blocks cover {} of {} bytes",
            cursor, file_size
        )));
    }
    Ok(())
}
