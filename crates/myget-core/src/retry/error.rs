//! Transfer error type for retry classification.

use thiserror::Error;

/// Error returned by a backend operation (metadata fetch, block download,
/// directory listing). Classified by [`super::classify`] before the caller
/// decides whether to retry.
#[derive(Debug, Error)]
pub enum TransferError {
    /// libcurl reported an error (timeout, connection, protocol, ...).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Server answered with a status the transfer cannot use.
    #[error("HTTP {0}")]
    Http(u32),
    /// A non-zero offset was requested but the server sent the whole body.
    #[error("server ignored range request at offset {0}")]
    RangeIgnored(u64),
    /// The connection ended before the block was complete.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Local disk write failed (disk full, permission denied). Not retried.
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),
    /// The server sent something the backend cannot interpret.
    #[error("protocol: {0}")]
    Protocol(String),
    /// The block was revoked or the engine halted mid-attempt.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// True when the error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        super::classify(self).is_retryable()
    }
}
