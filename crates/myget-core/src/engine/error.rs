use std::path::PathBuf;
use thiserror::Error;

use crate::retry::TransferError;

/// Why a task did not produce its final file.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no backend for {0}")]
    UnsupportedProtocol(String),

    #[error("fetching metadata for {url}: {source}")]
    Metadata {
        url: String,
        #[source]
        source: TransferError,
    },

    #[error("giving up on {url} after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Option<TransferError>,
    },

    #[error("local file {}: {cause:#}", .path.display())]
    LocalFile { path: PathBuf, cause: anyhow::Error },

    #[error("starting worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Stopped on request before anything was written.
    #[error("interrupted")]
    Cancelled,

    /// Stopped on request; progress saved in the working file.
    #[error("interrupted; progress saved in {}", .0.display())]
    Interrupted(PathBuf),

    #[error(
        "incomplete: {downloaded} of {expected} bytes; progress saved in {}",
        .path.display()
    )]
    Incomplete {
        path: PathBuf,
        downloaded: u64,
        expected: u64,
        #[source]
        source: Option<TransferError>,
    },

    /// Size unknown, so there is no resume state to keep.
    #[error("transfer of unknown size stopped after {downloaded} bytes; cannot resume")]
    Unresumable {
        downloaded: u64,
        #[source]
        source: Option<TransferError>,
    },

    #[error("listing {url}: {source}")]
    ListDirectory {
        url: String,
        #[source]
        source: TransferError,
    },
}

impl EngineError {
    pub(crate) fn local(path: impl Into<PathBuf>, cause: impl Into<anyhow::Error>) -> Self {
        EngineError::LocalFile {
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// True when the task stopped because the caller asked it to.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, EngineError::Cancelled | EngineError::Interrupted(_))
            || matches!(
                self,
                EngineError::Unresumable {
                    source: Some(TransferError::Cancelled),
                    ..
                }
            )
    }
}
