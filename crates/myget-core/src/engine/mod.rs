//! Top-level orchestration of one task.
//!
//! metadata → (directory: list and recurse) → paths → partition or resume →
//! spawn workers → poll loop (progress, scheduler tick, interrupt) →
//! finalize, or persist the block state and fail.

mod error;
mod metadata;
mod session;

pub use error::EngineError;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::control::CancelToken;
use crate::retry::RetryPolicy;
use crate::scheduler::ProgressSink;
use crate::storage::FILE_BUFFER_SIZE;
use crate::task::Task;
use crate::url_model::{directory_name, entry_url, sanitize_filename};

/// Engine-facing timing and sizing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Control loop tick.
    pub poll_interval: Duration,
    /// How long a worker with an exhausted range waits to be handed more.
    pub handoff_window: Duration,
    /// Write buffer per block.
    pub buffer_bytes: usize,
    /// Retry policy for block transfers.
    pub block_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            handoff_window: Duration::from_millis(500),
            buffer_bytes: FILE_BUFFER_SIZE,
            block_retry: RetryPolicy::unlimited(Duration::from_millis(500)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The final file already existed; nothing was transferred.
    AlreadyComplete(PathBuf),
    Completed { path: PathBuf, bytes: u64 },
    /// A remote directory, fetched entry by entry.
    Directory { path: PathBuf, entries: usize },
}

pub struct Downloader {
    config: EngineConfig,
    backend: Option<Arc<dyn Backend>>,
}

impl Downloader {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    /// Use `backend` for every task instead of choosing by URL scheme.
    pub fn with_backend(config: EngineConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend: Some(backend),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Download one task to completion.
    ///
    /// `cancel` is sampled between metadata attempts and on every tick of the
    /// transfer loop; tripping it saves progress and returns
    /// [`EngineError::Interrupted`].
    pub fn run(
        &self,
        task: Task,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadOutcome, EngineError> {
        if let Some(path) = session::named_target(&task)? {
            if path.is_file() {
                tracing::info!("{} already exists, skipping", path.display());
                return Ok(DownloadOutcome::AlreadyComplete(path));
            }
        }
        let (backend, task) = metadata::resolve(self.backend.as_ref(), task, cancel)?;
        if task.is_directory {
            self.download_directory(backend, task, cancel, progress)
        } else {
            session::download_file(&self.config, backend, task, cancel, progress)
        }
    }

    fn download_directory(
        &self,
        backend: Arc<dyn Backend>,
        task: Task,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadOutcome, EngineError> {
        let listing = tempfile::NamedTempFile::new()
            .map_err(|e| EngineError::local(std::env::temp_dir(), e))?;
        backend
            .list_directory(&task, listing.path())
            .map_err(|source| EngineError::ListDirectory {
                url: task.url.clone(),
                source,
            })?;
        let names = fs::read_to_string(listing.path())
            .map_err(|e| EngineError::local(listing.path(), e))?;

        let dir_name = task
            .local_file
            .as_deref()
            .map(sanitize_filename)
            .or_else(|| directory_name(&task.url).map(|n| sanitize_filename(&n)))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "download".to_string());
        let target = session::base_dir(&task)?.join(dir_name);
        fs::create_dir_all(&target).map_err(|e| EngineError::local(&target, e))?;

        let mut entries = 0;
        for name in names.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(url) = entry_url(&task.url, name) else {
                tracing::debug!("skipping listing entry {:?}", name);
                continue;
            };
            tracing::info!("directory entry {}", url);
            self.run(task.for_entry(url, target.clone()), cancel, progress)?;
            entries += 1;
        }
        Ok(DownloadOutcome::Directory {
            path: target,
            entries,
        })
    }
}
