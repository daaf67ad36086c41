//! Single-file transfer: setup, the poll loop, and the two ways out.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::{DownloadOutcome, EngineConfig, EngineError};
use crate::backend::Backend;
use crate::block::{plan_blocks, Block, BlockSnapshot, BlockState};
use crate::control::{CancelToken, HaltFlag};
use crate::resume_store::{self, MAX_BLOCKS};
use crate::scheduler::{ProgressSink, ProgressSnapshot, Scheduler};
use crate::storage::{create_working_file, finalize, temp_path};
use crate::task::Task;
use crate::url_model::derive_filename;
use crate::worker::{self, Shared};

/// Directory the task saves into.
pub(super) fn base_dir(task: &Task) -> Result<PathBuf, EngineError> {
    match &task.local_dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().map_err(|e| EngineError::local(".", e)),
    }
}

fn final_path(task: &Task) -> Result<PathBuf, EngineError> {
    let name = match &task.local_file {
        Some(name) => name.clone(),
        None => derive_filename(&task.url, task.filename_hint.as_deref()),
    };
    Ok(base_dir(task)?.join(name))
}

/// The final path when the caller fixed the file name, so it is known
/// before any metadata request.
pub(super) fn named_target(task: &Task) -> Result<Option<PathBuf>, EngineError> {
    match &task.local_file {
        Some(name) => Ok(Some(base_dir(task)?.join(name))),
        None => Ok(None),
    }
}

/// Block layout for this run, plus how many bytes were already on disk.
fn plan(task: &Task, working: &Path) -> Result<(Vec<BlockSnapshot>, u64), EngineError> {
    let size = match task.known_size() {
        Some(size) if task.resumable => size,
        known => {
            create_working_file(working, known).map_err(|e| EngineError::local(working, e))?;
            return Ok((vec![BlockSnapshot::new(0, task.size)], 0));
        }
    };

    if let Some(blocks) = resume_store::load(working, size) {
        let resumed: u64 = blocks
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.downloaded as u64)
            .sum();
        tracing::info!(
            "resuming {} with {} of {} bytes in {} blocks",
            working.display(),
            resumed,
            size,
            blocks.iter().filter(|b| b.is_active()).count()
        );
        return Ok((blocks, resumed));
    }

    create_working_file(working, Some(size)).map_err(|e| EngineError::local(working, e))?;
    let count = task.threads.clamp(1, MAX_BLOCKS as usize).min(size as usize);
    Ok((plan_blocks(size, count), 0))
}

pub(super) fn download_file(
    config: &EngineConfig,
    backend: Arc<dyn Backend>,
    task: Task,
    cancel: &CancelToken,
    progress: &mut dyn ProgressSink,
) -> Result<DownloadOutcome, EngineError> {
    let final_path = final_path(&task)?;
    if final_path.exists() {
        tracing::info!("{} already exists, skipping", final_path.display());
        return Ok(DownloadOutcome::AlreadyComplete(final_path));
    }
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::local(parent, e))?;
    }
    let working = temp_path(&final_path);

    if task.size == 0 {
        File::create(&final_path).map_err(|e| EngineError::local(&final_path, e))?;
        if working.exists() {
            fs::remove_file(&working).map_err(|e| EngineError::local(&working, e))?;
        }
        tracing::info!("{} is empty", final_path.display());
        return Ok(DownloadOutcome::Completed {
            path: final_path,
            bytes: 0,
        });
    }

    let (snapshots, resumed_bytes) = plan(&task, &working)?;
    let blocks: Arc<[Block]> = snapshots.into_iter().map(Block::new).collect();
    let shared = Arc::new(Shared {
        backend,
        task,
        blocks: Arc::clone(&blocks),
        working_path: working.clone(),
        buffer_bytes: config.buffer_bytes,
        halt: HaltFlag::default(),
        handoff_window: config.handoff_window,
        block_retry: config.block_retry,
    });
    tracing::info!(
        "downloading {} to {} with {} blocks",
        shared.task.url,
        final_path.display(),
        blocks.iter().filter(|b| b.is_active()).count()
    );

    let mut session = Session {
        shared,
        scheduler: Scheduler::new(Arc::clone(&blocks)),
        working,
        final_path,
        started: Instant::now(),
        resumed_bytes,
    };
    let result = session.drive(config, cancel, progress);
    progress.finish(&session.progress());
    result
}

struct Session {
    shared: Arc<Shared>,
    scheduler: Scheduler,
    working: PathBuf,
    final_path: PathBuf,
    started: Instant,
    resumed_bytes: u64,
}

impl Session {
    fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.shared.task.known_size(),
            blocks: self.scheduler.snapshots(),
            elapsed: self.started.elapsed(),
            resumed_bytes: self.resumed_bytes,
        }
    }

    fn drive(
        &mut self,
        config: &EngineConfig,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadOutcome, EngineError> {
        for (i, block) in self.shared.blocks.iter().enumerate() {
            if !block.is_active() {
                block.set_state(BlockState::Joined);
                continue;
            }
            match worker::spawn(i, &self.shared) {
                Ok(handle) => self.scheduler.attach(i, handle),
                Err(e) => {
                    tracing::warn!("could not start worker {}: {}", i, e);
                    return Err(self.persist_and_abort(EngineError::Spawn(e)));
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                tracing::info!("interrupted, saving progress");
                let interrupted = EngineError::Interrupted(self.working.clone());
                return Err(self.persist_and_abort(interrupted));
            }
            progress.report(&self.progress());
            if self.scheduler.tick() == 0 {
                break;
            }
            thread::sleep(config.poll_interval);
        }

        self.finish()
    }

    fn finish(&mut self) -> Result<DownloadOutcome, EngineError> {
        let downloaded = self.scheduler.downloaded();
        let failure = self.scheduler.take_failure();

        let bytes = match self.shared.task.known_size() {
            Some(expected) if downloaded < expected => {
                let incomplete = EngineError::Incomplete {
                    path: self.working.clone(),
                    downloaded,
                    expected,
                    source: failure,
                };
                return Err(self.persist_and_abort(incomplete));
            }
            Some(expected) => expected,
            None => match failure {
                Some(source) => {
                    return Err(EngineError::Unresumable {
                        downloaded,
                        source: Some(source),
                    })
                }
                None => downloaded,
            },
        };

        finalize(&self.working, &self.final_path, bytes)
            .map_err(|e| EngineError::local(&self.final_path, e))?;
        tracing::info!("saved {} ({} bytes)", self.final_path.display(), bytes);
        Ok(DownloadOutcome::Completed {
            path: self.final_path.clone(),
            bytes,
        })
    }

    /// Stop every worker and save the block state as a trailer. Returns the
    /// error to report: `reason`, or why the state could not be saved.
    fn persist_and_abort(&mut self, reason: EngineError) -> EngineError {
        self.shared.halt.raise();
        self.scheduler.halt_all();
        let downloaded = self.scheduler.downloaded();

        let Some(size) = self.shared.task.known_size() else {
            let source = match reason {
                EngineError::Interrupted(_) => Some(crate::retry::TransferError::Cancelled),
                EngineError::Incomplete { source, .. } => source,
                _ => None,
            };
            return EngineError::Unresumable { downloaded, source };
        };

        let blocks = self.scheduler.snapshots();
        if let Err(e) = resume_store::save(&self.working, size, &blocks) {
            tracing::warn!("could not save resume state: {:#}", e);
            return EngineError::local(&self.working, e);
        }
        tracing::info!(
            "saved progress of {} ({} of {} bytes)",
            self.working.display(),
            downloaded,
            size
        );
        reason
    }
}
