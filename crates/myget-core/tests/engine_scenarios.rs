//! Engine scenarios driven by an in-memory backend: resume from a trailer,
//! corrupt trailers, unknown sizes, fatal block errors and directories.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use myget_core::backend::{Backend, BlockTransfer, Flow, Metadata, Probe};
use myget_core::block::BlockSnapshot;
use myget_core::resume_store;
use myget_core::retry::{RetryPolicy, TransferError};
use myget_core::{
    CancelToken, DownloadOutcome, Downloader, EngineConfig, EngineError, NullProgress,
    ProgressSink, ProgressSnapshot, Task,
};
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Default)]
struct MemoryBackend {
    files: HashMap<String, Vec<u8>>,
    dirs: HashMap<String, Vec<&'static str>>,
    resumable: bool,
    hide_size: bool,
    /// Requests starting at `.0` get `.1` bytes, then a fatal error.
    fail_at: Option<(u64, usize)>,
    /// Offsets requested by `download`, in arrival order.
    offsets: Mutex<Vec<u64>>,
    /// Each request holds after its first chunk until this many requests
    /// have delivered one, so no block is absorbed before it starts.
    hold_until_started: usize,
    started: AtomicUsize,
    /// Requests at `.0` wait `.1` for their first byte, like a slow server.
    connect_delay: Option<(u64, Duration)>,
    /// Bytes at or past this offset arrive one chunk per 50 ms.
    slow_from: Option<u64>,
}

impl MemoryBackend {
    fn mark_started(&self, xfer: &BlockTransfer<'_>) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.started.load(Ordering::SeqCst) < self.hold_until_started
            && !xfer.should_stop()
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn await_first_byte(&self, offset: u64, xfer: &BlockTransfer<'_>) -> Result<(), TransferError> {
        let Some((_, delay)) = self.connect_delay.filter(|d| d.0 == offset) else {
            return Ok(());
        };
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if xfer.should_stop() {
                return Err(TransferError::Cancelled);
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn fetch_metadata(&self, task: &Task) -> Result<Probe, TransferError> {
        if self.dirs.contains_key(&task.url) {
            return Ok(Probe::Info(Metadata {
                size: -1,
                resumable: false,
                is_directory: true,
                filename_hint: None,
            }));
        }
        let data = self.files.get(&task.url).ok_or(TransferError::Http(404))?;
        Ok(Probe::Info(Metadata {
            size: if self.hide_size { -1 } else { data.len() as i64 },
            resumable: self.resumable,
            is_directory: false,
            filename_hint: None,
        }))
    }

    fn download(&self, task: &Task, xfer: &mut BlockTransfer<'_>) -> Result<(), TransferError> {
        let data = &self.files[&task.url];
        let mut counted = false;
        while let Some(offset) = xfer.next_offset()? {
            self.offsets.lock().unwrap().push(offset);
            self.await_first_byte(offset, xfer)?;
            if let Some((at, len)) = self.fail_at.filter(|f| f.0 == offset) {
                xfer.receive(&data[at as usize..at as usize + len])?;
                self.mark_started(xfer);
                return Err(TransferError::Http(403));
            }
            let mut pos = offset;
            for piece in data[offset as usize..].chunks(1000) {
                if self.slow_from.map_or(false, |from| pos >= from) {
                    thread::sleep(Duration::from_millis(50));
                }
                if xfer.receive(piece)? == Flow::Finished {
                    return Ok(());
                }
                pos += piece.len() as u64;
                if !counted {
                    counted = true;
                    self.mark_started(xfer);
                }
            }
            if xfer.end_of_stream()? == Flow::Finished {
                return Ok(());
            }
        }
        Ok(())
    }

    fn list_directory(&self, task: &Task, output: &Path) -> Result<(), TransferError> {
        let names = self.dirs[&task.url].join("\n");
        fs::write(output, names).map_err(TransferError::Storage)
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(10),
        handoff_window: Duration::from_millis(30),
        buffer_bytes: 4096,
        block_retry: RetryPolicy::unlimited(Duration::from_millis(5)),
    }
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

const URL: &str = "mem://host/data.bin";

fn backend_with(data: &[u8]) -> MemoryBackend {
    MemoryBackend {
        files: HashMap::from([(URL.to_string(), data.to_vec())]),
        resumable: true,
        ..MemoryBackend::default()
    }
}

fn run(backend: Arc<MemoryBackend>, dir: &Path, threads: usize) -> Result<DownloadOutcome, EngineError> {
    let mut task = Task::new(URL);
    task.local_dir = Some(dir.to_path_buf());
    task.threads = threads;
    task.tries = 1;
    Downloader::with_backend(config(), backend).run(task, &CancelToken::new(), &mut NullProgress)
}

#[test]
fn fresh_download_requests_each_block_start() {
    let data = body(40_000);
    let backend = Arc::new(MemoryBackend {
        hold_until_started: 4,
        ..backend_with(&data)
    });
    let dir = tempdir().unwrap();

    run(Arc::clone(&backend), dir.path(), 4).unwrap();

    assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), data);
    let mut offsets = backend.offsets.lock().unwrap().clone();
    offsets.sort();
    assert_eq!(offsets, vec![0, 10_000, 20_000, 30_000]);
}

#[test]
fn resumes_from_trailer_offsets() {
    let data = body(8_000);
    let dir = tempdir().unwrap();
    let working = dir.path().join("data.bin.part");

    // First half of each block already on disk; the third entry was absorbed.
    let mut partial = vec![0u8; 8_000];
    partial[..1_000].copy_from_slice(&data[..1_000]);
    partial[4_000..6_000].copy_from_slice(&data[4_000..6_000]);
    fs::write(&working, &partial).unwrap();
    let saved = vec![
        BlockSnapshot { start: 0, downloaded: 1_000, size: 4_000 },
        BlockSnapshot { start: 4_000, downloaded: 2_000, size: 4_000 },
        BlockSnapshot { start: -1, downloaded: 0, size: 0 },
    ];
    resume_store::save(&working, 8_000, &saved).unwrap();

    let backend = Arc::new(backend_with(&data));
    run(Arc::clone(&backend), dir.path(), 4).unwrap();

    assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), data);
    let mut offsets = backend.offsets.lock().unwrap().clone();
    offsets.sort();
    assert_eq!(offsets, vec![1_000, 6_000]);
    assert!(!working.exists());
}

#[test]
fn completed_blocks_in_trailer_finalize_without_transfer() {
    let data = body(6_000);
    let dir = tempdir().unwrap();
    let working = dir.path().join("data.bin.part");
    fs::write(&working, &data).unwrap();
    resume_store::save(
        &working,
        6_000,
        &[
            BlockSnapshot { start: 0, downloaded: 3_000, size: 3_000 },
            BlockSnapshot { start: 3_000, downloaded: 3_000, size: 3_000 },
        ],
    )
    .unwrap();

    let backend = Arc::new(backend_with(&data));
    let outcome = run(Arc::clone(&backend), dir.path(), 2).unwrap();

    let path = dir.path().join("data.bin");
    assert_eq!(outcome, DownloadOutcome::Completed { path: path.clone(), bytes: 6_000 });
    assert_eq!(fs::metadata(&path).unwrap().len(), 6_000);
    assert_eq!(fs::read(&path).unwrap(), data);
    assert!(backend.offsets.lock().unwrap().is_empty());
}

#[test]
fn corrupt_trailer_forces_fresh_partition() {
    let data = body(9_000);
    let dir = tempdir().unwrap();
    let working = dir.path().join("data.bin.part");
    fs::write(&working, vec![0u8; 9_000]).unwrap();
    resume_store::save(&working, 9_000, &[BlockSnapshot { start: 0, downloaded: 500, size: 9_000 }]).unwrap();
    let mut bytes = fs::read(&working).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&working, bytes).unwrap();

    let backend = Arc::new(backend_with(&data));
    run(Arc::clone(&backend), dir.path(), 3).unwrap();

    assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), data);
    let mut offsets = backend.offsets.lock().unwrap().clone();
    offsets.sort();
    assert_eq!(offsets, vec![0, 3_000, 6_000]);
}

#[test]
fn unknown_size_is_truncated_to_received_bytes() {
    let data = body(12_345);
    let backend = Arc::new(MemoryBackend {
        hide_size: true,
        resumable: false,
        ..backend_with(&data)
    });
    let dir = tempdir().unwrap();

    let outcome = run(Arc::clone(&backend), dir.path(), 4).unwrap();

    let path = dir.path().join("data.bin");
    assert_eq!(outcome, DownloadOutcome::Completed { path: path.clone(), bytes: 12_345 });
    assert_eq!(fs::read(&path).unwrap(), data);
    assert_eq!(*backend.offsets.lock().unwrap(), vec![0]);
}

#[test]
fn fatal_block_error_saves_progress() {
    let data = body(8_000);
    let backend = Arc::new(MemoryBackend {
        fail_at: Some((4_000, 500)),
        hold_until_started: 2,
        ..backend_with(&data)
    });
    let dir = tempdir().unwrap();

    let err = run(Arc::clone(&backend), dir.path(), 2).unwrap_err();

    let working = dir.path().join("data.bin.part");
    match err {
        EngineError::Incomplete {
            path,
            downloaded,
            expected,
            source,
        } => {
            assert_eq!(path, working);
            assert_eq!(expected, 8_000);
            assert_eq!(downloaded, 4_500);
            assert!(matches!(source, Some(TransferError::Http(403))));
        }
        other => panic!("unexpected {:?}", other),
    }
    let saved = resume_store::load(&working, 8_000).expect("trailer");
    assert_eq!(saved[0], BlockSnapshot { start: 0, downloaded: 4_000, size: 4_000 });
    assert_eq!(saved[1], BlockSnapshot { start: 4_000, downloaded: 500, size: 4_000 });
    assert_eq!(&fs::read(&working).unwrap()[4_000..4_500], &data[4_000..4_500]);
    assert!(!dir.path().join("data.bin").exists());
}

#[test]
fn interrupt_during_merge_is_not_held_up_by_absorbed_block() {
    let data = body(20_000);
    // Block 1 would wait 3 s for its first byte; block 0 finishes its own
    // range at once, absorbs block 1 and then streams the rest slowly.
    let backend = Arc::new(MemoryBackend {
        connect_delay: Some((10_000, Duration::from_secs(3))),
        slow_from: Some(10_000),
        ..backend_with(&data)
    });
    let dir = tempdir().unwrap();
    let mut task = Task::new(URL);
    task.local_dir = Some(dir.path().to_path_buf());
    task.threads = 2;
    task.tries = 1;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        trigger.cancel();
    });
    let started = Instant::now();
    let config = EngineConfig {
        handoff_window: Duration::from_millis(500),
        ..config()
    };
    let err = Downloader::with_backend(config, backend)
        .run(task, &cancel, &mut NullProgress)
        .unwrap_err();
    let elapsed = started.elapsed();
    canceller.join().unwrap();

    assert!(matches!(err, EngineError::Interrupted(_)), "{:?}", err);
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
    let saved = resume_store::load(&dir.path().join("data.bin.part"), 20_000).expect("trailer");
    assert_eq!(saved[0].start, 0);
    assert_eq!(saved[0].size, 20_000);
    assert!(saved[0].downloaded >= 10_000);
    assert!(!saved[1].is_active());
}

#[test]
fn cancelled_before_start_touches_nothing() {
    let backend = Arc::new(backend_with(&body(100)));
    let dir = tempdir().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut task = Task::new(URL);
    task.local_dir = Some(dir.path().to_path_buf());
    let err = Downloader::with_backend(config(), backend)
        .run(task, &cancel, &mut NullProgress)
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn directory_entries_are_fetched_into_subdirectory() {
    let mut backend = MemoryBackend {
        resumable: true,
        ..MemoryBackend::default()
    };
    backend.dirs.insert("mem://host/pub/".into(), vec!["a.txt", "", "b.txt", ".."]);
    backend.files.insert("mem://host/pub/a.txt".into(), b"alpha".to_vec());
    backend.files.insert("mem://host/pub/b.txt".into(), b"beta".to_vec());
    let dir = tempdir().unwrap();

    let mut task = Task::new("mem://host/pub/");
    task.local_dir = Some(dir.path().to_path_buf());
    let outcome = Downloader::with_backend(config(), Arc::new(backend))
        .run(task, &CancelToken::new(), &mut NullProgress)
        .unwrap();

    let target = dir.path().join("pub");
    assert_eq!(outcome, DownloadOutcome::Directory { path: target.clone(), entries: 2 });
    assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(target.join("b.txt")).unwrap(), b"beta");
}

#[derive(Default)]
struct Recorder {
    reports: usize,
    last: Option<ProgressSnapshot>,
}

impl ProgressSink for Recorder {
    fn report(&mut self, _progress: &ProgressSnapshot) {
        self.reports += 1;
    }

    fn finish(&mut self, progress: &ProgressSnapshot) {
        self.last = Some(progress.clone());
    }
}

#[test]
fn progress_sink_sees_final_state() {
    let data = body(20_000);
    let dir = tempdir().unwrap();
    let mut task = Task::new(URL);
    task.local_dir = Some(dir.path().to_path_buf());
    task.threads = 2;
    let mut sink = Recorder::default();

    Downloader::with_backend(config(), Arc::new(backend_with(&data)))
        .run(task, &CancelToken::new(), &mut sink)
        .unwrap();

    assert!(sink.reports > 0);
    let last = sink.last.expect("finish called");
    assert_eq!(last.total, Some(20_000));
    assert_eq!(last.bytes_done(), 20_000);
    assert_eq!(last.fraction(), Some(1.0));
}
