//! Metadata phase: pick a backend, probe the target, follow redirects.
//!
//! Failed probes and redirects draw from the same budget (`task.tries`,
//! 0 = unlimited).

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::EngineError;
use crate::backend::{select_backend, Backend, Probe};
use crate::control::CancelToken;
use crate::retry::{classify, RetryDecision, RetryPolicy};
use crate::task::Task;

pub(super) fn resolve(
    preset: Option<&Arc<dyn Backend>>,
    mut task: Task,
    cancel: &CancelToken,
) -> Result<(Arc<dyn Backend>, Task), EngineError> {
    let policy = RetryPolicy::from_budget(task.tries, task.retry_interval);
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        attempt += 1;
        let backend = match preset {
            Some(b) => Arc::clone(b),
            None => select_backend(&task)
                .ok_or_else(|| EngineError::UnsupportedProtocol(task.url.clone()))?,
        };

        match backend.fetch_metadata(&task) {
            Ok(Probe::Info(meta)) => {
                tracing::info!(
                    "{} via {}: size {}, resumable {}, directory {}",
                    task.url,
                    backend.name(),
                    meta.size,
                    meta.resumable,
                    meta.is_directory
                );
                task.size = meta.size;
                task.resumable = meta.resumable;
                task.is_directory = meta.is_directory;
                task.filename_hint = meta.filename_hint;
                return Ok((backend, task));
            }
            Ok(Probe::Redirect(location)) => {
                tracing::info!("{} redirects to {}", task.url, location);
                if !policy.allows(attempt + 1) {
                    return Err(EngineError::RetriesExhausted {
                        url: task.url,
                        attempts: attempt,
                        source: None,
                    });
                }
                task.url = location;
            }
            Err(e) => match policy.decide(attempt, classify(&e)) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        "metadata attempt {} for {} failed: {}; retrying in {:?}",
                        attempt,
                        task.url,
                        e,
                        delay
                    );
                    sleep_unless_cancelled(delay, cancel);
                }
                RetryDecision::NoRetry if e.is_retryable() => {
                    return Err(EngineError::RetriesExhausted {
                        url: task.url,
                        attempts: attempt,
                        source: Some(e),
                    });
                }
                RetryDecision::NoRetry => {
                    return Err(EngineError::Metadata {
                        url: task.url,
                        source: e,
                    });
                }
            },
        }
    }
}

fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + delay;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
