//! Transfer backends.
//!
//! Exactly one backend serves a task: HTTP(S) or FTP, both on libcurl via the
//! `curl` crate. The core only shapes requests (ranges, resume offsets,
//! proxy, referer) and classifies responses; framing is libcurl's job.

mod ftp;
mod http;
mod transfer;

pub use ftp::FtpBackend;
pub use http::HttpBackend;
pub use transfer::{BlockTransfer, Flow};

use curl::easy::Easy;
use std::path::Path;
use std::sync::Arc;

use crate::retry::TransferError;
use crate::task::{ProxyKind, Task};

/// What a metadata fetch learned about the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Total size in bytes, -1 when unknown.
    pub size: i64,
    pub resumable: bool,
    pub is_directory: bool,
    /// Server-suggested filename.
    pub filename_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Info(Metadata),
    /// Absolute URL to fetch instead.
    Redirect(String),
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Size, resumability and kind of the target, or where it moved.
    fn fetch_metadata(&self, task: &Task) -> Result<Probe, TransferError>;

    /// Fill one block, resuming from `start + downloaded` when the task is
    /// resumable. Returns once the block is done and was not handed more work.
    fn download(&self, task: &Task, xfer: &mut BlockTransfer<'_>) -> Result<(), TransferError>;

    /// Write the names in a remote directory to `output`, one per line.
    fn list_directory(&self, task: &Task, output: &Path) -> Result<(), TransferError>;
}

/// An HTTP proxy carries every scheme; otherwise the URL scheme decides.
pub fn select_backend(task: &Task) -> Option<Arc<dyn Backend>> {
    if matches!(&task.proxy, Some(p) if p.kind == ProxyKind::Http) {
        return Some(Arc::new(HttpBackend));
    }
    match task.scheme()?.as_str() {
        "http" | "https" => Some(Arc::new(HttpBackend)),
        "ftp" => Some(Arc::new(FtpBackend)),
        _ => None,
    }
}

/// Options shared by every request: proxy, timeouts, user agent, TLS checks.
fn apply_common(easy: &mut Easy, task: &Task) -> Result<(), curl::Error> {
    if let Some(proxy) = &task.proxy {
        easy.proxy(&proxy.curl_url())?;
        if let Some(user) = &proxy.username {
            easy.proxy_username(user)?;
        }
        if let Some(pass) = &proxy.password {
            easy.proxy_password(pass)?;
        }
    }
    easy.connect_timeout(task.timeout)?;
    // Stall detection rather than a wall-clock limit: large blocks may run long.
    easy.low_speed_limit(1)?;
    easy.low_speed_time(task.timeout)?;
    if let Some(agent) = &task.user_agent {
        easy.useragent(agent)?;
    }
    if !task.verify_tls {
        easy.ssl_verify_peer(false)?;
        easy.ssl_verify_host(false)?;
    }
    Ok(())
}
