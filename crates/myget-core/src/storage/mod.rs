//! Disk I/O and working-file lifecycle.
//!
//! Creates and preallocates the `.part` working file (fallocate on Unix when
//! available, else set_len), hands out per-block buffered writers, and
//! finalizes by truncating to the exact size and renaming atomically.

mod buffered;

pub use buffered::{
    BufferedFile, CloseError, PullError, TransferSource, FILE_BUFFER_SIZE, MIN_BUFFER_LEFT,
};

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Working file suffix used before the atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the working file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Create (or truncate) the working file for a fresh download and reserve
/// `size` bytes when the size is known.
pub fn create_working_file(path: &Path, size: Option<u64>) -> Result<()> {
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to create working file: {}", path.display()))?;
    if let Some(size) = size {
        preallocate(&file, size)?;
    }
    Ok(())
}

/// Preallocate `size` bytes. On Unix tries `posix_fallocate` for real block
/// allocation; falls back to `set_len` on failure or non-Unix.
fn preallocate(file: &File, size: u64) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    #[cfg(unix)]
    {
        let fd = file.as_raw_fd();
        let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
        if r == 0 {
            return Ok(());
        }
        tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
    }
    file.set_len(size).context("failed to preallocate file")?;
    Ok(())
}

/// Truncate the working file to exactly `size` bytes (dropping any resume
/// trailer) and atomically rename it to `final_path`.
pub fn finalize(working: &Path, final_path: &Path, size: u64) -> Result<()> {
    {
        let file = File::options()
            .write(true)
            .open(working)
            .with_context(|| format!("failed to open working file: {}", working.display()))?;
        file.set_len(size)
            .with_context(|| format!("failed to truncate {} to {}", working.display(), size))?;
        file.sync_all().context("working file sync failed")?;
    }
    std::fs::rename(working, final_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            working.display(),
            final_path.display()
        )
    })?;
    Ok(())
}
