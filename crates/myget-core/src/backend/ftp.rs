//! FTP backend.
//!
//! Size comes from `SIZE` (a libcurl no-body request); resumption uses
//! `REST`, which streams to end of file so a woken block keeps reading into
//! its absorbed range. Directories are detected by a trailing `/` or by a
//! failed file lookup whose listing succeeds, and listed with `NLST`.

use curl::easy::Easy;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use super::transfer::{accept_any, stream_with_curl, BlockTransfer};
use super::{apply_common, Backend, Metadata, Probe};
use crate::retry::TransferError;
use crate::task::Task;

#[derive(Debug, Default, Clone, Copy)]
pub struct FtpBackend;

fn request(task: &Task, url: &str) -> Result<Easy, curl::Error> {
    let mut easy = Easy::new();
    easy.url(url)?;
    apply_common(&mut easy, task)?;
    if task.ftp_active {
        use_active_mode(&mut easy)?;
    }
    Ok(easy)
}

/// `PORT` on the control connection's own address instead of `PASV`.
fn use_active_mode(easy: &mut Easy) -> Result<(), curl::Error> {
    static SAME_ADDRESS: &[u8] = b"-\0";
    // SAFETY: the handle is live for the call and libcurl copies string options.
    let rc = unsafe {
        curl_sys::curl_easy_setopt(
            easy.raw(),
            curl_sys::CURLOPT_FTPPORT,
            SAME_ADDRESS.as_ptr() as *const std::os::raw::c_char,
        )
    };
    if rc == curl_sys::CURLE_OK {
        Ok(())
    } else {
        Err(curl::Error::new(rc))
    }
}

fn directory_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

fn directory() -> Probe {
    Probe::Info(Metadata {
        size: -1,
        resumable: false,
        is_directory: true,
        filename_hint: None,
    })
}

/// Runs `NLST` on `url`, handing each received chunk to `sink`.
fn nlst<W: Write>(task: &Task, url: &str, sink: &mut W) -> Result<(), TransferError> {
    let mut easy = request(task, url)?;
    easy.custom_request("NLST")?;
    let mut disk_error: Option<io::Error> = None;
    let result = {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| match sink.write_all(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                disk_error = Some(e);
                Ok(0)
            }
        })?;
        transfer.perform()
    };
    if let Some(e) = disk_error {
        return Err(TransferError::Storage(e));
    }
    result.map_err(TransferError::Curl)
}

impl Backend for FtpBackend {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn fetch_metadata(&self, task: &Task) -> Result<Probe, TransferError> {
        if task.url.ends_with('/') {
            return Ok(directory());
        }

        let mut easy = request(task, &task.url)?;
        easy.nobody(true)?;
        let lookup = easy
            .perform()
            .and_then(|()| easy.content_length_download())
            .map_err(TransferError::Curl);

        let size = match lookup {
            Ok(len) if len >= 0.0 => return Ok(Probe::Info(file_info(len as i64))),
            Ok(_) => None,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => Some(e),
        };

        // No size: either a directory or a server without SIZE.
        if nlst(task, &directory_url(&task.url), &mut io::sink()).is_ok() {
            tracing::debug!("{} is an FTP directory", task.url);
            return Ok(directory());
        }
        match size {
            Some(e) => Err(e),
            None => Ok(Probe::Info(file_info(-1))),
        }
    }

    fn download(&self, task: &Task, xfer: &mut BlockTransfer<'_>) -> Result<(), TransferError> {
        let mut easy = request(task, &task.url)?;
        let resumable = task.resumable;
        stream_with_curl(&mut easy, xfer, accept_any, |easy, offset| {
            if resumable {
                easy.resume_from(offset)
            } else {
                Ok(())
            }
        })
    }

    fn list_directory(&self, task: &Task, output: &Path) -> Result<(), TransferError> {
        let mut file = File::create(output).map_err(TransferError::Storage)?;
        nlst(task, &directory_url(&task.url), &mut file)?;
        file.flush().map_err(TransferError::Storage)
    }
}

fn file_info(size: i64) -> Metadata {
    Metadata {
        size,
        resumable: size >= 0,
        is_directory: false,
        filename_hint: None,
    }
}
