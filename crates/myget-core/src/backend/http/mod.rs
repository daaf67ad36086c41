//! HTTP(S) backend.
//!
//! Metadata comes from a `Range: bytes=1-` GET whose body is discarded: a
//! `206` proves the server honours ranges. Blocks are fetched with
//! open-ended ranges so a woken block keeps reading the same response into
//! the range it absorbed.

mod parse;

use curl::easy::{Easy, List};
use std::path::Path;
use std::str;

use super::transfer::{stream_with_curl, BlockTransfer};
use super::{apply_common, Backend, Probe};
use crate::retry::TransferError;
use crate::task::Task;

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpBackend;

fn request(task: &Task) -> Result<Easy, curl::Error> {
    let mut easy = Easy::new();
    easy.url(&task.url)?;
    apply_common(&mut easy, task)?;
    easy.referer(task.referer.as_deref().unwrap_or(&task.url))?;
    if !task.headers.is_empty() {
        let mut list = List::new();
        for line in &task.headers {
            list.append(line)?;
        }
        easy.http_headers(list)?;
    }
    Ok(easy)
}

/// Body bytes may only be written for a success status, and a non-zero
/// offset must be answered with a partial response.
fn check_status(status: Option<u32>, offset: u64) -> Result<(), TransferError> {
    match status {
        None | Some(206) => Ok(()),
        Some(200) if offset > 0 => Err(TransferError::RangeIgnored(offset)),
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(code) => Err(TransferError::Http(code)),
    }
}

impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch_metadata(&self, task: &Task) -> Result<Probe, TransferError> {
        let mut easy = request(task)?;
        easy.follow_location(false)?;
        easy.range("1-")?;

        let mut lines: Vec<String> = Vec::new();
        let result = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })?;
            // Headers are all we need; refuse the body.
            transfer.write_function(|_| Ok(0))?;
            transfer.perform()
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_write_error() => {}
            Err(e) => return Err(TransferError::Curl(e)),
        }

        let head = parse::parse_headers(&lines);
        let probe = parse::interpret(&head, &task.url)?;
        tracing::debug!("HTTP probe of {}: {:?}", task.url, probe);
        Ok(probe)
    }

    fn download(&self, task: &Task, xfer: &mut BlockTransfer<'_>) -> Result<(), TransferError> {
        let mut easy = request(task)?;
        easy.follow_location(true)?;
        let resumable = task.resumable;
        stream_with_curl(&mut easy, xfer, check_status, |easy, offset| {
            if resumable {
                easy.range(&format!("{}-", offset))
            } else {
                Ok(())
            }
        })
    }

    fn list_directory(&self, task: &Task, _output: &Path) -> Result<(), TransferError> {
        Err(TransferError::Protocol(format!(
            "{} is not a listable directory over HTTP",
            task.url
        )))
    }
}
