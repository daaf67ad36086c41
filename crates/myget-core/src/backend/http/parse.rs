//! Response header parsing for the metadata probe.

use url::Url;

use super::super::{Metadata, Probe};
use crate::retry::TransferError;
use crate::url_model::parse_content_disposition_filename;

/// `Content-Range: bytes first-last/total` (either side may be `*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub first: Option<u64>,
    pub total: Option<u64>,
}

impl ContentRange {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let first = match range.trim() {
            "*" => None,
            r => Some(r.split_once('-')?.0.trim().parse().ok()?),
        };
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        Some(Self { first, total })
    }
}

/// Headers of the last response in a header stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub location: Option<String>,
    pub content_disposition: Option<String>,
}

/// Parse collected header lines. A new status line starts a new response
/// (proxies and `100 Continue` produce several).
pub(crate) fn parse_headers(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(code) = super::super::transfer::parse_status_line(line.as_bytes()) {
            head = ResponseHead {
                status: Some(code),
                ..ResponseHead::default()
            };
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            head.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            head.content_range = ContentRange::parse(value);
        } else if name.eq_ignore_ascii_case("location") {
            head.location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            head.content_disposition = Some(value.to_string());
        }
    }
    head
}

/// Interpret the answer to a `Range: bytes=1-` probe of `url`.
pub(crate) fn interpret(head: &ResponseHead, url: &str) -> Result<Probe, TransferError> {
    let status = head
        .status
        .ok_or_else(|| TransferError::Protocol("response without status line".into()))?;
    let filename_hint = head
        .content_disposition
        .as_deref()
        .and_then(parse_content_disposition_filename);

    let (size, resumable) = match status {
        206 => {
            let range = head.content_range;
            let size = match (range.and_then(|r| r.total), range.and_then(|r| r.first)) {
                (Some(total), _) => Some(total),
                (None, Some(1)) => head.content_length.map(|len| len + 1),
                _ => None,
            };
            match size {
                Some(s) => (s as i64, true),
                None => (-1, false),
            }
        }
        // Range past the end: the file has 0 or 1 bytes.
        416 => match head.content_range.and_then(|r| r.total) {
            Some(total) => (total as i64, true),
            None => return Err(TransferError::Http(status)),
        },
        200..=299 => (head.content_length.map_or(-1, |l| l as i64), false),
        301 | 302 | 303 | 307 | 308 => {
            let location = head.location.as_deref().ok_or_else(|| {
                TransferError::Protocol(format!("HTTP {} without Location", status))
            })?;
            let target = Url::parse(url)
                .and_then(|base| base.join(location))
                .map_err(|e| TransferError::Protocol(format!("bad Location {}: {}", location, e)))?;
            return Ok(Probe::Redirect(target.into()));
        }
        _ => return Err(TransferError::Http(status)),
    };

    Ok(Probe::Info(Metadata {
        size,
        resumable,
        is_directory: false,
        filename_hint,
    }))
}
