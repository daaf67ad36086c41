//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves one static body at `/file.bin`. Honours open-ended and closed
//! `Range: bytes=` requests with `206 Partial Content`, can ignore ranges,
//! redirect `/old` to `/file.bin`, suggest a filename, and trickle the body
//! slowly so a test can interrupt a transfer midway.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// `Content-Disposition` filename to send, if any.
    pub filename: Option<String>,
    /// Write the body in pieces of this size, sleeping `delay` between them.
    pub chunk: usize,
    pub delay: Duration,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            filename: None,
            chunk: 16 * 1024,
            delay: Duration::ZERO,
        }
    }
}

pub struct RangeServer {
    base: String,
    requests: Arc<AtomicUsize>,
    heads: Arc<Mutex<Vec<String>>>,
}

impl RangeServer {
    /// URL of the served file.
    pub fn url(&self) -> String {
        format!("{}file.bin", self.base)
    }

    /// URL that answers `302 Found` pointing at [`url`](Self::url).
    pub fn redirect_url(&self) -> String {
        format!("{}old", self.base)
    }

    pub fn missing_url(&self) -> String {
        format!("{}missing", self.base)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Raw request heads received so far, in arrival order.
    pub fn request_heads(&self) -> Vec<String> {
        self.heads.lock().unwrap().clone()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let requests = Arc::new(AtomicUsize::new(0));
    let heads = Arc::new(Mutex::new(Vec::new()));
    let counter = Arc::clone(&requests);
    let log = Arc::clone(&heads);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let log = Arc::clone(&log);
            counter.fetch_add(1, Ordering::SeqCst);
            thread::spawn(move || handle(stream, &body, &opts, &log));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{}/", port),
        requests,
        heads,
    }
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &RangeServerOptions, log: &Mutex<Vec<String>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    log.lock().unwrap().push(request.to_string());
    let (method, path, range) = parse_request(request);

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }
    if path == "/old" {
        let _ = stream.write_all(
            b"HTTP/1.1 302 Found\r\nLocation: /file.bin\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }
    if path != "/file.bin" {
        let _ = stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }

    let total = body.len() as u64;
    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) if start >= total || end_incl < start => (
            "416 Range Not Satisfiable",
            Some(format!("bytes */{}", total)),
            &body[0..0],
        ),
        Some((start, end_incl)) => {
            let end_excl = end_incl.saturating_add(1).min(total);
            (
                "206 Partial Content",
                Some(format!("bytes {}-{}/{}", start, end_excl - 1, total)),
                &body[start as usize..end_excl as usize],
            )
        }
        None => ("200 OK", None, body),
    };

    let mut head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        slice.len()
    );
    if let Some(range) = content_range {
        head.push_str(&format!("Content-Range: {}\r\n", range));
    }
    if opts.support_ranges {
        head.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(name) = &opts.filename {
        head.push_str(&format!("Content-Disposition: attachment; filename=\"{}\"\r\n", name));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    for piece in slice.chunks(opts.chunk.max(1)) {
        if stream.write_all(piece).is_err() {
            return;
        }
        if !opts.delay.is_zero() {
            thread::sleep(opts.delay);
        }
    }
}

/// Returns (method, path, optional (start, end_inclusive)) for `Range: bytes=X-[Y]`.
fn parse_request(request: &str) -> (&str, &str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("");
    let path = first.next().unwrap_or("");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            continue;
        };
        if let Some((a, b)) = spec.split_once('-') {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = b.trim();
            let end_incl = if end.is_empty() {
                u64::MAX
            } else {
                end.parse::<u64>().unwrap_or(0)
            };
            range = Some((start, end_incl));
        }
    }
    (method, path, range)
}
