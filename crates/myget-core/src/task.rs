//! A single download request and the metadata the engine learns about it.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::url_model::percent_decode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Proxy {
    /// Parses `http://[user:pass@]host[:port]` or `socks5://host[:port]`.
    /// A bare `host:port` is taken as an HTTP proxy.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let with_scheme = if spec.contains("://") {
            spec.to_string()
        } else {
            format!("http://{}", spec)
        };
        let url = Url::parse(&with_scheme).with_context(|| format!("invalid proxy {}", spec))?;
        let kind = match url.scheme() {
            "http" | "https" => ProxyKind::Http,
            "socks5" | "socks5h" => ProxyKind::Socks5,
            other => bail!("unsupported proxy scheme {}", other),
        };
        let host = url
            .host_str()
            .with_context(|| format!("proxy {} has no host", spec))?
            .to_string();
        let port = url.port().unwrap_or(match kind {
            ProxyKind::Http => 3128,
            ProxyKind::Socks5 => 1080,
        });
        // Userinfo comes back percent-encoded; curl wants it raw.
        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(percent_decode);
        let password = url.password().map(percent_decode);
        Ok(Self {
            kind,
            host,
            port,
            username,
            password,
        })
    }

    /// Proxy URL in the form libcurl expects (no credentials).
    pub fn curl_url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5h",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// One download request.
///
/// The caller fills the request fields; `fetch_metadata` fills `size`,
/// `resumable`, `is_directory` and `filename_hint`.
#[derive(Debug, Clone)]
pub struct Task {
    pub url: String,
    pub proxy: Option<Proxy>,
    /// Blocks a fresh download is split into.
    pub threads: usize,
    /// Connect timeout and stall timeout for each transfer.
    pub timeout: Duration,
    /// Metadata attempts (redirects included). 0 = unlimited.
    pub tries: u32,
    pub retry_interval: Duration,
    /// Directory to save into (None = current directory).
    pub local_dir: Option<PathBuf>,
    /// Overrides the derived filename.
    pub local_file: Option<String>,
    pub referer: Option<String>,
    pub ftp_active: bool,
    pub user_agent: Option<String>,
    /// Extra request header lines (`Name: value`), HTTP only.
    pub headers: Vec<String>,
    /// Verify the server certificate and host name on TLS connections.
    pub verify_tls: bool,

    /// Total size in bytes, -1 when unknown.
    pub size: i64,
    pub is_directory: bool,
    pub resumable: bool,
    pub filename_hint: Option<String>,
}

impl Task {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy: None,
            threads: 4,
            timeout: Duration::from_secs(30),
            tries: 99,
            retry_interval: Duration::from_secs(5),
            local_dir: None,
            local_file: None,
            referer: None,
            ftp_active: false,
            user_agent: None,
            headers: Vec::new(),
            verify_tls: true,
            size: -1,
            is_directory: false,
            resumable: false,
            filename_hint: None,
        }
    }

    /// URL scheme, lowercased (`http`, `https`, `ftp`, ...).
    pub fn scheme(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .map(|u| u.scheme().to_ascii_lowercase())
    }

    /// Expected size when known.
    pub fn known_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok()
    }

    /// Child task for one entry of a remote directory, saved under `dir`.
    pub fn for_entry(&self, url: String, dir: PathBuf) -> Self {
        let mut child = Task::new(url);
        child.proxy = self.proxy.clone();
        child.threads = self.threads;
        child.timeout = self.timeout;
        child.tries = self.tries;
        child.retry_interval = self.retry_interval;
        child.local_dir = Some(dir);
        child.referer = self.referer.clone();
        child.ftp_active = self.ftp_active;
        child.user_agent = self.user_agent.clone();
        child.headers = self.headers.clone();
        child.verify_tls = self.verify_tls;
        child
    }
}

/// Checks a `Name: value` header line and returns it in canonical form.
pub fn normalize_header(raw: &str) -> Result<String> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header {:?} is not of the form 'Name: value'", raw);
    };
    let name = name.trim();
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
        bail!("invalid header name in {:?}", raw);
    }
    if value.contains(['\r', '\n']) {
        bail!("header {:?} spans lines", raw);
    }
    Ok(format!("{}: {}", name, value.trim()))
}
