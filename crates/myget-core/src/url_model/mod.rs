//! URL helpers: local filename derivation and directory entry URLs.
//!
//! Filenames come from the `Content-Disposition` hint or the last URL path
//! segment, sanitized for Linux filesystems.

mod content_disposition;
mod path;
mod sanitize;

pub use content_disposition::{parse_content_disposition_filename, percent_decode};
pub use path::{directory_name, entry_url, filename_from_url_path};
pub use sanitize::sanitize_filename;

/// Name used when neither the URL path nor the server suggest one.
pub const DEFAULT_FILENAME: &str = "index.html";

/// Picks the local filename for a download.
///
/// `hint` is a filename the server suggested (already extracted from
/// `Content-Disposition`); it wins over the URL path.
///
/// - `derive_filename("http://host/pub/a.iso", None)` → `"a.iso"`
/// - `derive_filename("http://host/", None)` → `"index.html"`
pub fn derive_filename(url: &str, hint: Option<&str>) -> String {
    let candidate = hint
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| filename_from_url_path(url));

    let Some(raw) = candidate else {
        return DEFAULT_FILENAME.to_string();
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}
