//! Path segments of target URLs.

use url::Url;

use super::content_disposition::percent_decode;

fn last_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode(segment);
    if decoded.is_empty() || decoded == "." || decoded == ".." {
        return None;
    }
    Some(decoded)
}

/// Last path segment of `url`, percent-decoded. `None` for a bare host or
/// a directory URL (trailing `/`).
pub fn filename_from_url_path(url: &str) -> Option<String> {
    if Url::parse(url).ok()?.path().ends_with('/') {
        return None;
    }
    last_segment(url)
}

/// Local directory name for a remote directory URL: its last segment, or the
/// host when the URL names the server root.
pub fn directory_name(url: &str) -> Option<String> {
    last_segment(url).or_else(|| {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    })
}

/// URL of `entry` inside the directory `dir_url`.
pub fn entry_url(dir_url: &str, entry: &str) -> Option<String> {
    let mut base = Url::parse(dir_url).ok()?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let name = entry.trim().rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    base.join(&format!("./{}", name)).ok().map(String::from)
}
