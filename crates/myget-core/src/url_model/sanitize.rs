//! Filename sanitization for Linux.

const NAME_MAX: usize = 255;

/// Makes a server-supplied name safe to create in the download directory.
///
/// Separators, NUL, control characters and whitespace become `_` (runs
/// collapsed); leading and trailing dots and underscores are stripped so the
/// result can never escape the directory; at most 255 bytes are kept.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let c = if c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}
