//! Single-line text progress on stderr.

use myget_core::{ProgressSink, ProgressSnapshot};
use std::io::{self, Write};
use std::time::Duration;

pub struct TextProgress {
    label: String,
    last_width: usize,
}

impl TextProgress {
    pub fn new(url: &str) -> Self {
        let label = url.rsplit('/').find(|s| !s.is_empty()).unwrap_or(url);
        Self {
            label: label.to_string(),
            last_width: 0,
        }
    }

    fn draw(&mut self, line: String) {
        let pad = self.last_width.saturating_sub(line.len());
        let mut err = io::stderr().lock();
        let _ = write!(err, "\r{}{}", line, " ".repeat(pad));
        let _ = err.flush();
        self.last_width = line.len();
    }
}

impl ProgressSink for TextProgress {
    fn report(&mut self, progress: &ProgressSnapshot) {
        let line = render_line(&self.label, progress);
        self.draw(line);
    }

    fn finish(&mut self, progress: &ProgressSnapshot) {
        let line = render_line(&self.label, progress);
        self.draw(line);
        eprintln!();
    }
}

pub(crate) fn render_line(label: &str, p: &ProgressSnapshot) -> String {
    let done = p.bytes_done();
    let rate = human_bytes(p.bytes_per_sec() as u64);
    match (p.total, p.fraction()) {
        (Some(total), Some(fraction)) => {
            let eta = p
                .eta()
                .map(format_eta)
                .unwrap_or_else(|| "--:--".to_string());
            format!(
                "{} {:5.1}% {}/{} {}/s [{} blocks] eta {}",
                label,
                fraction * 100.0,
                human_bytes(done),
                human_bytes(total),
                rate,
                p.active_blocks(),
                eta
            )
        }
        _ => format!("{} {} {}/s", label, human_bytes(done), rate),
    }
}

pub(crate) fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    } else {
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}
