//! `myget status` – inspect the resume trailer of a working file.

use anyhow::{Context, Result};
use myget_core::block::BlockSnapshot;
use myget_core::resume_store::{self, LocatedTrailer};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub(crate) struct StatusReport {
    pub path: String,
    pub size: u64,
    pub downloaded: u64,
    pub active_blocks: usize,
    pub checksum: String,
    pub blocks: Vec<BlockRow>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BlockRow {
    pub start: i64,
    pub downloaded: i64,
    pub size: i64,
}

impl From<&BlockSnapshot> for BlockRow {
    fn from(b: &BlockSnapshot) -> Self {
        Self {
            start: b.start,
            downloaded: b.downloaded,
            size: b.size,
        }
    }
}

impl StatusReport {
    pub(crate) fn new(path: &Path, trailer: &LocatedTrailer) -> Self {
        let active: Vec<&BlockSnapshot> = trailer.blocks.iter().filter(|b| b.is_active()).collect();
        let downloaded = active
            .iter()
            .map(|b| u64::try_from(b.downloaded).unwrap_or(0))
            .sum();
        Self {
            path: path.display().to_string(),
            size: trailer.size,
            downloaded,
            active_blocks: active.len(),
            checksum: hex::encode(trailer.checksum),
            blocks: trailer.blocks.iter().map(BlockRow::from).collect(),
        }
    }
}

pub fn run_status(path: &Path, json: bool) -> Result<()> {
    let trailer = resume_store::locate(path)
        .with_context(|| format!("read resume state from {}", path.display()))?;
    let Some(trailer) = trailer else {
        if json {
            println!("null");
        } else {
            println!("No resume state in {}.", path.display());
        }
        return Ok(());
    };

    let report = StatusReport::new(path, &trailer);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let pct = if report.size == 0 {
        100.0
    } else {
        report.downloaded as f64 * 100.0 / report.size as f64
    };
    println!("{}", report.path);
    println!(
        "  {} of {} bytes ({:.1}%), {} active blocks, checksum {}",
        report.downloaded, report.size, pct, report.active_blocks, report.checksum
    );
    println!("  {:<6} {:<14} {:<14} {}", "BLOCK", "START", "SIZE", "DONE");
    for (i, b) in report.blocks.iter().enumerate() {
        if b.start < 0 {
            println!("  {:<6} {:<14} {:<14} {}", i, "-", "-", "absorbed");
        } else {
            println!("  {:<6} {:<14} {:<14} {}", i, b.start, b.size, b.downloaded);
        }
    }
    Ok(())
}
