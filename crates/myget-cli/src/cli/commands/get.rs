//! `myget get` – download URLs one after another.

use anyhow::{bail, Context, Result};
use myget_core::config::MygetConfig;
use myget_core::task::normalize_header;
use myget_core::{CancelToken, DownloadOutcome, Downloader, NullProgress, ProgressSink, Proxy, Task};
use std::time::Duration;

use crate::cli::progress::TextProgress;
use crate::cli::GetArgs;

pub fn run_get(cfg: &MygetConfig, args: &GetArgs) -> Result<()> {
    if args.file.is_some() && args.urls.len() > 1 {
        bail!("--file can only be used with a single URL");
    }
    let proxy = args
        .proxy
        .as_deref()
        .or(cfg.proxy.as_deref())
        .map(Proxy::parse)
        .transpose()
        .context("parse proxy")?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install Ctrl-C handler")?;

    let downloader = Downloader::new(cfg.engine_config());
    let mut failed = 0usize;
    for url in &args.urls {
        let task = build_task(cfg, args, url, proxy.clone())?;
        let mut sink: Box<dyn ProgressSink> = if args.quiet {
            Box::new(NullProgress)
        } else {
            Box::new(TextProgress::new(url))
        };
        match downloader.run(task, &cancel, sink.as_mut()) {
            Ok(outcome) => report(&outcome, args.quiet),
            Err(err) if err.is_interrupt() => {
                tracing::warn!("{} interrupted: {}", url, err);
                return Err(err).with_context(|| format!("download of {url} stopped"));
            }
            Err(err) => {
                tracing::error!("{} failed: {:#}", url, err);
                eprintln!("myget: {}: {:#}", url, anyhow::Error::new(err));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} downloads failed", failed, args.urls.len());
    }
    Ok(())
}

/// Config values first, then whatever the command line overrides.
pub(crate) fn build_task(
    cfg: &MygetConfig,
    args: &GetArgs,
    url: &str,
    proxy: Option<Proxy>,
) -> Result<Task> {
    let mut task = Task::new(url);
    task.proxy = proxy;
    task.threads = args.threads.unwrap_or(cfg.threads).max(1);
    task.timeout = Duration::from_secs(args.timeout.unwrap_or(cfg.timeout_secs));
    task.tries = args.tries.unwrap_or(cfg.tries);
    task.retry_interval =
        Duration::from_secs(args.retry_interval.unwrap_or(cfg.retry_interval_secs));
    task.local_dir = args.directory.clone().or_else(|| cfg.download_dir.clone());
    task.local_file = args.file.clone();
    task.referer = args.referer.clone();
    task.ftp_active = args.ftp_active;
    task.user_agent = args.user_agent.clone().or_else(|| cfg.user_agent.clone());
    task.headers = args
        .headers
        .iter()
        .map(|h| normalize_header(h))
        .collect::<Result<_>>()?;
    task.verify_tls = !args.no_check_certificate;
    Ok(task)
}

fn report(outcome: &DownloadOutcome, quiet: bool) {
    let line = match outcome {
        DownloadOutcome::AlreadyComplete(path) => {
            format!("{} already downloaded", path.display())
        }
        DownloadOutcome::Completed { path, bytes } => {
            format!("saved {} ({} bytes)", path.display(), bytes)
        }
        DownloadOutcome::Directory { path, entries } => {
            format!("saved {} entries into {}", entries, path.display())
        }
    };
    tracing::info!("{}", line);
    if !quiet {
        println!("{line}");
    }
}
