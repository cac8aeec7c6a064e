//! `upload` and `download`

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use squall_core::sync::{SyncSession, UploadAction, UploadOptions, store_from_url};
use squall_core::{Config, Reporter};

fn session(location: &str, config: &Config, reporter: Arc<dyn Reporter>) -> Result<SyncSession> {
    let store = store_from_url(location).with_context(|| format!("Invalid feed '{location}'"))?;
    Ok(SyncSession::new(store)
        .with_retry(config.retry_policy())
        .with_reporter(reporter))
}

pub async fn upload(
    releases: &Path,
    to: &str,
    keep: Option<usize>,
    config: &Config,
    reporter: Arc<dyn Reporter>,
) -> Result<()> {
    let mut session = session(to, config, reporter.clone())?;
    let options = UploadOptions {
        keep_max_releases: keep.or(config.sync.keep_max_releases),
    };
    let summary = session.upload_releases(releases, options).await?;

    let copied = summary.count(|a| matches!(a, UploadAction::Copied { .. }));
    let skipped = summary.count(|a| matches!(a, UploadAction::Skipped));
    if copied + skipped > 0 {
        reporter.info(&format!("{skipped} unchanged, {copied} deduplicated by copy"));
    }
    for entry in &summary.retired {
        reporter.info(&format!("retired {}", entry.filename));
    }
    Ok(())
}

pub async fn download(
    from: &str,
    releases: &Path,
    config: &Config,
    reporter: Arc<dyn Reporter>,
) -> Result<()> {
    let mut session = session(from, config, reporter.clone())?;
    let summary = session.download_releases(releases).await?;
    if let Some(latest) = summary.latest {
        reporter.info(&format!("latest release: {latest}"));
    }
    Ok(())
}
