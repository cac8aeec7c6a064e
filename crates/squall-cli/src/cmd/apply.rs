//! `apply`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use semver::Version;
use squall_core::apply::{ApplyOutcome, NoProcesses, UpdateApplier};
use squall_core::{Config, Reporter};

#[derive(Debug)]
pub struct ApplyArgs<'a> {
    pub releases: &'a Path,
    pub install: &'a Path,
    pub target: Option<&'a Version>,
    pub relaunch: Option<PathBuf>,
    pub process_control: bool,
}

pub async fn apply(args: ApplyArgs<'_>, config: &Config, reporter: &dyn Reporter) -> Result<()> {
    let mut applier = UpdateApplier::new(args.install, args.releases)
        .with_exit_timeout(config.exit_timeout());
    if !args.process_control {
        applier = applier.with_process_control(Arc::new(NoProcesses));
    }
    if let Some(exe) = args.relaunch {
        applier = applier.with_relaunch(exe, Vec::new());
    }
    let applier = Arc::new(applier);

    // Ctrl-C cancels while staging
    let ctrl_c = tokio::spawn({
        let applier = applier.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() && !applier.cancel() {
                eprintln!("update can no longer be cancelled, finishing before exit");
            }
        }
    });

    reporter.section("Applying");
    let result = match args.target {
        Some(target) => applier.apply(target).await,
        None => applier.apply_latest().await,
    };
    ctrl_c.abort();

    match result? {
        ApplyOutcome::UpToDate(version) => reporter.info(&format!("already at {version}")),
        ApplyOutcome::Updated { from, to } => {
            let from = from.map_or_else(|| "nothing".to_string(), |v| v.to_string());
            reporter.done(
                &args.install.display().to_string(),
                &format!("{from} -> {to}"),
                None,
            );
        }
    }
    Ok(())
}
