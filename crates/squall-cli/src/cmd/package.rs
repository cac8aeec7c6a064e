//! `pack` and `releasify`

use std::path::Path;

use anyhow::{Context, Result};
use squall_core::diff::DiffBackend;
use squall_core::package::{ReleasePackageBuilder, current_platform};
use squall_core::{Config, PackageArchive, Publisher, Reporter};

use crate::PackageArgs;

fn build(args: &PackageArgs) -> Result<PackageArchive> {
    let mut builder = ReleasePackageBuilder::new(&args.id, args.pkg_version.clone())?
        .platform(args.platform.clone().unwrap_or_else(current_platform))
        .include_debug_symbols(args.include_debug_symbols);
    if let Some(title) = &args.title {
        builder = builder.title(title);
    }
    if let Some(notes) = &args.notes {
        builder = builder.release_notes(notes);
    }
    builder
        .build(&args.build_dir)
        .with_context(|| format!("Failed to package {}", args.build_dir.display()))
}

/// Build a full package into `out_dir`.
pub fn pack(args: &PackageArgs, out_dir: &Path, reporter: &dyn Reporter) -> Result<()> {
    let archive = build(args)?;
    let name = squall_schema::full_filename(&args.id, &args.pkg_version);
    let path = out_dir.join(&name);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    archive.write(&path)?;

    let size = std::fs::metadata(&path).map(|m| m.len()).ok();
    reporter.done(&name, "packed", size);
    Ok(())
}

/// Build a package and publish it, with its delta, into `releases`.
pub async fn releasify(
    args: &PackageArgs,
    releases: &Path,
    backend: Option<DiffBackend>,
    config: &Config,
    reporter: &dyn Reporter,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(backend) = backend {
        config.delta.backend = backend;
    }

    reporter.section("Releasifying");
    let archive = build(args)?;
    let publisher = Publisher::new(releases, config.delta_builder());
    let outcome = publisher.publish(archive).await?;

    reporter.done(&outcome.full.filename, "full", Some(outcome.full.filesize));
    match (&outcome.delta, &outcome.stats) {
        (Some(delta), Some(stats)) => {
            reporter.done(&delta.filename, "delta", Some(delta.filesize));
            reporter.info(&format!(
                "  {} diffed, {} copied, {} deleted, {} unchanged",
                stats.diffed, stats.copied, stats.deleted, stats.unchanged
            ));
        }
        _ => reporter.info("  no previous full release, delta skipped"),
    }
    Ok(())
}
