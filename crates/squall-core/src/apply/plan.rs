use std::path::Path;

use semver::Version;
use squall_schema::{ReleaseEntry, ReleaseManifest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ApplyError;
use crate::archive::PackageArchive;
use crate::delta::DeltaPackage;
use crate::package::read_metadata;

/// Local artifacts that produce a target version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Full package the chain starts from.
    pub base: ReleaseEntry,
    /// Deltas applied on top of `base`, in ascending version order.
    pub deltas: Vec<ReleaseEntry>,
    pub target: Version,
}

impl UpdatePlan {
    pub fn is_full(&self) -> bool {
        self.deltas.is_empty()
    }
}

fn present(release_dir: &Path, entry: &ReleaseEntry) -> bool {
    release_dir.join(&entry.filename).is_file()
}

/// Choose how to reach `target` from the artifacts in `release_dir`.
///
/// The full package for `target` wins when it is present locally. Otherwise
/// the chain starts at the newest local full release at or below
/// `installed` and needs a local delta for every released version after it,
/// up to and including `target`.
pub fn plan_update(
    manifest: &ReleaseManifest,
    release_dir: &Path,
    installed: Option<&Version>,
    target: &Version,
) -> Result<UpdatePlan, ApplyError> {
    if let Some(full) = manifest.full_for(target).filter(|e| present(release_dir, e)) {
        return Ok(UpdatePlan {
            base: full.clone(),
            deltas: Vec::new(),
            target: target.clone(),
        });
    }

    let base = installed
        .and_then(|current| {
            manifest
                .iter()
                .filter(|e| !e.is_delta && e.version <= *current && present(release_dir, e))
                .max_by(|a, b| a.version.cmp(&b.version))
        })
        .ok_or_else(|| ApplyError::NoBaseRelease {
            target: target.clone(),
        })?;

    let mut versions: Vec<&Version> = manifest
        .iter()
        .map(|e| &e.version)
        .filter(|v| **v > base.version && *v <= target)
        .collect();
    versions.sort();
    versions.dedup();

    let mut deltas = Vec::with_capacity(versions.len());
    for version in versions {
        let delta = manifest
            .delta_for(version)
            .filter(|e| present(release_dir, e))
            .ok_or_else(|| ApplyError::MissingDelta {
                version: version.clone(),
            })?;
        deltas.push(delta.clone());
    }
    if deltas.last().is_none_or(|d| d.version != *target) {
        return Err(ApplyError::MissingDelta {
            version: target.clone(),
        });
    }

    debug!(base = %base.filename, deltas = deltas.len(), "planned delta chain");
    Ok(UpdatePlan {
        base: base.clone(),
        deltas,
        target: target.clone(),
    })
}

/// Read an artifact and check it against its `RELEASES` hash.
fn read_verified(release_dir: &Path, entry: &ReleaseEntry) -> Result<Vec<u8>, ApplyError> {
    let path = release_dir.join(&entry.filename);
    let data = std::fs::read(&path).map_err(|source| ApplyError::Io { path, source })?;
    if !entry.matches(&data) {
        return Err(ApplyError::ReconstructionMismatch {
            name: entry.filename.clone(),
            reason: "artifact does not match the SHA1 recorded in RELEASES".to_string(),
        });
    }
    Ok(data)
}

/// Rebuild the target package from the plan. Blocking.
pub fn reconstruct(
    release_dir: &Path,
    plan: &UpdatePlan,
    cancel: &CancellationToken,
) -> Result<PackageArchive, ApplyError> {
    let mut archive = PackageArchive::from_bytes(&read_verified(release_dir, &plan.base)?)?;

    for entry in &plan.deltas {
        if cancel.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        let bytes = read_verified(release_dir, entry)?;
        let delta = DeltaPackage::from_archive(PackageArchive::from_bytes(&bytes)?)?;
        archive = delta.apply(&archive)?;
        info!(delta = %entry.filename, "applied delta");
    }

    let meta = read_metadata(&archive)?;
    if meta.version != plan.target {
        return Err(ApplyError::ReconstructionMismatch {
            name: plan.base.filename.clone(),
            reason: format!("rebuilt {} instead of {}", meta.version, plan.target),
        });
    }
    Ok(archive)
}
