//! Publishing a new version into a local release directory.
//!
//! Writes the full package, diffs it against the previous full release when
//! one is present, writes the delta, then records both in `RELEASES`. The
//! ledger is written last so a crash never leaves it pointing at missing
//! files.

use std::path::{Path, PathBuf};

use semver::Version;
use squall_schema::{ReleaseEntry, delta_filename, full_filename};
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::{ArchiveError, PackageArchive};
use crate::delta::{DeltaBuilder, DeltaError, DeltaStats};
use crate::package::{PackageError, read_metadata};
use crate::releases::{self, ReleasesError};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("{0} is already published")]
    AlreadyPublished(String),

    #[error("Cannot publish {version}: {latest} is already released and deltas must stay consecutive")]
    OlderThanLatest { version: Version, latest: Version },

    #[error("Release directory holds '{existing}', refusing to add '{new}'")]
    MixedPackageIds { existing: String, new: String },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Releases(#[from] ReleasesError),

    #[error("Publish task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What one publish added to the release directory.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub full: ReleaseEntry,
    pub delta: Option<ReleaseEntry>,
    pub stats: Option<DeltaStats>,
}

pub struct Publisher {
    release_dir: PathBuf,
    delta_builder: DeltaBuilder,
}

impl Publisher {
    pub fn new(release_dir: impl Into<PathBuf>, delta_builder: DeltaBuilder) -> Self {
        Self {
            release_dir: release_dir.into(),
            delta_builder,
        }
    }

    pub fn release_dir(&self) -> &Path {
        &self.release_dir
    }

    /// Add `package` to the release directory.
    pub async fn publish(&self, package: PackageArchive) -> Result<PublishOutcome, PublishError> {
        let meta = read_metadata(&package)?;
        tokio::fs::create_dir_all(&self.release_dir)
            .await
            .map_err(|e| ArchiveError::Io {
                path: self.release_dir.clone(),
                source: e,
            })?;

        let mut manifest = releases::load_or_default(&self.release_dir)?;
        if let Some(existing) = manifest
            .package_ids()
            .into_iter()
            .find(|id| !id.eq_ignore_ascii_case(&meta.id))
        {
            return Err(PublishError::MixedPackageIds {
                existing: existing.to_string(),
                new: meta.id,
            });
        }

        let full_name = full_filename(&meta.id, &meta.version);
        if manifest.get(&full_name).is_some() {
            return Err(PublishError::AlreadyPublished(full_name));
        }
        if let Some(latest) = manifest.latest_version().filter(|v| **v > meta.version) {
            return Err(PublishError::OlderThanLatest {
                version: meta.version,
                latest: latest.clone(),
            });
        }

        let base_path = manifest
            .find_previous_full_release(&meta.version)
            .map(|prev| self.release_dir.join(&prev.filename))
            .filter(|path| {
                let present = path.is_file();
                if !present {
                    warn!(path = %path.display(), "previous full release missing locally, skipping delta");
                }
                present
            });

        let dir = self.release_dir.clone();
        let builder = self.delta_builder;
        let delta_name = delta_filename(&meta.id, &meta.version);
        let full_path = dir.join(&full_name);

        let (full_bytes, delta) = tokio::task::spawn_blocking(
            move || -> Result<(Vec<u8>, Option<(Vec<u8>, DeltaStats)>), PublishError> {
                let full_bytes = package.to_bytes()?;
                crate::io::write_atomic(&full_path, &full_bytes).map_err(|e| ArchiveError::Io {
                    path: full_path.clone(),
                    source: e,
                })?;

                let Some(base_path) = base_path else {
                    return Ok((full_bytes, None));
                };
                let base = PackageArchive::open(&base_path)?;
                let (delta, stats) = builder.build(&base, &package)?;
                let delta_bytes = delta.to_bytes()?;
                let delta_path = dir.join(&delta_name);
                crate::io::write_atomic(&delta_path, &delta_bytes).map_err(|e| {
                    ArchiveError::Io {
                        path: delta_path.clone(),
                        source: e,
                    }
                })?;
                Ok((full_bytes, Some((delta_bytes, stats))))
            },
        )
        .await??;

        let full = entry(&full_name, &full_bytes)?;
        manifest.push(full.clone());
        let (delta, stats) = match delta {
            Some((bytes, stats)) => {
                let delta = entry(&delta_filename(&meta.id, &meta.version), &bytes)?;
                manifest.push(delta.clone());
                (Some(delta), Some(stats))
            }
            None => (None, None),
        };
        releases::save(&self.release_dir, &manifest)?;

        info!(
            id = %meta.id,
            version = %meta.version,
            full = full.filesize,
            delta = delta.as_ref().map(|d| d.filesize),
            "published release"
        );
        Ok(PublishOutcome { full, delta, stats })
    }
}

fn entry(name: &str, bytes: &[u8]) -> Result<ReleaseEntry, PublishError> {
    ReleaseEntry::from_bytes(name, bytes).map_err(|source| {
        PublishError::Releases(ReleasesError::InvalidEntry {
            path: PathBuf::from(name),
            source,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveEntry;
    use crate::diff::DiffBackend;
    use squall_schema::PackageMetadata;

    fn package(id: &str, version: &str, body: &[u8]) -> PackageArchive {
        let meta = PackageMetadata {
            id: id.to_string(),
            version: Version::parse(version).unwrap(),
            title: id.to_string(),
            platform: "p".to_string(),
            release_notes: None,
        };
        let mut archive = PackageArchive::new();
        archive
            .insert(
                "package.toml",
                ArchiveEntry::new(toml::to_string(&meta).unwrap().into_bytes()),
            )
            .unwrap();
        archive
            .insert("lib/p/app.bin", ArchiveEntry::new(body.to_vec()))
            .unwrap();
        archive
    }

    #[tokio::test]
    async fn first_publish_has_no_delta() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path(), DeltaBuilder::new(DiffBackend::Modern));
        let outcome = publisher
            .publish(package("App", "1.0.0", b"one"))
            .await
            .unwrap();
        assert!(outcome.delta.is_none());
        assert!(dir.path().join("App-1.0.0-full.nupkg").is_file());

        let manifest = releases::load(dir.path()).unwrap();
        assert_eq!(manifest.len(), 1);
        assert!(manifest.entries()[0].matches(
            &std::fs::read(dir.path().join("App-1.0.0-full.nupkg")).unwrap()
        ));
    }

    #[tokio::test]
    async fn second_publish_adds_full_then_delta() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path(), DeltaBuilder::new(DiffBackend::Modern));
        publisher.publish(package("App", "1.0.0", b"one")).await.unwrap();
        let outcome = publisher
            .publish(package("App", "1.1.0", b"two"))
            .await
            .unwrap();
        assert_eq!(
            outcome.delta.as_ref().map(|d| d.filename.as_str()),
            Some("App-1.1.0-delta.nupkg")
        );

        let names: Vec<String> = releases::load(dir.path())
            .unwrap()
            .iter()
            .map(|e| e.filename.clone())
            .collect();
        assert_eq!(
            names,
            [
                "App-1.0.0-full.nupkg",
                "App-1.1.0-full.nupkg",
                "App-1.1.0-delta.nupkg"
            ]
        );
    }

    #[tokio::test]
    async fn rejects_duplicates_and_foreign_ids() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path(), DeltaBuilder::default());
        publisher.publish(package("App", "1.0.0", b"one")).await.unwrap();

        assert!(matches!(
            publisher.publish(package("App", "1.0.0", b"one")).await,
            Err(PublishError::AlreadyPublished(_))
        ));
        assert!(matches!(
            publisher.publish(package("Other", "2.0.0", b"x")).await,
            Err(PublishError::MixedPackageIds { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_versions_older_than_latest() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path(), DeltaBuilder::new(DiffBackend::Modern));
        publisher.publish(package("App", "1.0.0", b"one")).await.unwrap();
        publisher.publish(package("App", "1.1.0", b"two")).await.unwrap();

        let err = publisher
            .publish(package("App", "1.0.5", b"between"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::OlderThanLatest { ref latest, .. } if *latest == Version::new(1, 1, 0)
        ));
        assert!(!dir.path().join("App-1.0.5-full.nupkg").exists());
        assert!(!dir.path().join("App-1.0.5-delta.nupkg").exists());
        assert_eq!(releases::load(dir.path()).unwrap().len(), 3);
    }
}
