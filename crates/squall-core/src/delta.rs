//! Delta packages.
//!
//! A delta package turns the full package of one version into the full
//! package of the next. For every path it records one of:
//!
//! - `diff`: `diff/<path>` holds a binary delta against the old file
//! - `copy`: `copy/<path>` holds the new file verbatim
//! - `delete`: the path is gone in the new version
//!
//! Paths whose content is identical in both versions are omitted; the
//! client keeps its existing copy. `delta.json` records the strategy per
//! path, the sizes and SHA1 used to verify reconstruction, the version pair
//! and the diff backend that produced the payloads.
//!
//! The new `package.toml` is not a per-path change. It is stored as is at
//! the root of the delta and replaces the base's metadata on apply.

use std::collections::BTreeMap;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use squall_schema::{Blake3Hash, METADATA_FILENAME, Sha1Hash};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveEntry, ArchiveError, PackageArchive};
use crate::diff::{DiffBackend, DiffOptions};
use crate::package::{PackageError, read_metadata};

/// Name of the manifest inside a delta package.
pub const DELTA_MANIFEST: &str = "delta.json";

/// Directory holding diff payloads.
pub const DIFF_DIR: &str = "diff";

/// Directory holding copied files.
pub const COPY_DIR: &str = "copy";

const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DeltaError {
    #[error("Package id mismatch: expected '{expected}', got '{actual}'")]
    PackageMismatch { expected: String, actual: String },

    #[error("Delta applies to {expected}, but the base package is {actual}")]
    BaseVersionMismatch { expected: Version, actual: Version },

    #[error("Cannot build a delta from {from} to {to}: target must be newer")]
    VersionOrder { from: Version, to: Version },

    #[error("Delta package has no payload for '{0}'")]
    MissingPayload(String),

    #[error("Reconstruction mismatch for '{path}': expected {expected}, got {actual}")]
    ReconstructionMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid delta.json: {0}")]
    Manifest(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Package(#[from] PackageError),
}

impl DeltaError {
    fn mismatch(path: &str, expected: impl ToString, actual: impl ToString) -> Self {
        Self::ReconstructionMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// How one path is carried by a delta package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Diff,
    Copy,
    Delete,
}

/// Manifest record for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_sha1: Option<Sha1Hash>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub executable: bool,
}

/// The `delta.json` companion manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaManifest {
    pub format: u32,
    pub package_id: String,
    pub from_version: Version,
    pub to_version: Version,
    pub backend: DiffBackend,
    /// Keyed by path; omitted paths are unchanged.
    pub files: BTreeMap<String, FileChange>,
}

impl DeltaManifest {
    pub fn count(&self, strategy: Strategy) -> usize {
        self.files
            .values()
            .filter(|c| c.strategy == strategy)
            .count()
    }
}

/// When a diff is worth shipping instead of the raw file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaPolicy {
    /// A diff is kept only if `diff_len < new_len * max_delta_ratio`.
    pub max_delta_ratio: f64,
}

impl Default for DeltaPolicy {
    fn default() -> Self {
        Self {
            max_delta_ratio: 1.0,
        }
    }
}

impl DeltaPolicy {
    pub fn accepts(&self, delta_len: usize, new_len: usize) -> bool {
        (delta_len as f64) < (new_len as f64) * self.max_delta_ratio
    }
}

/// Per-strategy counts for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub diffed: usize,
    pub copied: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// A built or loaded delta package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPackage {
    manifest: DeltaManifest,
    payloads: PackageArchive,
}

impl DeltaPackage {
    pub fn manifest(&self) -> &DeltaManifest {
        &self.manifest
    }

    /// Diff or copy payload for `path`.
    pub fn payload(&self, path: &str) -> Option<&ArchiveEntry> {
        let change = self.manifest.files.get(path)?;
        match change.strategy {
            Strategy::Diff => self.payloads.get(&payload_path(DIFF_DIR, path)),
            Strategy::Copy => self.payloads.get(&payload_path(COPY_DIR, path)),
            Strategy::Delete => None,
        }
    }

    /// `package.toml` of the target version.
    pub fn metadata(&self) -> Option<&ArchiveEntry> {
        self.payloads.get(METADATA_FILENAME)
    }

    /// Container form: payloads plus `delta.json`.
    pub fn to_archive(&self) -> Result<PackageArchive, DeltaError> {
        let mut archive = self.payloads.clone();
        let json = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| DeltaError::Manifest(e.to_string()))?;
        archive.insert(DELTA_MANIFEST, ArchiveEntry::new(json))?;
        Ok(archive)
    }

    pub fn from_archive(mut archive: PackageArchive) -> Result<Self, DeltaError> {
        let manifest = archive
            .remove(DELTA_MANIFEST)
            .ok_or_else(|| DeltaError::Manifest("missing".to_string()))?;
        let manifest: DeltaManifest = serde_json::from_slice(&manifest.data)
            .map_err(|e| DeltaError::Manifest(e.to_string()))?;
        if manifest.format != FORMAT_VERSION {
            return Err(DeltaError::Manifest(format!(
                "unsupported format {}",
                manifest.format
            )));
        }
        Ok(Self {
            manifest,
            payloads: archive,
        })
    }

    pub fn open(path: &Path) -> Result<Self, DeltaError> {
        Self::from_archive(PackageArchive::open(path)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DeltaError> {
        Ok(self.to_archive()?.to_bytes()?)
    }

    pub fn write(&self, path: &Path) -> Result<(), DeltaError> {
        Ok(self.to_archive()?.write(path)?)
    }

    /// Reconstruct the full package of `to_version` from the full package
    /// of `from_version`.
    ///
    /// Every diffed or copied file is checked against its recorded size and
    /// SHA1; any difference fails the whole reconstruction.
    pub fn apply(&self, base: &PackageArchive) -> Result<PackageArchive, DeltaError> {
        let meta = read_metadata(base)?;
        let m = &self.manifest;
        if !meta.id.eq_ignore_ascii_case(&m.package_id) {
            return Err(DeltaError::PackageMismatch {
                expected: m.package_id.clone(),
                actual: meta.id,
            });
        }
        if meta.version != m.from_version {
            return Err(DeltaError::BaseVersionMismatch {
                expected: m.from_version.clone(),
                actual: meta.version,
            });
        }

        let metadata = self
            .metadata()
            .ok_or_else(|| DeltaError::MissingPayload(METADATA_FILENAME.to_string()))?;

        let mut result = base.clone();
        result.replace(METADATA_FILENAME, metadata.clone())?;
        for (path, change) in &m.files {
            match change.strategy {
                Strategy::Delete => {
                    result.remove(path);
                }
                Strategy::Copy => {
                    let payload = self
                        .payload(path)
                        .ok_or_else(|| DeltaError::MissingPayload(path.clone()))?;
                    verify(path, change, &payload.data)?;
                    result.replace(path, entry_for(payload.data.clone(), change))?;
                }
                Strategy::Diff => {
                    let patch = self
                        .payload(path)
                        .ok_or_else(|| DeltaError::MissingPayload(path.clone()))?;
                    let old = base.get(path).ok_or_else(|| {
                        DeltaError::mismatch(path, "file present in base", "missing")
                    })?;
                    if let Some(expected) = change.old_size {
                        if old.data.len() as u64 != expected {
                            return Err(DeltaError::mismatch(
                                path,
                                format!("{expected} byte base"),
                                format!("{} byte base", old.data.len()),
                            ));
                        }
                    }
                    let new = m
                        .backend
                        .apply_delta(&patch.data, &old.data)
                        .map_err(|e| DeltaError::mismatch(path, "patched content", e))?;
                    verify(path, change, &new)?;
                    result.replace(path, entry_for(new, change))?;
                }
            }
        }

        debug!(
            id = %m.package_id,
            from = %m.from_version,
            to = %m.to_version,
            "applied delta package"
        );
        Ok(result)
    }
}

fn payload_path(dir: &str, path: &str) -> String {
    format!("{dir}/{path}")
}

fn is_metadata(path: &str) -> bool {
    path.eq_ignore_ascii_case(METADATA_FILENAME)
}

fn same_content(old: &ArchiveEntry, new: &ArchiveEntry) -> bool {
    old.data.len() == new.data.len()
        && Blake3Hash::compute(&old.data) == Blake3Hash::compute(&new.data)
}

fn entry_for(data: Vec<u8>, change: &FileChange) -> ArchiveEntry {
    ArchiveEntry {
        data,
        executable: change.executable,
    }
}

fn verify(path: &str, change: &FileChange, data: &[u8]) -> Result<(), DeltaError> {
    if let Some(size) = change.new_size {
        if data.len() as u64 != size {
            return Err(DeltaError::mismatch(
                path,
                format!("{size} bytes"),
                format!("{} bytes", data.len()),
            ));
        }
    }
    if let Some(expected) = &change.new_sha1 {
        let actual = Sha1Hash::compute(data);
        if &actual != expected {
            return Err(DeltaError::mismatch(path, expected, actual));
        }
    }
    Ok(())
}

/// Builds delta packages between consecutive full packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaBuilder {
    backend: DiffBackend,
    options: DiffOptions,
    policy: DeltaPolicy,
}

impl DeltaBuilder {
    pub fn new(backend: DiffBackend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: DeltaPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend(&self) -> DiffBackend {
        self.backend
    }

    /// Build the delta turning `base` into `target`.
    ///
    /// Both packages must share a package id, and `target` must be newer.
    /// Diff failures never escape: the file is copied instead.
    pub fn build(
        &self,
        base: &PackageArchive,
        target: &PackageArchive,
    ) -> Result<(DeltaPackage, DeltaStats), DeltaError> {
        let base_meta = read_metadata(base)?;
        let target_meta = read_metadata(target)?;
        if !base_meta.id.eq_ignore_ascii_case(&target_meta.id) {
            return Err(DeltaError::PackageMismatch {
                expected: target_meta.id,
                actual: base_meta.id,
            });
        }
        if base_meta.version >= target_meta.version {
            return Err(DeltaError::VersionOrder {
                from: base_meta.version,
                to: target_meta.version,
            });
        }

        let mut files = BTreeMap::new();
        let mut payloads = PackageArchive::new();
        let mut stats = DeltaStats::default();

        for (path, new) in target.entries() {
            let key = path.as_str();
            if is_metadata(key) {
                payloads.insert(METADATA_FILENAME, new.clone())?;
                continue;
            }
            let copy_path = payload_path(COPY_DIR, key);
            let old = base.key(key).zip(base.get(key));

            let (strategy, old_size) = match old {
                Some((old_path, old)) if same_content(old, new) => {
                    if old_path.as_str() == key && old.executable == new.executable {
                        stats.unchanged += 1;
                        continue;
                    }
                    // Casing or mode changed, content did not
                    payloads.insert(&copy_path, new.clone())?;
                    (Strategy::Copy, None)
                }
                Some((_, old)) => match self.try_diff(key, &old.data, &new.data) {
                    Some(patch) => {
                        payloads.insert(&payload_path(DIFF_DIR, key), ArchiveEntry::new(patch))?;
                        (Strategy::Diff, Some(old.data.len() as u64))
                    }
                    None => {
                        payloads.insert(&copy_path, new.clone())?;
                        (Strategy::Copy, None)
                    }
                },
                None => {
                    payloads.insert(&copy_path, new.clone())?;
                    (Strategy::Copy, None)
                }
            };

            match strategy {
                Strategy::Diff => stats.diffed += 1,
                _ => stats.copied += 1,
            }
            files.insert(
                key.to_string(),
                FileChange {
                    strategy,
                    old_size,
                    new_size: Some(new.data.len() as u64),
                    new_sha1: Some(Sha1Hash::compute(&new.data)),
                    executable: new.executable,
                },
            );
        }

        for (path, _) in base.entries() {
            if !is_metadata(path.as_str()) && !target.contains(path.as_str()) {
                stats.deleted += 1;
                files.insert(
                    path.as_str().to_string(),
                    FileChange {
                        strategy: Strategy::Delete,
                        old_size: None,
                        new_size: None,
                        new_sha1: None,
                        executable: false,
                    },
                );
            }
        }

        let manifest = DeltaManifest {
            format: FORMAT_VERSION,
            package_id: target_meta.id,
            from_version: base_meta.version,
            to_version: target_meta.version,
            backend: self.backend,
            files,
        };
        info!(
            id = %manifest.package_id,
            from = %manifest.from_version,
            to = %manifest.to_version,
            backend = %self.backend,
            diffed = stats.diffed,
            copied = stats.copied,
            deleted = stats.deleted,
            unchanged = stats.unchanged,
            "built delta package"
        );
        Ok((DeltaPackage { manifest, payloads }, stats))
    }

    /// Diff one file, or `None` when a raw copy should be shipped instead.
    fn try_diff(&self, path: &str, old: &[u8], new: &[u8]) -> Option<Vec<u8>> {
        match self.backend.create_delta(old, new, &self.options) {
            Ok(patch) if self.policy.accepts(patch.len(), new.len()) => Some(patch),
            Ok(patch) => {
                debug!(path, delta = patch.len(), new = new.len(), "delta not smaller, copying");
                None
            }
            Err(e) => {
                warn!(path, error = %e, "diff failed, copying");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_schema::PackageMetadata;

    fn package(version: &str, files: &[(&str, &[u8])]) -> PackageArchive {
        let meta = PackageMetadata {
            id: "App".to_string(),
            version: Version::parse(version).unwrap(),
            title: "App".to_string(),
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
        for (path, data) in files {
            archive.insert(path, ArchiveEntry::new(data.to_vec())).unwrap();
        }
        archive
    }

    fn big(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn identical_files_are_omitted() {
        let same = big(1, 4096);
        let old = package("1.0.0", &[("lib/p/same.bin", &same), ("lib/p/gone.txt", b"bye")]);
        let new = package("1.1.0", &[("lib/p/same.bin", &same), ("lib/p/added.txt", b"hi")]);

        let (delta, stats) = DeltaBuilder::new(DiffBackend::Modern).build(&old, &new).unwrap();
        let files = &delta.manifest().files;
        assert!(!files.contains_key("lib/p/same.bin"));
        assert_eq!(files["lib/p/added.txt"].strategy, Strategy::Copy);
        assert_eq!(files["lib/p/gone.txt"].strategy, Strategy::Delete);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.deleted, 1);
    }

    #[test]
    fn changed_file_is_diffed_and_reconstructs() {
        let a = big(1, 16 * 1024);
        let mut b = a.clone();
        b[100..110].fill(0xEE);
        for backend in [DiffBackend::Legacy, DiffBackend::Modern] {
            let old = package("1.0.0", &[("lib/p/app.bin", &a)]);
            let new = package("1.1.0", &[("lib/p/app.bin", &b)]);
            let (delta, _) = DeltaBuilder::new(backend).build(&old, &new).unwrap();

            let change = &delta.manifest().files["lib/p/app.bin"];
            assert_eq!(change.strategy, Strategy::Diff);
            assert_eq!(change.old_size, Some(a.len() as u64));
            assert_eq!(delta.manifest().backend, backend);

            let loaded = DeltaPackage::from_archive(delta.to_archive().unwrap()).unwrap();
            let rebuilt = loaded.apply(&old).unwrap();
            assert_eq!(rebuilt, new);
        }
    }

    #[test]
    fn oversized_delta_falls_back_to_copy() {
        let old = package("1.0.0", &[("lib/p/tiny.txt", b"a")]);
        let new = package("1.1.0", &[("lib/p/tiny.txt", b"b")]);
        let (delta, _) = DeltaBuilder::new(DiffBackend::Legacy).build(&old, &new).unwrap();
        assert_eq!(delta.manifest().files["lib/p/tiny.txt"].strategy, Strategy::Copy);
        assert_eq!(delta.apply(&old).unwrap(), new);
    }

    #[test]
    fn diff_failure_falls_back_to_copy() {
        let a = big(1, 4096);
        let b = big(2, 4096);
        let old = package("1.0.0", &[("lib/p/app.bin", &a)]);
        let new = package("1.1.0", &[("lib/p/app.bin", &b)]);
        let builder = DeltaBuilder::new(DiffBackend::Legacy).with_options(DiffOptions {
            legacy_size_ceiling: 16,
            ..DiffOptions::default()
        });
        let (delta, _) = builder.build(&old, &new).unwrap();
        assert_eq!(delta.manifest().files["lib/p/app.bin"].strategy, Strategy::Copy);
        assert_eq!(delta.apply(&old).unwrap(), new);
    }

    #[test]
    fn build_is_deterministic() {
        let a = big(1, 8192);
        let mut b = a.clone();
        b[4000] ^= 1;
        let old = package("1.0.0", &[("lib/p/z.bin", &a), ("lib/p/A.bin", &a)]);
        let new = package("1.1.0", &[("lib/p/z.bin", &b), ("lib/p/A.bin", &b)]);
        let builder = DeltaBuilder::new(DiffBackend::Modern);
        let first = builder.build(&old, &new).unwrap().0.to_bytes().unwrap();
        let second = builder.build(&old, &new).unwrap().0.to_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_wrong_base_and_bad_order() {
        let v1 = package("1.0.0", &[("lib/p/a", b"1")]);
        let v2 = package("1.1.0", &[("lib/p/a", b"2")]);
        let v3 = package("1.2.0", &[("lib/p/a", b"3")]);
        let builder = DeltaBuilder::new(DiffBackend::Modern);

        assert!(matches!(
            builder.build(&v2, &v1),
            Err(DeltaError::VersionOrder { .. })
        ));
        let (delta, _) = builder.build(&v2, &v3).unwrap();
        assert!(matches!(
            delta.apply(&v1),
            Err(DeltaError::BaseVersionMismatch { .. })
        ));
    }

    #[test]
    fn tampered_payload_is_a_reconstruction_mismatch() {
        let old = package("1.0.0", &[("lib/p/a.txt", b"old")]);
        let new = package("1.1.0", &[("lib/p/b.txt", b"new")]);
        let (delta, _) = DeltaBuilder::new(DiffBackend::Modern).build(&old, &new).unwrap();

        let mut archive = delta.to_archive().unwrap();
        archive
            .replace("copy/lib/p/b.txt", ArchiveEntry::new(b"evil".to_vec()))
            .unwrap();
        let tampered = DeltaPackage::from_archive(archive).unwrap();
        assert!(matches!(
            tampered.apply(&old),
            Err(DeltaError::ReconstructionMismatch { .. })
        ));
    }

    #[test]
    fn payload_names_cannot_collide_with_package_files() {
        let a = big(1, 16 * 1024);
        let mut b = a.clone();
        b[200..220].fill(0xAB);
        let old = package("1.0.0", &[("lib/p/x", &a)]);
        let new = package("1.1.0", &[("lib/p/x", &b), ("lib/p/x.diff", b"a file of its own")]);

        let (delta, _) = DeltaBuilder::new(DiffBackend::Modern).build(&old, &new).unwrap();
        let files = &delta.manifest().files;
        assert_eq!(files["lib/p/x"].strategy, Strategy::Diff);
        assert_eq!(files["lib/p/x.diff"].strategy, Strategy::Copy);
        assert_eq!(
            delta.payload("lib/p/x.diff").unwrap().data,
            b"a file of its own"
        );

        let loaded = DeltaPackage::from_archive(delta.to_archive().unwrap()).unwrap();
        assert_eq!(loaded.apply(&old).unwrap(), new);
    }

    #[test]
    fn metadata_travels_outside_the_file_list() {
        let a = big(1, 16 * 1024);
        let mut b = a.clone();
        b[300..310].fill(0);
        let readme: &[u8] = b"unchanged";
        for backend in [DiffBackend::Legacy, DiffBackend::Modern] {
            let old = package("1.0.0", &[("lib/p/app.bin", &a), ("lib/p/readme.txt", readme)]);
            let new = package("1.1.0", &[("lib/p/app.bin", &b), ("lib/p/readme.txt", readme)]);
            let (delta, _) = DeltaBuilder::new(backend).build(&old, &new).unwrap();

            let manifest = delta.manifest();
            assert_eq!(manifest.count(Strategy::Diff), 1);
            assert_eq!(manifest.files.len(), 1);
            assert!(manifest.files.contains_key("lib/p/app.bin"));
            assert_eq!(
                delta.metadata().unwrap(),
                new.get(METADATA_FILENAME).unwrap()
            );

            let rebuilt = delta.apply(&old).unwrap();
            assert_eq!(read_metadata(&rebuilt).unwrap().version, Version::new(1, 1, 0));
            assert_eq!(rebuilt, new);
        }
    }
}
